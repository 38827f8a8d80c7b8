use crate::calculus::{DifferentiableVectorFunction, FunctionError, VectorFunction};
use crate::Real;
use itertools::iterate;
use log::{debug, info};
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use numeric_literals::replace_float_literals;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct NewtonSettings<T> {
    /// Maximum number of Newton steps. `None` iterates until convergence or divergence.
    pub max_iterations: Option<usize>,
    /// Absolute tolerance: converged if `|F(u)|_2 <= eps_a`.
    pub eps_a: T,
    /// Relative tolerance: converged if `|F(u)|_2 <= eps_r * |F(u_0)|_2` after at least one step.
    pub eps_r: Option<T>,
    /// The iteration is considered divergent once `|F(u)|_2 > divergence_factor * |F(u_0)|_2`.
    pub divergence_factor: T,
    /// Treat the problem as linear: take exactly one full step and return without
    /// evaluating the residual again.
    pub linear: bool,
}

impl<T: Real> Default for NewtonSettings<T> {
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn default() -> Self {
        Self {
            max_iterations: Some(1),
            eps_a: 1e-10,
            eps_r: None,
            divergence_factor: 1e10,
            linear: false,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NewtonStatus {
    Converged,
    /// The maximum number of iterations was reached. The last iterate is kept and it is
    /// up to the caller to decide whether it is acceptable.
    MaximumIterationsReached,
    /// The solve was cancelled between two iterations.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct NewtonReport<T> {
    pub status: NewtonStatus,
    pub iterations: usize,
    /// Residual norms, starting with the norm of the initial residual.
    pub residual_norms: Vec<T>,
    pub step_lengths: Vec<T>,
}

impl<T> NewtonReport<T> {
    pub fn converged(&self) -> bool {
        self.status == NewtonStatus::Converged
    }
}

#[derive(Debug)]
pub enum NewtonErrorKind {
    /// Evaluating the residual failed.
    Residual(FunctionError),
    /// Solving the Jacobian system failed.
    JacobianSystem(FunctionError),
    /// The line search failed to produce a valid step.
    LineSearch(FunctionError),
    /// The residual became non-finite or grew beyond the divergence threshold.
    Diverged,
}

/// A fatal failure of a Newton solve.
///
/// Carries the convergence history and the last iterate whose residual was successfully evaluated.
#[derive(Debug)]
pub struct NewtonError<T: Scalar> {
    pub kind: NewtonErrorKind,
    pub iterations: usize,
    pub residual_norms: Vec<T>,
    pub last_iterate: DVector<T>,
}

impl<T: Real> Display for NewtonError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.kind {
            NewtonErrorKind::Residual(err) => write!(f, "Failed to evaluate residual. Error: {}", err)?,
            NewtonErrorKind::JacobianSystem(err) => write!(f, "Failed to solve Jacobian system. Error: {}", err)?,
            NewtonErrorKind::LineSearch(err) => {
                write!(f, "Line search failed to produce valid step direction. Error: {}", err)?
            }
            NewtonErrorKind::Diverged => write!(f, "Newton iterations diverged.")?,
        }
        write!(
            f,
            " (after {} iterations, residual norms: {:?})",
            self.iterations, self.residual_norms
        )
    }
}

impl<T: Real> Error for NewtonError<T> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            NewtonErrorKind::Residual(err) | NewtonErrorKind::JacobianSystem(err) | NewtonErrorKind::LineSearch(err) => {
                Some(err.as_ref())
            }
            NewtonErrorKind::Diverged => None,
        }
    }
}

/// Attempts to solve the non-linear equation F(u) = 0.
///
/// The buffers `f` and `dx` must have the same dimension as `x`. Upon returning, `x` holds the
/// final iterate and `f` the last evaluated residual.
pub fn newton<'a, T, F>(
    function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
) -> Result<NewtonReport<T>, NewtonError<T>>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    newton_line_search(function, x, f, dx, settings, &mut NoLineSearch {})
}

/// Same as `newton`, but allows specifying a line search.
pub fn newton_line_search<'a, T, F>(
    function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
    line_search: &mut impl LineSearch<T, F>,
) -> Result<NewtonReport<T>, NewtonError<T>>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    newton_impl(function, x.into(), f.into(), dx.into(), settings, line_search, None)
}

/// Same as `newton_line_search`, but checks `cancel` at the top of every iteration.
///
/// Cancellation is not an error: the returned report has status [`NewtonStatus::Cancelled`]
/// and `x` holds the last valid iterate.
pub fn newton_cancellable<'a, T, F>(
    function: F,
    x: impl Into<DVectorViewMut<'a, T>>,
    f: impl Into<DVectorViewMut<'a, T>>,
    dx: impl Into<DVectorViewMut<'a, T>>,
    settings: NewtonSettings<T>,
    line_search: &mut impl LineSearch<T, F>,
    cancel: &AtomicBool,
) -> Result<NewtonReport<T>, NewtonError<T>>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    newton_impl(function, x.into(), f.into(), dx.into(), settings, line_search, Some(cancel))
}

fn newton_impl<T, F>(
    mut function: F,
    mut x: DVectorViewMut<T>,
    mut f: DVectorViewMut<T>,
    mut minus_dx: DVectorViewMut<T>,
    settings: NewtonSettings<T>,
    line_search: &mut impl LineSearch<T, F>,
    cancel: Option<&AtomicBool>,
) -> Result<NewtonReport<T>, NewtonError<T>>
where
    T: Real,
    F: DifferentiableVectorFunction<T>,
{
    assert_eq!(x.nrows(), f.nrows());
    assert_eq!(minus_dx.nrows(), f.nrows());

    let mut residual_norms = Vec::new();
    let mut step_lengths = Vec::new();
    let mut x_prev = x.clone_owned();

    let fail = |kind, iterations, residual_norms: Vec<T>, last_iterate: DVector<T>| NewtonError {
        kind,
        iterations,
        residual_norms,
        last_iterate,
    };

    if let Err(err) = function.eval_into(&mut f, &DVectorView::from(&x)) {
        return Err(fail(NewtonErrorKind::Residual(err), 0, residual_norms, x.clone_owned()));
    }

    let mut err = f.norm();
    let err0 = err;
    residual_norms.push(err);
    debug!("Newton initial residual norm: {}", err);

    let mut iter = 0;
    let status = loop {
        if cancel
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
        {
            break NewtonStatus::Cancelled;
        }

        if !err.is_finite() || (iter > 0 && err > settings.divergence_factor * err0) {
            x.copy_from(&x_prev);
            return Err(fail(NewtonErrorKind::Diverged, iter, residual_norms, x_prev));
        }

        let converged_abs = err <= settings.eps_a;
        let converged_rel = iter > 0
            && settings
                .eps_r
                .map(|eps_r| err <= eps_r * err0)
                .unwrap_or(false);
        if converged_abs || converged_rel {
            break NewtonStatus::Converged;
        }

        if settings
            .max_iterations
            .map(|max_iter| iter == max_iter)
            .unwrap_or(false)
        {
            break NewtonStatus::MaximumIterationsReached;
        }

        x_prev.copy_from(&x);

        // Solve the system J dx = -f   <=>   J (-dx) = f
        let j_result = function.solve_jacobian_system(&mut minus_dx, &DVectorView::from(&x), &DVectorView::from(&f));
        if let Err(err) = j_result {
            return Err(fail(NewtonErrorKind::JacobianSystem(err), iter, residual_norms, x_prev));
        }

        // Flip sign to make it consistent with line search
        minus_dx *= T::from_f64(-1.0).unwrap();
        let dx = &minus_dx;

        if settings.linear {
            // The first linear solve is exact, so there is no need to evaluate the residual again
            x.axpy(T::one(), dx, T::one());
            step_lengths.push(T::one());
            iter += 1;
            break NewtonStatus::Converged;
        }

        let step_length = match line_search.step(
            &mut function,
            DVectorViewMut::from(&mut f),
            DVectorViewMut::from(&mut x),
            DVectorView::from(dx),
        ) {
            Ok(step_length) => step_length,
            Err(err) => {
                x.copy_from(&x_prev);
                return Err(fail(NewtonErrorKind::LineSearch(err), iter, residual_norms, x_prev));
            }
        };
        iter += 1;
        err = f.norm();
        residual_norms.push(err);
        step_lengths.push(step_length);
        debug!(
            "Newton iter {}: residual norm {}, step length {}",
            iter, err, step_length
        );
    };

    info!(
        "Newton finished with status {:?} after {} iterations (residual norm {} -> {})",
        status,
        iter,
        err0,
        residual_norms.last().copied().unwrap_or(err0)
    );

    Ok(NewtonReport {
        status,
        iterations: iter,
        residual_norms,
        step_lengths,
    })
}

pub trait LineSearch<T: Scalar, F: VectorFunction<T>> {
    fn step(
        &mut self,
        function: &mut F,
        f: DVectorViewMut<T>,
        x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, FunctionError>;
}

/// Trivial implementation of line search. Equivalent to a single, full Newton step.
#[derive(Clone, Debug)]
pub struct NoLineSearch;

impl<T, F> LineSearch<T, F> for NoLineSearch
where
    T: Real,
    F: VectorFunction<T>,
{
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, FunctionError> {
        let p = direction;
        x.axpy(T::one(), &p, T::one());
        function.eval_into(&mut f, &DVectorView::from(&x))?;
        Ok(T::one())
    }
}

/// Standard backtracking line search using the Armijo condition.
///
/// Trial steps whose residual cannot be evaluated (for example because an element degenerates)
/// are rejected like steps that do not decrease the residual sufficiently.
///
/// See Jorge & Nocedal (2006), Numerical Optimization, Chapter 3.1.
#[derive(Clone, Debug)]
pub struct BacktrackingLineSearch {
    /// Sufficient decrease parameter in (0, 1).
    pub c: f64,
    /// The search fails once the step length drops below this value.
    pub alpha_min: f64,
}

impl Default for BacktrackingLineSearch {
    fn default() -> Self {
        Self {
            c: 1e-4,
            alpha_min: 1e-6,
        }
    }
}

impl<T, F> LineSearch<T, F> for BacktrackingLineSearch
where
    T: Real,
    F: VectorFunction<T>,
{
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    fn step(
        &mut self,
        function: &mut F,
        mut f: DVectorViewMut<T>,
        mut x: DVectorViewMut<T>,
        direction: DVectorView<T>,
    ) -> Result<T, FunctionError> {
        // We seek to solve
        //  F(x) = 0
        // by minimizing
        //  g(x) = (1/2) || F(x) ||^2
        // and the sufficient decrease condition becomes
        //  g(x_k + alpha * p_k) <= (1 - c * alpha) * g(x_k)
        // where we have assumed that grad F^T p_k ~= - F(x_k), which holds
        // if p_k is the exact solution of the Newton step equation.
        let c = T::from_f64(self.c).unwrap();
        let alpha_min = T::from_f64(self.alpha_min).unwrap();

        let p = direction;
        let g_initial = 0.5 * f.magnitude_squared();

        // Start out with some alphas that don't decrease too quickly, then
        // start decreasing them much faster if the first few iterations don't let us
        // take a step.
        let initial_alphas = [0.0, 1.0, 0.75, 0.5];
        let mut alpha_iter = initial_alphas
            .iter()
            .copied()
            .chain(iterate(0.25, |alpha_i| 0.25 * *alpha_i));

        let mut alpha_prev = alpha_iter.next().unwrap();
        let mut alpha = alpha_iter.next().unwrap();

        loop {
            let delta_alpha = alpha - alpha_prev;

            // We have that x^{k + 1} = x^k + (alpha^k - alpha^{k - 1}) * p
            x.axpy(delta_alpha, &p, T::one());
            let accepted = match function.eval_into(&mut f, &DVectorView::from(&x)) {
                Ok(()) => {
                    let g = 0.5 * f.magnitude_squared();
                    g.is_finite() && g <= (1.0 - c * alpha) * g_initial
                }
                Err(err) => {
                    debug!("Rejecting line search step length {}: {}", alpha, err);
                    false
                }
            };

            if accepted {
                break;
            } else if alpha < alpha_min {
                // Leave x at the start of the line
                x.axpy(-alpha, &p, T::one());
                return Err(Box::from(format!(
                    "Failed to produce valid step direction. \
                    Alpha {} is smaller than minimum allowed alpha {}.",
                    alpha, alpha_min
                )));
            } else {
                alpha_prev = alpha;
                alpha = alpha_iter.next().unwrap();
            }
        }

        Ok(alpha)
    }
}
