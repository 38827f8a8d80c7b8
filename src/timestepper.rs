//! Time stepping state and the time-stepping solve loop.
use crate::config::TimeSettings;
use crate::error::{Error, Result};
use crate::problem::Problem;
use eyre::eyre;
use galerkin_optimize::newton::{NewtonReport, NewtonStatus};
use log::{info, warn};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A snapshot of the time stepping state, handed to everything that depends on time.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeStep {
    pub step: usize,
    pub time: f64,
    pub dt: f64,
    pub n_step: usize,
}

impl TimeStep {
    /// The single step of a stationary problem.
    pub fn stationary() -> Self {
        Self {
            step: 0,
            time: 0.0,
            dt: 1.0,
            n_step: 1,
        }
    }
}

impl Default for TimeStep {
    fn default() -> Self {
        Self::stationary()
    }
}

/// Uniform time stepping over `[t0, t1]` with `n_step` time levels.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStepper {
    t0: f64,
    t1: f64,
    dt: f64,
    n_step: usize,
    step: usize,
    time: f64,
}

impl TimeStepper {
    pub fn new(t0: f64, t1: f64, n_step: usize) -> eyre::Result<Self> {
        if n_step == 0 {
            return Err(eyre!("number of time steps must be positive"));
        }
        if !(t1 >= t0) {
            return Err(eyre!("final time {} precedes initial time {}", t1, t0));
        }
        let dt = if n_step > 1 {
            (t1 - t0) / (n_step - 1) as f64
        } else {
            t1 - t0
        };
        Ok(Self {
            t0,
            t1,
            dt,
            n_step,
            step: 0,
            time: t0,
        })
    }

    pub fn stationary() -> Self {
        Self {
            t0: 0.0,
            t1: 1.0,
            dt: 1.0,
            n_step: 1,
            step: 0,
            time: 0.0,
        }
    }

    pub fn from_settings(settings: &TimeSettings) -> eyre::Result<Self> {
        Self::new(settings.t0, settings.t1, settings.n_step)
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn n_step(&self) -> usize {
        self.n_step
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }

    pub fn t1(&self) -> f64 {
        self.t1
    }

    pub fn is_last_step(&self) -> bool {
        self.step + 1 >= self.n_step
    }

    pub fn time_step(&self) -> TimeStep {
        TimeStep {
            step: self.step,
            time: self.time,
            dt: self.dt,
            n_step: self.n_step,
        }
    }

    /// Moves to the next step. Returns `false` without changing anything if already at the last one.
    pub fn advance(&mut self) -> bool {
        if self.is_last_step() {
            return false;
        }
        self.set_time_level(self.step + 1);
        true
    }

    /// Jumps to step `step` without replaying the steps in between.
    pub fn set_step(&mut self, step: usize) -> eyre::Result<()> {
        if step >= self.n_step {
            return Err(eyre!(
                "step {} is out of range, there are {} steps",
                step,
                self.n_step
            ));
        }
        self.set_time_level(step);
        Ok(())
    }

    fn set_time_level(&mut self, step: usize) {
        self.step = step;
        // Evaluate from t0 to avoid accumulating round-off, and land exactly on t1
        self.time = if step + 1 == self.n_step && self.n_step > 1 {
            self.t1
        } else {
            self.t0 + step as f64 * self.dt
        };
    }

    /// Iterates over the remaining steps, starting with the current one.
    pub fn iter_from_current(&self) -> impl Iterator<Item = TimeStep> {
        let mut stepper = self.clone();
        let mut done = false;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            let ts = stepper.time_step();
            done = !stepper.advance();
            Some(ts)
        })
    }
}

impl Default for TimeStepper {
    fn default() -> Self {
        Self::stationary()
    }
}

/// Solves a problem at every step of a time stepper.
///
/// The state history is seeded with the initial state. Each step then updates the problem to the
/// step's time, solves starting from the previous solution, reports the result to a hook and
/// finally makes the solution the most recent history entry.
#[derive(Debug, Clone)]
pub struct TimeSteppingSolver {
    stepper: TimeStepper,
    accept_unconverged: bool,
}

impl TimeSteppingSolver {
    pub fn new(stepper: TimeStepper) -> Self {
        Self {
            stepper,
            accept_unconverged: false,
        }
    }

    /// A solver for the time interval configured in the problem options.
    pub fn for_problem(problem: &Problem) -> Result<Self> {
        Ok(Self::new(problem.default_time_stepper(None)?)
            .with_accept_unconverged(problem.options().accept_unconverged))
    }

    /// Continue with the next step when a step stops at the iteration limit, instead of failing.
    pub fn with_accept_unconverged(mut self, accept: bool) -> Self {
        self.accept_unconverged = accept;
        self
    }

    pub fn stepper(&self) -> &TimeStepper {
        &self.stepper
    }

    /// Runs all remaining steps and returns the final full state.
    ///
    /// The hook is called after every step with the time step, the full solution and the Newton
    /// report of that step.
    pub fn run<H>(&mut self, problem: &mut Problem, state0: &DVector<f64>, mut hook: H) -> Result<DVector<f64>>
    where
        H: FnMut(&TimeStep, &DVector<f64>, &NewtonReport<f64>),
    {
        let mut state = state0.clone();
        let mut first = true;
        loop {
            let ts = self.stepper.time_step();
            info!("Time step {} of {}: t = {}", ts.step + 1, ts.n_step, ts.time);
            problem.time_update(ts, false)?;
            problem.apply_ebc(&mut state)?;
            if first {
                // The initial condition is the previous state of the first step
                problem.init_history(&state);
                first = false;
            }

            let (solution, report) = problem.solve(&state)?;
            match report.status {
                NewtonStatus::Converged => {}
                NewtonStatus::MaximumIterationsReached if self.accept_unconverged => {
                    warn!(
                        "Time step {} stopped after {} iterations without converging",
                        ts.step, report.iterations
                    );
                }
                NewtonStatus::MaximumIterationsReached => {
                    return Err(Error::NotConverged { step: ts.step, report });
                }
                NewtonStatus::Cancelled => {
                    return Err(eyre!("time step {} was cancelled", ts.step).into());
                }
            }

            hook(&ts, &solution, &report);
            problem.advance(&solution);
            state = solution;

            if !self.stepper.advance() {
                break;
            }
        }
        Ok(state)
    }
}
