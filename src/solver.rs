use std::fmt;

use log::{debug, info, trace};

use crate::cars::TransitionModel;
use crate::error::{RentalError, Result};
use crate::policy::{ActionTable, Policy, ValueFunction};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct State {
    pub n1: u32,  // Number of cars at site #1 at start of day
    pub n2: u32,  // Number of cars at site #2 at start of day
}

impl State {
    pub fn new(n1: u32, n2: u32) -> State {
        State { n1, n2 }
    }

    /// Reject states outside `[0, cars_max]` on either lot.
    pub fn check(&self, cars_max: u32) -> Result<()> {
        if self.n1 > cars_max || self.n2 > cars_max {
            return Err(RentalError::StateOutOfRange { n1: self.n1, n2: self.n2, cars_max });
        }
        Ok(())
    }

    /// Position in the value and policy arrays.
    pub fn index(&self) -> [usize; 2] {
        [self.n1 as usize, self.n2 as usize]
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(n1: {}, n2: {})", self.n1, self.n2)
    }
}

/// Visits every state, ascending n1, then ascending n2.
///
/// Sweeps update values in place, so this order decides which neighbours a
/// backup sees already updated.
pub struct StateIterator {
    n1: u32,
    n2: u32,
    cars_max: u32,
}

impl StateIterator {
    pub fn new(cars_max: u32) -> StateIterator {
        StateIterator { n1: 0, n2: 0, cars_max }
    }
}

impl Iterator for StateIterator {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        if self.n1 > self.cars_max {
            return None;
        }
        let state = State { n1: self.n1, n2: self.n2 };
        if self.n2 < self.cars_max {
            self.n2 += 1;
        } else {
            self.n2 = 0;
            self.n1 += 1;
        }
        Some(state)
    }
}

/// Fixed parameters of one policy iteration run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Evaluation stops once a sweep changes no value by this much.
    pub theta: f64,
    /// Discount rate
    pub gamma: f64,
    /// Outer evaluate/improve budget.
    pub max_iterations: usize,
    /// Sweeps allowed in a single evaluation before giving up.
    pub max_sweeps: usize,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(self.theta.is_finite() && self.theta > 0.0) {
            return Err(RentalError::InvalidParameter {
                field: "theta",
                value: self.theta,
                reason: "convergence threshold must be positive",
            });
        }
        if !(0.0..1.0).contains(&self.gamma) {
            return Err(RentalError::InvalidParameter {
                field: "gamma",
                value: self.gamma,
                reason: "discount rate must lie in [0, 1)",
            });
        }
        if self.max_sweeps == 0 {
            return Err(RentalError::InvalidParameter {
                field: "max_sweeps",
                value: 0.0,
                reason: "evaluation needs at least one sweep",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Evaluating,
    Improving,
    /// An improvement sweep changed no action.
    Converged,
    /// The outer iteration budget ran out first.
    Exhausted,
}

/// Progress reported to the observer passed to [`Solver::run_with`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Sweep { iteration: usize, sweep: usize, delta: f64 },
    Evaluated { iteration: usize, sweeps: usize },
    Improved { iteration: usize, changed: usize, stable: bool },
}

/// Outcome of a policy iteration run.
#[derive(Debug, Clone)]
pub struct Solution {
    pub values: ValueFunction,
    pub policy: Policy,
    /// Policy at the start of each outer iteration, plus the improved policy
    /// after each iteration for models that record it.
    pub history: Vec<Policy>,
    /// Iteration at which the policy became stable, or `max_iterations` if it
    /// never did.
    pub stopped_at: usize,
    pub phase: Phase,
}

impl Solution {
    pub fn converged(&self) -> bool {
        self.phase == Phase::Converged
    }
}

/// Policy iteration over every state of the two lots.
pub struct Solver<M: TransitionModel> {
    model: M,
    actions: ActionTable,
    settings: Settings,
    states: Vec<State>,
    values: ValueFunction,
    policy: Policy,
    history: Vec<Policy>,
    phase: Phase,
    iteration: usize,
}

impl<M: TransitionModel> Solver<M> {
    /// Every starting action must be in the table and feasible at its state.
    pub fn new(
        model: M,
        actions: ActionTable,
        starting_policy: Policy,
        settings: Settings,
    ) -> Result<Solver<M>> {
        settings.validate()?;
        let cars_max = model.lots().cars_max;
        let states: Vec<State> = StateIterator::new(cars_max).collect();
        if starting_policy.cars_max != cars_max {
            return Err(RentalError::PolicyShape {
                expected: states.len(),
                found: starting_policy.as_array().len(),
            });
        }
        for s in &states {
            let transfer = actions.transfer(starting_policy.action(s))?;
            if !model.lots().is_feasible(s, transfer) {
                return Err(RentalError::InfeasibleAction { n1: s.n1, n2: s.n2, transfer });
            }
        }
        Ok(Solver {
            model,
            actions,
            settings,
            states,
            values: ValueFunction::zeros(cars_max),
            policy: starting_policy,
            history: Vec::new(),
            phase: Phase::Evaluating,
            iteration: 0,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn actions(&self) -> &ActionTable {
        &self.actions
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// States in sweep order.
    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn values(&self) -> &ValueFunction {
        &self.values
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn history(&self) -> &[Policy] {
        &self.history
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// One-step lookahead of `action` at `s` under the current values, or
    /// `None` if the action is infeasible there.
    ///
    /// Draws a scenario from the model like any backup does. For a sampling
    /// model with per-backup resampling this advances its random stream, so
    /// later seeded results differ from a run without the call.
    pub fn lookahead(&mut self, s: &State, action: usize) -> Result<Option<f64>> {
        self.values.get(s)?;
        let transfer = self.actions.transfer(action)?;
        let scenario = self.model.scenario();
        Ok(self.model.lookahead(&scenario, s, transfer, &self.values, self.settings.gamma))
    }

    /// Back up every state once under the current policy, in place.
    ///
    /// Returns the largest change to any state's value.
    pub fn evaluation_sweep(&mut self) -> Result<f64> {
        let gamma = self.settings.gamma;
        let mut delta: f64 = 0.0;
        for s in &self.states {
            let transfer = self.actions.transfer(self.policy.action(s))?;
            let scenario = self.model.scenario();
            let v = self
                .model
                .lookahead(&scenario, s, transfer, &self.values, gamma)
                .ok_or(RentalError::InfeasibleAction { n1: s.n1, n2: s.n2, transfer })?;
            let old = self.values.value(s);
            self.values.assign(s, v);
            delta = delta.max((old - v).abs());
        }
        Ok(delta)
    }

    /// Sweep until the largest change drops below theta. Returns the sweep count.
    pub fn policy_evaluation(&mut self) -> Result<usize> {
        self.evaluate(&mut |_: &Progress| {})
    }

    fn evaluate(&mut self, observer: &mut dyn FnMut(&Progress)) -> Result<usize> {
        self.phase = Phase::Evaluating;
        let iteration = self.iteration;
        let mut delta = f64::INFINITY;
        for sweep in 1..=self.settings.max_sweeps {
            delta = self.evaluation_sweep()?;
            trace!("iteration {} sweep {}: delta {:.6}", iteration, sweep, delta);
            observer(&Progress::Sweep { iteration, sweep, delta });
            if delta < self.settings.theta {
                debug!("iteration {}: policy evaluated in {} sweeps", iteration, sweep);
                observer(&Progress::Evaluated { iteration, sweeps: sweep });
                return Ok(sweep);
            }
        }
        Err(RentalError::EvaluationDiverged { sweeps: self.settings.max_sweeps, delta })
    }

    /// Make the policy greedy with respect to the current values.
    ///
    /// Only feasible actions compete. Ties go to the lowest action index.
    /// Returns true if no state changed its action.
    pub fn improvement_sweep(&mut self) -> bool {
        self.improve() == 0
    }

    fn improve(&mut self) -> usize {
        self.phase = Phase::Improving;
        let gamma = self.settings.gamma;
        let mut changed = 0;
        for s in &self.states {
            let scenario = self.model.scenario();
            let mut best: Option<(usize, f64)> = None;
            for (index, transfer) in self.actions.iter() {
                let Some(v) = self.model.lookahead(&scenario, s, transfer, &self.values, gamma)
                else {
                    continue;
                };
                if best.map_or(true, |(_, best_v)| v > best_v) {
                    best = Some((index, v));
                }
            }
            // The current action is feasible, so some action always wins.
            let Some((index, _)) = best else { continue };
            if index != self.policy.action(s) {
                self.policy.assign(s, index);
                changed += 1;
            }
        }
        debug!("iteration {}: {} states changed action", self.iteration, changed);
        changed
    }

    pub fn run(self) -> Result<Solution> {
        self.run_with(|_| {})
    }

    /// Alternate evaluation and improvement until the policy is stable or the
    /// iteration budget runs out.
    pub fn run_with(mut self, mut observer: impl FnMut(&Progress)) -> Result<Solution> {
        loop {
            if self.iteration >= self.settings.max_iterations {
                self.phase = Phase::Exhausted;
                info!("no stable policy after {} iterations", self.iteration);
                break;
            }
            self.history.push(self.policy.clone());
            self.model.begin_iteration();
            self.evaluate(&mut observer)?;
            let changed = self.improve();
            let stable = changed == 0;
            if M::SNAPSHOT_IMPROVED {
                self.history.push(self.policy.clone());
            }
            observer(&Progress::Improved { iteration: self.iteration, changed, stable });
            if stable {
                self.phase = Phase::Converged;
                info!("policy stable at iteration {}", self.iteration);
                break;
            }
            self.iteration += 1;
        }
        Ok(Solution {
            values: self.values,
            policy: self.policy,
            history: self.history,
            stopped_at: self.iteration,
            phase: self.phase,
        })
    }
}


#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::cars::{CarProbs, Empirical, Lots, Resample, Rewards};
    use crate::demand::{Customers, Demand, DemandModel, Rates};

    fn settings(max_iterations: usize) -> Settings {
        Settings { theta: 1e-3, gamma: 0.9, max_iterations, max_sweeps: 10_000 }
    }

    fn theoretical(cars_max: u32, max_iterations: usize) -> Solver<CarProbs> {
        let cprobs = CarProbs::new(
            Lots::new(cars_max),
            Rewards::new(10.0, -2.0),
            Rates::new(3.0, 3.0, 4.0, 2.0),
            12,
        )
        .unwrap();
        let actions = ActionTable::symmetric(cars_max).unwrap();
        let start = Policy::uniform(cars_max, actions.no_transfer().unwrap());
        Solver::new(cprobs, actions, start, settings(max_iterations)).unwrap()
    }

    fn fixed_day(cars_max: u32, day: Demand, gamma: f64) -> Solver<Empirical<Demand>> {
        let model = Empirical::new(Lots::new(cars_max), Rewards::new(10.0, -2.0), day, Resample::PerBackup);
        let actions = ActionTable::symmetric(cars_max).unwrap();
        let start = Policy::uniform(cars_max, actions.no_transfer().unwrap());
        let settings = Settings { gamma, ..settings(20) };
        Solver::new(model, actions, start, settings).unwrap()
    }

    #[test]
    fn iterate_states() {
        // Arrange
        let state_iter = StateIterator::new(2);
        let mut states: HashSet<State> = HashSet::new();
        // Act
        for s in state_iter {
            assert!(s.n1 <= 2);
            assert!(s.n2 <= 2);
            states.insert(s);
        }
        // Assert
        assert_eq!(states.len(), 9);
    }

    #[test]
    fn states_ascend_n1_then_n2() {
        let order: Vec<State> = StateIterator::new(1).collect();
        assert_eq!(
            order,
            vec![State::new(0, 0), State::new(0, 1), State::new(1, 0), State::new(1, 1)]
        );
    }

    #[test]
    fn bad_settings_are_rejected() {
        for bad in [
            Settings { theta: 0.0, ..settings(5) },
            Settings { theta: f64::NAN, ..settings(5) },
            Settings { gamma: 1.0, ..settings(5) },
            Settings { gamma: -0.1, ..settings(5) },
            Settings { max_sweeps: 0, ..settings(5) },
        ] {
            assert!(bad.validate().is_err());
        }
        assert!(settings(5).validate().is_ok());
    }

    #[test]
    fn infeasible_starting_policy_is_rejected() {
        // Arrange
        let model = Empirical::new(Lots::new(2), Rewards::new(10.0, -2.0), Demand::default(), Resample::PerBackup);
        let actions = ActionTable::symmetric(2).unwrap();
        // Act
        let result = Solver::new(model, actions, Policy::uniform(2, 4), settings(5));
        // Assert
        assert!(matches!(
            result,
            Err(RentalError::InfeasibleAction { n1: 0, n2: 0, transfer: 2 })
        ));
    }

    #[test]
    fn unknown_starting_action_is_rejected() {
        let model = Empirical::new(Lots::new(2), Rewards::new(10.0, -2.0), Demand::default(), Resample::PerBackup);
        let result = Solver::new(model, ActionTable::symmetric(1).unwrap(), Policy::uniform(2, 7), settings(5));
        assert!(matches!(result, Err(RentalError::InvalidAction { index: 7, len: 3 })));
    }

    #[test]
    fn mismatched_starting_policy_is_rejected() {
        let model = Empirical::new(Lots::new(2), Rewards::new(10.0, -2.0), Demand::default(), Resample::PerBackup);
        let result = Solver::new(model, ActionTable::symmetric(1).unwrap(), Policy::uniform(3, 1), settings(5));
        assert!(matches!(result, Err(RentalError::PolicyShape { expected: 9, found: 16 })));
    }

    #[test]
    fn sweep_uses_values_updated_earlier_in_the_same_sweep() {
        // Arrange
        let mut solver = fixed_day(1, Demand::new(1, 1, 1, 0), 0.5);
        // Act
        let delta = solver.evaluation_sweep().unwrap();
        // Assert
        let values = solver.values();
        assert_eq!(values.get(&State::new(0, 0)).unwrap(), 0.0);
        assert_eq!(values.get(&State::new(0, 1)).unwrap(), 10.0);
        assert_eq!(values.get(&State::new(1, 0)).unwrap(), 10.0);
        // (1, 1) rents both cars and lands on (1, 0), already worth 10.
        assert_eq!(values.get(&State::new(1, 1)).unwrap(), 25.0);
        assert_eq!(delta, 25.0);
    }

    #[test]
    fn evaluation_deltas_contract() {
        // Arrange
        let mut solver = theoretical(2, 5);
        let mut deltas = Vec::new();
        // Act
        for _ in 0..400 {
            let delta = solver.evaluation_sweep().unwrap();
            deltas.push(delta);
            if delta < 1e-9 {
                break;
            }
        }
        // Assert
        assert!(*deltas.last().unwrap() < 1e-9);
        for pair in deltas.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "delta grew: {:?}", pair);
        }
    }

    #[test]
    fn policy_evaluation_reports_sweeps() {
        let mut solver = theoretical(2, 5);
        let sweeps = solver.policy_evaluation().unwrap();
        assert!(sweeps > 1);
        assert!(solver.evaluation_sweep().unwrap() < 1e-3);
    }

    #[test]
    fn noisy_evaluation_hits_sweep_ceiling() {
        // Arrange
        let rates = Rates::new(3.0, 3.0, 4.0, 2.0);
        let model = Empirical::new(
            Lots::new(3),
            Rewards::new(10.0, -2.0),
            Customers::new(rates, Some(11)).unwrap(),
            Resample::PerBackup,
        );
        let actions = ActionTable::symmetric(3).unwrap();
        let start = Policy::uniform(3, actions.no_transfer().unwrap());
        let settings = Settings { max_sweeps: 50, ..settings(5) };
        let mut solver = Solver::new(model, actions, start, settings).unwrap();
        // Act
        let result = solver.policy_evaluation();
        // Assert
        assert!(matches!(result, Err(RentalError::EvaluationDiverged { sweeps: 50, .. })));
    }

    #[test]
    fn improvement_never_lowers_lookahead() {
        // Arrange
        let mut solver = theoretical(3, 5);
        solver.policy_evaluation().unwrap();
        let states = solver.states().to_vec();
        let mut before = Vec::new();
        for s in &states {
            let action = solver.policy().get(s).unwrap();
            before.push(solver.lookahead(s, action).unwrap().unwrap());
        }
        // Act
        solver.improvement_sweep();
        // Assert
        for (s, old) in states.iter().zip(before) {
            let action = solver.policy().get(s).unwrap();
            let transfer = solver.actions().transfer(action).unwrap();
            assert!(solver.model().lots.is_feasible(s, transfer));
            let new = solver.lookahead(s, action).unwrap().unwrap();
            assert!(new >= old, "state {} dropped from {} to {}", s, old, new);
        }
    }

    #[test]
    fn improvement_ties_keep_lowest_index() {
        // Arrange
        // Nothing happens and nothing is worth anything, except that moving
        // cars costs nothing either: every feasible transfer ties.
        let model = Empirical::new(Lots::new(2), Rewards::new(0.0, 0.0), Demand::default(), Resample::PerBackup);
        let actions = ActionTable::symmetric(2).unwrap();
        let start = Policy::uniform(2, 2);
        let mut solver = Solver::new(model, actions, start, settings(5)).unwrap();
        // Act
        let stable = solver.improvement_sweep();
        // Assert
        assert!(!stable);
        for s in StateIterator::new(2) {
            // Lowest feasible index is the largest move out of lot #2.
            let expected = 2 - s.n2 as usize;
            assert_eq!(solver.policy().get(&s).unwrap(), expected, "state {}", s);
        }
    }

    #[test]
    fn stable_policy_is_a_fixed_point() {
        // Arrange
        let mut solver = theoretical(3, 10);
        let mut stable = false;
        for _ in 0..10 {
            solver.policy_evaluation().unwrap();
            if solver.improvement_sweep() {
                stable = true;
                break;
            }
        }
        assert!(stable);
        let converged = solver.policy().clone();
        // Act
        solver.policy_evaluation().unwrap();
        let again = solver.improvement_sweep();
        // Assert
        assert!(again);
        assert_eq!(solver.policy(), &converged);
    }

    #[test]
    fn theoretical_runs_are_identical() {
        let a = theoretical(3, 10).run().unwrap();
        let b = theoretical(3, 10).run().unwrap();
        assert_eq!(a.values.as_array(), b.values.as_array());
        assert_eq!(a.policy, b.policy);
        assert_eq!(a.history, b.history);
        assert_eq!(a.stopped_at, b.stopped_at);
    }

    #[test]
    fn theoretical_history_records_start_and_improved() {
        let solution = theoretical(3, 10).run().unwrap();
        assert!(solution.converged());
        assert_eq!(solution.history.len(), 2 * (solution.stopped_at + 1));
        assert_eq!(solution.history.last(), Some(&solution.policy));
        assert_eq!(solution.history[0], Policy::uniform(3, 3));
    }

    #[test]
    fn zero_budget_is_exhausted() {
        let solution = theoretical(2, 0).run().unwrap();
        assert_eq!(solution.phase, Phase::Exhausted);
        assert_eq!(solution.stopped_at, 0);
        assert!(solution.history.is_empty());
    }

    #[test]
    fn fixed_demand_converges() {
        // Arrange
        let solver = fixed_day(2, Demand::new(1, 1, 2, 0), 0.9);
        // Act
        let solution = solver.run().unwrap();
        // Assert
        assert!(solution.converged());
        assert!(solution.stopped_at < 20);
        assert_eq!(solution.history.len(), solution.stopped_at + 1);
    }

    #[test]
    fn observer_sees_every_stage() {
        // Arrange
        let solver = theoretical(2, 10);
        let mut sweeps = 0;
        let mut evaluations = 0;
        let mut improvements = Vec::new();
        // Act
        let solution = solver
            .run_with(|p| match p {
                Progress::Sweep { .. } => sweeps += 1,
                Progress::Evaluated { .. } => evaluations += 1,
                Progress::Improved { stable, .. } => improvements.push(*stable),
            })
            .unwrap();
        // Assert
        assert_eq!(evaluations, solution.stopped_at + 1);
        assert_eq!(improvements.len(), evaluations);
        assert_eq!(improvements.last(), Some(&true));
        assert!(sweeps >= evaluations);
    }

    #[test]
    fn per_iteration_resample_converges_on_frozen_day() {
        // Arrange
        let rates = Rates::new(3.0, 3.0, 4.0, 2.0);
        let model = Empirical::new(
            Lots::new(3),
            Rewards::new(10.0, -2.0),
            Customers::new(rates, Some(5)).unwrap(),
            Resample::PerIteration,
        );
        let actions = ActionTable::symmetric(3).unwrap();
        let start = Policy::uniform(3, actions.no_transfer().unwrap());
        let mut solver = Solver::new(model, actions, start, settings(3)).unwrap();
        // Act
        let sweeps = solver.policy_evaluation();
        // Assert
        assert!(sweeps.is_ok());
    }

    #[test]
    fn per_iteration_day_is_drawn_before_first_iteration() {
        // Arrange
        let rates = Rates::new(3.0, 3.0, 4.0, 2.0);
        let day = Customers::new(rates, Some(5)).unwrap().sample();
        let model = Empirical::new(
            Lots::new(3),
            Rewards::new(10.0, -2.0),
            Customers::new(rates, Some(5)).unwrap(),
            Resample::PerIteration,
        );
        let actions = ActionTable::symmetric(3).unwrap();
        let start = Policy::uniform(3, actions.no_transfer().unwrap());
        let mut sampled = Solver::new(model, actions, start, settings(3)).unwrap();
        let mut fixed = fixed_day(3, day, 0.9);
        // Act
        sampled.policy_evaluation().unwrap();
        fixed.policy_evaluation().unwrap();
        // Assert
        assert_eq!(sampled.values(), fixed.values());
        if day.x1 + day.x2 > 0 {
            assert!(sampled.values().as_array().iter().any(|v| *v > 0.0));
        }
    }
}
