use std::cmp;

use serde::Deserialize;

use crate::demand::{Demand, DemandModel, Rates, TruncatedPoisson};
use crate::error::Result;
use crate::policy::ValueFunction;
use crate::solver::State;

/// Per-car rewards. Negative values are costs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rewards {
    /// Income for each car rented
    pub rental: f64,
    /// Reward for each car moved overnight, e.g. -2.0 for a cost of 2
    pub transfer: f64,
}

impl Rewards {
    pub fn new(rental: f64, transfer: f64) -> Rewards {
        Rewards { rental, transfer }
    }

    /// Calculate the reward given the number of cars rented and the transfer.
    pub fn reward(&self, rented: u32, transfer: i32) -> f64 {
        self.rental * rented as f64 + self.transfer * transfer.unsigned_abs() as f64
    }
}

/// Rules for the two rental lots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lots {
    /// Maximum number of cars that can be kept at either location
    pub cars_max: u32,
}

impl Lots {
    pub fn new(cars_max: u32) -> Lots {
        Lots { cars_max }
    }

    /// Can't move more cars than are at the source lot.
    ///
    /// When `transfer` is positive, cars leave location #1. When negative,
    /// cars leave location #2.
    pub fn is_feasible(&self, s: &State, transfer: i32) -> bool {
        let source = if transfer >= 0 { s.n1 } else { s.n2 };
        transfer.unsigned_abs() <= source
    }

    /// Simulate one day: rent, move cars overnight, take returns, then clamp.
    ///
    /// Returns the total number of cars rented and the next state, or `None`
    /// if the transfer is infeasible at `s`. Rentals are filled from the cars
    /// on the lot at the start of the day. The transfer then moves at most
    /// the cars left at the source lot. Excess cars at either lot are lost.
    pub fn day(&self, s: &State, transfer: i32, demand: &Demand) -> Option<(u32, State)> {
        if !self.is_feasible(s, transfer) {
            return None;
        }
        let rented1 = cmp::min(demand.x1, s.n1);
        let rented2 = cmp::min(demand.x2, s.n2);
        let mut left1 = s.n1 - rented1;
        let mut left2 = s.n2 - rented2;
        if transfer >= 0 {
            let moved = cmp::min(transfer.unsigned_abs(), left1);
            left1 -= moved;
            left2 += moved;
        } else {
            let moved = cmp::min(transfer.unsigned_abs(), left2);
            left2 -= moved;
            left1 += moved;
        }
        let next = State {
            n1: cmp::min(left1 + demand.y1, self.cars_max),
            n2: cmp::min(left2 + demand.y2, self.cars_max),
        };
        Some((rented1 + rented2, next))
    }
}

/// One-step lookahead for a (state, transfer) pair under a value function.
///
/// A scenario carries whatever a model needs to back up one state: a sampled
/// day for the empirical model, nothing for the exact one. Every action
/// considered at a state during an improvement sweep shares one scenario.
pub trait TransitionModel {
    type Scenario;

    /// Whether the policy is also recorded into history after improvement.
    const SNAPSHOT_IMPROVED: bool = false;

    fn lots(&self) -> &Lots;

    /// Called once at the start of each outer policy iteration.
    fn begin_iteration(&mut self) {}

    fn scenario(&mut self) -> Self::Scenario;

    /// Value of taking `transfer` at `s`, or `None` if the transfer is
    /// infeasible there.
    fn lookahead(
        &self,
        scenario: &Self::Scenario,
        s: &State,
        transfer: i32,
        values: &ValueFunction,
        gamma: f64,
    ) -> Option<f64>;
}

/// When the empirical model draws a new day of customer activity.
///
/// With `PerBackup` every backup sees a different day, so the largest change
/// in a sweep never settles below a small `theta` once the Poisson rates are
/// non-zero. Evaluation then stops at `max_sweeps` with
/// [`RentalError::EvaluationDiverged`](crate::RentalError::EvaluationDiverged).
/// `PerIteration` freezes one day for a whole evaluation and converges.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Resample {
    /// A fresh day for every state backup.
    #[default]
    #[serde(rename = "backup")]
    PerBackup,
    /// One day per outer iteration, shared by every state.
    #[serde(rename = "iteration")]
    PerIteration,
}

/// Transition model driven by sampled days.
pub struct Empirical<D: DemandModel> {
    pub lots: Lots,
    pub rewards: Rewards,
    pub resample: Resample,
    demand: D,
    today: Demand,
}

impl<D: DemandModel> Empirical<D> {
    /// With `PerIteration`, the first day is drawn here so the model is usable
    /// before [`TransitionModel::begin_iteration`] is ever called.
    pub fn new(lots: Lots, rewards: Rewards, mut demand: D, resample: Resample) -> Empirical<D> {
        let today = match resample {
            Resample::PerBackup => Demand::default(),
            Resample::PerIteration => demand.sample(),
        };
        Empirical { lots, rewards, resample, demand, today }
    }

    /// Reward and next state for one day, or `None` if the transfer is infeasible.
    pub fn transition(&self, s: &State, transfer: i32, demand: &Demand) -> Option<(f64, State)> {
        let (rented, next) = self.lots.day(s, transfer, demand)?;
        Some((self.rewards.reward(rented, transfer), next))
    }
}

impl<D: DemandModel> TransitionModel for Empirical<D> {
    type Scenario = Demand;

    fn lots(&self) -> &Lots {
        &self.lots
    }

    fn begin_iteration(&mut self) {
        if self.resample == Resample::PerIteration {
            self.today = self.demand.sample();
        }
    }

    fn scenario(&mut self) -> Demand {
        match self.resample {
            Resample::PerBackup => self.demand.sample(),
            Resample::PerIteration => self.today,
        }
    }

    fn lookahead(
        &self,
        demand: &Demand,
        s: &State,
        transfer: i32,
        values: &ValueFunction,
        gamma: f64,
    ) -> Option<f64> {
        let (reward, next) = self.transition(s, transfer, demand)?;
        Some(reward + gamma * values.value(&next))
    }
}

/// Car rental and return probabilities.
///
/// Precalculate truncated Poisson probabilities when object is constructed.
/// Indices to probability tables x1, y1, x2, and y2 are the number of cars
/// requested or returned, over `0..truncation`.
pub struct CarProbs {
    pub lots: Lots,
    pub rewards: Rewards,
    /// Loc 1 request probs
    pub x1: TruncatedPoisson,
    /// Loc 1 return probs
    pub y1: TruncatedPoisson,
    /// Loc 2 request probs
    pub x2: TruncatedPoisson,
    /// Loc 2 return probs
    pub y2: TruncatedPoisson,
}

impl CarProbs {
    pub fn new(lots: Lots, rewards: Rewards, rates: Rates, truncation: usize) -> Result<CarProbs> {
        Ok(CarProbs {
            lots,
            rewards,
            x1: TruncatedPoisson::new("rent_mean1", rates.rent_mean1, truncation)?,
            y1: TruncatedPoisson::new("return_mean1", rates.return_mean1, truncation)?,
            x2: TruncatedPoisson::new("rent_mean2", rates.rent_mean2, truncation)?,
            y2: TruncatedPoisson::new("return_mean2", rates.return_mean2, truncation)?,
        })
    }

    pub fn truncation(&self) -> usize {
        self.x1.bound()
    }

    /// Joint probability of one day; the four counts are independent.
    pub fn outcome_prob(&self, demand: &Demand) -> f64 {
        self.x1.pmf(demand.x1 as usize)
            * self.y1.pmf(demand.y1 as usize)
            * self.x2.pmf(demand.x2 as usize)
            * self.y2.pmf(demand.y2 as usize)
    }

    /// Expected reward plus discounted next-state value over every truncated
    /// day, or `None` if the transfer is infeasible at `s`.
    pub fn expected_value(
        &self,
        s: &State,
        transfer: i32,
        values: &ValueFunction,
        gamma: f64,
    ) -> Option<f64> {
        if !self.lots.is_feasible(s, transfer) {
            return None;
        }
        let k = self.truncation() as u32;
        let mut value = 0.0;
        for x1 in 0..k {
            let p_x1 = self.x1.pmf(x1 as usize);
            for x2 in 0..k {
                let p_x = p_x1 * self.x2.pmf(x2 as usize);
                for y1 in 0..k {
                    let p_xy1 = p_x * self.y1.pmf(y1 as usize);
                    for y2 in 0..k {
                        let prob = p_xy1 * self.y2.pmf(y2 as usize);
                        let demand = Demand { x1, y1, x2, y2 };
                        let (rented, next) = self.lots.day(s, transfer, &demand)?;
                        let r = self.rewards.reward(rented, transfer);
                        value += prob * (r + gamma * values.value(&next));
                    }
                }
            }
        }
        Some(value)
    }

    /// Expected immediate reward, ignoring what happens after the day.
    pub fn expected_reward(&self, s: &State, transfer: i32) -> Option<f64> {
        let zeros = ValueFunction::zeros(self.lots.cars_max);
        self.expected_value(s, transfer, &zeros, 0.0)
    }
}

impl TransitionModel for CarProbs {
    type Scenario = ();

    const SNAPSHOT_IMPROVED: bool = true;

    fn lots(&self) -> &Lots {
        &self.lots
    }

    fn scenario(&mut self) {}

    fn lookahead(
        &self,
        _: &(),
        s: &State,
        transfer: i32,
        values: &ValueFunction,
        gamma: f64,
    ) -> Option<f64> {
        self.expected_value(s, transfer, values, gamma)
    }
}
