use std::path::Path;

use config_file::FromConfigFile;
use log::info;
use serde::Deserialize;

use crate::cars::{CarProbs, Empirical, Lots, Resample, Rewards};
use crate::demand::{Customers, Rates};
use crate::error::{RentalError, Result};
use crate::policy::{ActionTable, Policy};
use crate::solver::{Progress, Settings, Solution, Solver};

/// How transition probabilities are obtained.
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Exact expectation over truncated Poisson days.
    #[default]
    Theoretical,
    /// Sampled days.
    Empirical,
}

/// Hold information read from TOML configuration file.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CarConfig {
    pub cars_max: u32,
    /// Largest transfer in either direction; ignored when `actions` is set.
    pub max_move: Option<u32>,
    /// Explicit transfer table.
    pub actions: Option<Vec<i32>>,
    pub rent_mean1: f64,
    pub return_mean1: f64,
    pub rent_mean2: f64,
    pub return_mean2: f64,
    pub rental_reward: f64,
    pub transfer_reward: f64,
    pub theta: f64,
    pub gamma: f64,
    pub max_iterations: usize,
    #[serde(default = "CarConfig::default_truncation")]
    pub truncation: usize,
    #[serde(default = "CarConfig::default_max_sweeps")]
    pub max_sweeps: usize,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub resample: Resample,
    pub seed: Option<u64>,
}

impl CarConfig {
    fn default_truncation() -> usize {
        12
    }

    fn default_max_sweeps() -> usize {
        10_000
    }

    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<CarConfig> {
        info!("Reading config file: {}", path.display());
        let config = CarConfig::from_config_file(path)
            .map_err(|e| RentalError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rates().validate()?;
        self.settings().validate()?;
        if self.truncation == 0 {
            return Err(RentalError::InvalidParameter {
                field: "truncation",
                value: 0.0,
                reason: "truncation bound must be at least 1",
            });
        }
        for (field, value) in [
            ("rental_reward", self.rental_reward),
            ("transfer_reward", self.transfer_reward),
        ] {
            if !value.is_finite() {
                return Err(RentalError::InvalidParameter {
                    field,
                    value,
                    reason: "reward must be finite",
                });
            }
        }
        if let Some(max_move) = self.max_move {
            if max_move > self.cars_max {
                return Err(RentalError::InvalidParameter {
                    field: "max_move",
                    value: max_move as f64,
                    reason: "cannot move more cars than a lot holds",
                });
            }
        }
        let actions = self.action_table()?;
        self.starting_policy(&actions)?;
        Ok(())
    }

    pub fn rates(&self) -> Rates {
        Rates::new(self.rent_mean1, self.return_mean1, self.rent_mean2, self.return_mean2)
    }

    pub fn rewards(&self) -> Rewards {
        Rewards::new(self.rental_reward, self.transfer_reward)
    }

    pub fn lots(&self) -> Lots {
        Lots::new(self.cars_max)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            theta: self.theta,
            gamma: self.gamma,
            max_iterations: self.max_iterations,
            max_sweeps: self.max_sweeps,
        }
    }

    /// Explicit `actions`, else `[-max_move, max_move]`, else every transfer up to `cars_max`.
    pub fn action_table(&self) -> Result<ActionTable> {
        match (&self.actions, self.max_move) {
            (Some(actions), _) => ActionTable::new(actions.clone()),
            (None, Some(max_move)) => ActionTable::symmetric(max_move),
            (None, None) => ActionTable::symmetric(self.cars_max),
        }
    }

    /// Move no cars anywhere.
    pub fn starting_policy(&self, actions: &ActionTable) -> Result<Policy> {
        let index = actions.no_transfer().ok_or(RentalError::InvalidParameter {
            field: "actions",
            value: 0.0,
            reason: "action table needs a zero transfer for the starting policy",
        })?;
        Ok(Policy::uniform(self.cars_max, index))
    }

    pub fn theoretical_solver(&self) -> Result<Solver<CarProbs>> {
        let cprobs = CarProbs::new(self.lots(), self.rewards(), self.rates(), self.truncation)?;
        let actions = self.action_table()?;
        let start = self.starting_policy(&actions)?;
        Solver::new(cprobs, actions, start, self.settings())
    }

    pub fn empirical_solver(&self) -> Result<Solver<Empirical<Customers>>> {
        let customers = Customers::new(self.rates(), self.seed)?;
        let model = Empirical::new(self.lots(), self.rewards(), customers, self.resample);
        let actions = self.action_table()?;
        let start = self.starting_policy(&actions)?;
        Solver::new(model, actions, start, self.settings())
    }

    /// Run policy iteration in the configured mode.
    pub fn solve(&self, observer: impl FnMut(&Progress)) -> Result<Solution> {
        match self.mode {
            Mode::Theoretical => self.theoretical_solver()?.run_with(observer),
            Mode::Empirical => self.empirical_solver()?.run_with(observer),
        }
    }
}
