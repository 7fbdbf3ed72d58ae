//! Policy iteration for Jack's car rental problem (Sutton and Barto, example 4.2).
//!
//! Two lots rent out and take back cars each day with Poisson demand. Each
//! night the operator may move cars between them at a cost. [`solver::Solver`]
//! finds the transfer policy that maximizes discounted rental income, using
//! either the exact truncated-Poisson model ([`cars::CarProbs`]) or sampled
//! days ([`cars::Empirical`]).

pub mod cars;
pub mod config;
pub mod demand;
pub mod error;
pub mod export;
pub mod policy;
pub mod solver;

pub use error::{RentalError, Result};
