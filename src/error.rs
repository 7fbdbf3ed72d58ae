use thiserror::Error;

/// Errors raised while configuring or running the car rental solver.
#[derive(Debug, Error)]
pub enum RentalError {
    #[error("{field} is invalid (got {value}): {reason}")]
    InvalidParameter {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },
    #[error("action index {index} is outside the action table (len {len})")]
    InvalidAction { index: usize, len: usize },
    #[error("state (n1: {n1}, n2: {n2}) is outside the lot capacity {cars_max}")]
    StateOutOfRange { n1: u32, n2: u32, cars_max: u32 },
    #[error("policy covers {found} states but the state space has {expected}")]
    PolicyShape { expected: usize, found: usize },
    #[error("transfer of {transfer} cars is infeasible at (n1: {n1}, n2: {n2})")]
    InfeasibleAction { n1: u32, n2: u32, transfer: i32 },
    #[error("policy evaluation did not converge after {sweeps} sweeps (last delta {delta:.6})")]
    EvaluationDiverged { sweeps: usize, delta: f64 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RentalError>;
