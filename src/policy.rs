use ndarray::Array2;

use crate::error::{RentalError, Result};
use crate::solver::State;

/// Overnight transfers available to the operator.
///
/// Entry `i` is the number of cars moved when action `i` is chosen. When
/// positive, cars move from location #1 to location #2. When negative, cars
/// move from location #2 to location #1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTable {
    transfers: Vec<i32>,
}

impl ActionTable {
    pub fn new(transfers: Vec<i32>) -> Result<ActionTable> {
        if transfers.is_empty() {
            return Err(RentalError::InvalidParameter {
                field: "actions",
                value: 0.0,
                reason: "action table must hold at least one transfer",
            });
        }
        Ok(ActionTable { transfers })
    }

    /// Every transfer from `-max_move` to `max_move`, ascending.
    pub fn symmetric(max_move: u32) -> Result<ActionTable> {
        let max_move = i32::try_from(max_move).map_err(|_| RentalError::InvalidParameter {
            field: "max_move",
            value: max_move as f64,
            reason: "transfer does not fit in an i32",
        })?;
        Ok(ActionTable { transfers: (-max_move..=max_move).collect() })
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Transfer for an action index, rejecting indices outside the table.
    pub fn transfer(&self, index: usize) -> Result<i32> {
        self.transfers.get(index).copied().ok_or(RentalError::InvalidAction {
            index,
            len: self.transfers.len(),
        })
    }

    /// Index of the first action that moves no cars.
    pub fn no_transfer(&self) -> Option<usize> {
        self.transfers.iter().position(|t| *t == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, i32)> + '_ {
        self.transfers.iter().copied().enumerate()
    }

    pub fn transfers(&self) -> &[i32] {
        &self.transfers
    }
}

/// Action index chosen at each state. Indexes: cars at loc #1, cars at loc #2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub cars_max: u32,
    actions: Array2<usize>,
}

impl Policy {
    /// Policy that picks the same action everywhere.
    pub fn uniform(cars_max: u32, action: usize) -> Policy {
        let dim = cars_max as usize + 1;
        Policy { cars_max, actions: Array2::from_elem((dim, dim), action) }
    }

    pub fn from_array(cars_max: u32, actions: Array2<usize>) -> Result<Policy> {
        let dim = cars_max as usize + 1;
        if actions.dim() != (dim, dim) {
            return Err(RentalError::PolicyShape {
                expected: dim * dim,
                found: actions.len(),
            });
        }
        Ok(Policy { cars_max, actions })
    }

    pub fn get(&self, s: &State) -> Result<usize> {
        s.check(self.cars_max)?;
        Ok(self.action(s))
    }

    pub fn set(&mut self, s: &State, action: usize) -> Result<()> {
        s.check(self.cars_max)?;
        self.actions[s.index()] = action;
        Ok(())
    }

    /// Unchecked lookup for states produced by the solver's own state iterator.
    pub(crate) fn action(&self, s: &State) -> usize {
        self.actions[s.index()]
    }

    pub(crate) fn assign(&mut self, s: &State, action: usize) {
        self.actions[s.index()] = action;
    }

    pub fn as_array(&self) -> &Array2<usize> {
        &self.actions
    }

    /// Transfers chosen at each state.
    pub fn transfers(&self, table: &ActionTable) -> Result<Array2<i32>> {
        let mut transfers = Array2::<i32>::zeros(self.actions.dim());
        for (t, action) in transfers.iter_mut().zip(self.actions.iter()) {
            *t = table.transfer(*action)?;
        }
        Ok(transfers)
    }
}

/// Expected discounted return from each state under the current policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFunction {
    pub cars_max: u32,
    values: Array2<f64>,
}

impl ValueFunction {
    pub fn zeros(cars_max: u32) -> ValueFunction {
        let dim = cars_max as usize + 1;
        ValueFunction { cars_max, values: Array2::zeros((dim, dim)) }
    }

    pub fn get(&self, s: &State) -> Result<f64> {
        s.check(self.cars_max)?;
        Ok(self.value(s))
    }

    pub(crate) fn value(&self, s: &State) -> f64 {
        self.values[s.index()]
    }

    pub(crate) fn assign(&mut self, s: &State, value: f64) {
        self.values[s.index()] = value;
    }

    pub fn as_array(&self) -> &Array2<f64> {
        &self.values
    }
}
