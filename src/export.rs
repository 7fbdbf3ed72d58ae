use std::io;

use serde::Serialize;

use crate::error::Result;
use crate::policy::{ActionTable, Policy, ValueFunction};
use crate::solver::StateIterator;

#[derive(Serialize)]
struct ValueRow {
    n1: u32,
    n2: u32,
    value: f64,
}

#[derive(Serialize)]
struct PolicyRow {
    snapshot: usize,
    n1: u32,
    n2: u32,
    action: usize,
    transfer: i32,
}

/// Write one `n1,n2,value` row per state.
pub fn write_values<W: io::Write>(writer: W, values: &ValueFunction) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for s in StateIterator::new(values.cars_max) {
        wtr.serialize(ValueRow { n1: s.n1, n2: s.n2, value: values.get(&s)? })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write the final policy as snapshot 0.
pub fn write_policy<W: io::Write>(writer: W, policy: &Policy, actions: &ActionTable) -> Result<()> {
    write_history(writer, std::slice::from_ref(policy), actions)
}

/// Write every state of every snapshot, numbered in history order.
pub fn write_history<W: io::Write>(
    writer: W,
    history: &[Policy],
    actions: &ActionTable,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for (snapshot, policy) in history.iter().enumerate() {
        for s in StateIterator::new(policy.cars_max) {
            let action = policy.get(&s)?;
            wtr.serialize(PolicyRow {
                snapshot,
                n1: s.n1,
                n2: s.n2,
                action,
                transfer: actions.transfer(action)?,
            })?;
        }
    }
    wtr.flush()?;
    Ok(())
}
