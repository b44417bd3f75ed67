//! Update coordination: one-shot units and the bounded worker queue.

mod queue;
mod unit;

pub use queue::{UpdateFn, UpdateQueue};
pub use unit::{UnitState, UpdateResult, UpdateUnit};
