//! Aggregate-scoped accessors over `Store`, grouped by aggregate the
//! way SQL queries are grouped by table (`queries::plans`,
//! `queries::tasks`, `queries::workers`, `queries::queue`).

pub mod plans;
pub mod queue;
pub mod tasks;
pub mod workers;
