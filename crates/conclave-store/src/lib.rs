//! Persistence layer for the orchestrator's two workspace-relative state
//! files. This crate plays the role a `*-db` crate plays in a typical
//! multi-crate service: it owns the data model (`models`), a
//! connection-less "pool" equivalent (`Store`), and query-style async
//! functions grouped by aggregate (`queries::plans`, `queries::tasks`,
//! `queries::workers`, `queries::queue`) -- except the backing store is a
//! pair of JSON files rather than a SQL database, per the single-process,
//! no-durable-exactly-once-messaging non-goals.

pub mod models;
pub mod paths;
pub mod persistence;
pub mod queries;
pub mod store;

pub use paths::StorePaths;
pub use store::Store;
