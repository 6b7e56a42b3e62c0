//! KPI computation and governance engine.
//!
//! Defines measurable project indicators, computes their values from typed
//! data snapshots under per-project governance flags, and manages how
//! indicators become active on a project through templates and curated
//! packs. The engine is synchronous and stateless across calls; persistence
//! goes through [`db::Database`], snapshot data comes in through
//! [`orchestrator::SnapshotProvider`].

pub mod calculators;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod packs;
pub mod registry;

pub use calculators::ENGINE_VERSION;
pub use db::Database;
pub use errors::{EngineError, EngineResult};
pub use orchestrator::{run_compute, SnapshotProvider};
