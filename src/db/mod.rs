//! Database module: write payloads and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: insert/update payloads accepted by repositories.
//! - `repo`: SQL-only functions that map rows into the entities of
//!   [`crate::model`].
//!
//! Callers import from `clipcast::db`; the repository API is re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewProject, NewRun, NewUnit, ScheduleUpdate};
