//! Database module: entity models and SQL repositories.
//!
//! Split into two submodules:
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `prayer_dispatch::db` — the
//! repository API is re-exported here.

pub mod model;
pub mod repo;

pub use model::RunRecord;
pub use repo::*;
