// src/config/mod.rs

//! Plan file loading and validation.
//!
//! - `model.rs` is the TOML-backed data model.
//! - `loader.rs` reads a plan from disk.
//! - `validate.rs` turns a raw plan into a checked [`PlanFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_plan_path, load_and_validate, load_from_path};
pub use model::{JobConfig, PlanFile, PlanSection, RawPlanFile, TokenConfig};
