// src/config/mod.rs

//! Job catalog loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a catalog file from disk (`loader.rs`).
//! - Validate parameter schemas and the nested trigger graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    AccessSection, Catalog, CatalogJob, GrantConfig, JobConfig, ParameterConfig, ParameterType,
    PermissionName, QueueSection, RawCatalogFile,
};
pub use validate::parse_duration;
