// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{Catalog, RawCatalogFile};
use crate::errors::Result;

/// Load a catalog file from a given path and return the raw `RawCatalogFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (parameter schemas, trigger cycles). Use [`load_and_validate`]
/// for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawCatalogFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawCatalogFile = toml::from_str(&contents)?;
    Ok(raw)
}

/// Parse and validate a catalog held in memory.
pub fn load_from_str(contents: &str) -> Result<Catalog> {
    let raw: RawCatalogFile = toml::from_str(contents)?;
    Catalog::try_from(raw)
}

/// Load a catalog from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks job names, parameter schemas and nested trigger cycles.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Catalog> {
    let raw = load_from_path(&path)?;
    Catalog::try_from(raw)
}
