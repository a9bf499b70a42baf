//! Snapshot document migrations.
//!
//! Migrations run on the raw JSON value before it is decoded into
//! [`StateGraph`](crate::models::StateGraph). The document's top-level
//! `schema_version` decides which steps still apply; a document without the
//! field predates versioning and counts as version 1.

pub mod v002_versioned_layout;

use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Current schema version. Bump this and add a new migration module whenever
/// the document layout changes.
pub const CURRENT_VERSION: u32 = 2;

/// Version assumed for documents without a `schema_version` field.
const LEGACY_VERSION: u32 = 1;

/// Schema version recorded in `doc`.
pub fn document_version(doc: &Map<String, Value>) -> Result<u32> {
    match doc.get("schema_version") {
        None => Ok(LEGACY_VERSION),
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| StoreError::Migration(format!("invalid schema_version: {v}"))),
    }
}

/// Bring `doc` up to [`CURRENT_VERSION`] in place.
///
/// Returns the version the document had before migrating. A document newer
/// than this build is rejected and left untouched.
pub fn run_migrations(doc: &mut Value) -> Result<u32> {
    let map = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::Migration("document root is not an object".into()))?;

    let current = document_version(map)?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking snapshot migrations"
    );

    if current > CURRENT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: current,
            supported: CURRENT_VERSION,
        });
    }

    if current < 2 {
        tracing::info!("applying migration v002_versioned_layout");
        v002_versioned_layout::up(map)?;
        map.insert("schema_version".into(), Value::from(2u32));
    }

    Ok(current)
}
