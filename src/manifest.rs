// src/manifest.rs

//! Bundle manifest extraction
//!
//! A candidate directory identifies itself through `sce_sys/param.json`.
//! Only a few scalar fields are ever needed: the title id (primary key
//! spelling `titleId`, legacy spelling `title_id`) and a display name
//! resolved through a fixed fallback chain:
//!
//! 1. `localizedParameters."en-US".titleName`
//! 2. top-level `titleName`
//! 3. the title id itself
//!
//! Extraction also attempts a best-effort repair of the
//! `applicationDrmType` compatibility field, coercing it to `"standard"`
//! so dumps produced by other tooling register cleanly. The repair is
//! idempotent and its failure never blocks extraction.

use crate::config::MANIFEST_RELATIVE;
use crate::{Error, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Safe value the DRM compatibility field is coerced to
const DRM_TYPE_STANDARD: &str = "standard";

/// Locale section consulted first for the display name
const NAME_LOCALE: &str = "en-US";

/// Identifying metadata extracted from a bundle manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleMeta {
    pub title_id: String,
    pub title_name: String,
}

/// Extract title id and display name from the manifest inside `dir`
///
/// Returns `Error::ManifestNotFound` when the manifest is missing, empty,
/// unparseable, or carries no title id under either key spelling.
pub fn extract(dir: &Path) -> Result<TitleMeta> {
    let manifest_path = dir.join(MANIFEST_RELATIVE);

    if let Err(e) = repair_drm_type(&manifest_path) {
        debug!(path = %manifest_path.display(), "drm repair skipped: {e}");
    }

    let not_found = || Error::ManifestNotFound(dir.to_path_buf());

    let contents = fs::read_to_string(&manifest_path).map_err(|_| not_found())?;
    if contents.trim().is_empty() {
        return Err(not_found());
    }
    let doc: Value = serde_json::from_str(&contents).map_err(|_| not_found())?;

    let title_id = string_field(&doc, "titleId")
        .or_else(|| string_field(&doc, "title_id"))
        .ok_or_else(not_found)?;

    let title_name = lookup_name(&doc).unwrap_or_else(|| title_id.clone());

    Ok(TitleMeta {
        title_id,
        title_name,
    })
}

/// Display-name fallback chain: locale-qualified name, then default name
fn lookup_name(doc: &Value) -> Option<String> {
    doc.get("localizedParameters")
        .and_then(|loc| loc.get(NAME_LOCALE))
        .and_then(|section| string_field(section, "titleName"))
        .or_else(|| string_field(doc, "titleName"))
}

/// Non-empty string field lookup
fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Coerce `applicationDrmType` to the safe constant, rewriting the file in
/// place only when the value actually differs
///
/// Returns whether the file was rewritten.
pub fn repair_drm_type(manifest_path: &Path) -> Result<bool> {
    let contents = fs::read_to_string(manifest_path)?;
    let mut doc: Value = serde_json::from_str(&contents)?;

    let Some(obj) = doc.as_object_mut() else {
        return Ok(false);
    };
    match obj.get("applicationDrmType").and_then(Value::as_str) {
        None => return Ok(false),
        Some(current) if current == DRM_TYPE_STANDARD => return Ok(false),
        Some(_) => {}
    }

    obj.insert(
        "applicationDrmType".to_string(),
        Value::String(DRM_TYPE_STANDARD.to_string()),
    );
    fs::write(manifest_path, serde_json::to_string_pretty(&doc)?)?;
    debug!(path = %manifest_path.display(), "coerced applicationDrmType to standard");
    Ok(true)
}
