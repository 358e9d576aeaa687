//! Fingerprint table persistence
//!
//! The table is a single JSON document. Saves go to a temp file next to the
//! target and are renamed into place, so readers never see a partial table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::GeolocationError;
use crate::types::Fingerprint;

/// Current on-disk layout.
pub const TABLE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FingerprintTable {
    version: u32,
    fingerprints: Vec<Fingerprint>,
}

/// Write `fingerprints` to `path` atomically.
pub fn save_table(fingerprints: &[Fingerprint], path: &Path) -> Result<(), GeolocationError> {
    let table = FingerprintTable {
        version: TABLE_VERSION,
        fingerprints: fingerprints.to_vec(),
    };
    let json = serde_json::to_vec_pretty(&table)
        .map_err(|e| GeolocationError::Format(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read a fingerprint table written by [`save_table`].
pub fn load_table(path: &Path) -> Result<Vec<Fingerprint>, GeolocationError> {
    let data = std::fs::read(path)?;
    let table: FingerprintTable =
        serde_json::from_slice(&data).map_err(|e| GeolocationError::Format(e.to_string()))?;
    if table.version != TABLE_VERSION {
        return Err(GeolocationError::Format(format!(
            "unsupported fingerprint table version {}",
            table.version
        )));
    }
    Ok(table.fingerprints)
}
