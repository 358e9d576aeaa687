//! Serde adapter for readings that use NaN as "unknown".
//!
//! JSON has no NaN, so an unknown reading is written as `null` and `null`
//! reads back as NaN.
//!
//! ```ignore
//! #[serde(with = "unknown_f64")]
//! pub rsrp: f64,
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let known = if value.is_nan() { None } else { Some(*value) };
    known.serialize(serializer)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}
