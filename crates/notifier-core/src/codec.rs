//! Tolerant parsing for the one field in the audit payload that arrives
//! in two shapes depending on upstream producer: a schema id encoded as
//! either a JSON integer or a JSON float.

use serde::de::{self, Deserialize, Deserializer, Visitor};
use std::fmt;

/// A schema id narrowed to `i32` regardless of whether it arrived as an
/// integer or a float on the wire. Floats are truncated toward zero;
/// non-finite values (`NaN`, `Infinity`) are rejected so the caller can
/// skip the record rather than silently produce a garbage id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaId(pub i32);

impl From<SchemaId> for i32 {
    fn from(id: SchemaId) -> i32 {
        id.0
    }
}

impl<'de> Deserialize<'de> for SchemaId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SchemaIdVisitor;

        impl<'de> Visitor<'de> for SchemaIdVisitor {
            type Value = SchemaId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a schema id encoded as a JSON integer or float")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SchemaId(v as i32))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(SchemaId(v as i32))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if !v.is_finite() {
                    return Err(de::Error::custom(format!(
                        "schema id must be finite, got {v}"
                    )));
                }
                Ok(SchemaId(v.trunc() as i32))
            }
        }

        deserializer.deserialize_any(SchemaIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Deserialize)]
    struct Wrapper {
        id: SchemaId,
    }

    #[test]
    fn narrows_float_by_truncation() {
        let w: Wrapper = serde_json::from_str(r#"{"id": 100001.0}"#).unwrap();
        assert_eq!(w.id.0, 100001);

        let w: Wrapper = serde_json::from_str(r#"{"id": 42.9}"#).unwrap();
        assert_eq!(w.id.0, 42);
    }

    #[test]
    fn accepts_plain_integer() {
        let w: Wrapper = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(w.id.0, 7);
    }

    #[test]
    fn rejects_non_finite() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"id": "NaN"}"#).is_err());
    }
}
