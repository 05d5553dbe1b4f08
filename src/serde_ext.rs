//! Serde helpers shared by the wire format and the room schema.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Parses a human duration such as `"1500ms"`, `"2s"` or `"1m 30s"`.
///
/// # Errors
///
/// Returns a message describing why `raw` is not a duration.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw.trim()).map_err(|e| e.to_string())
}

/// `Duration` as integer milliseconds.
pub mod duration_ms {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serializes a duration as whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes whole milliseconds into a duration.
    ///
    /// # Errors
    ///
    /// Fails when the value is not an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// `Option<Duration>` as integer milliseconds or `null`.
pub mod option_duration_ms {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    /// Serializes an optional duration as whole milliseconds.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes optional whole milliseconds.
    ///
    /// # Errors
    ///
    /// Fails when the value is neither `null` nor an unsigned integer.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
