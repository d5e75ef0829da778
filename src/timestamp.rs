use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serializer};
use snafu::{ResultExt, Snafu};
use std::str::FromStr;

pub(crate) mod required {
    use super::*;

    pub fn serialize<S>(timestamp: &Timestamp, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(timestamp)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Make sure value is an owned string, some serde implementations will fail on a slice (ex: `ciborium`)
        let string = String::deserialize(deserializer)?;
        Timestamp::from_str(&string).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod optional {
    use super::*;

    pub fn serialize<S>(optional: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match optional {
            Some(ref value) => serializer.serialize_some(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Make sure value is an owned string, some serde implementations will fail on a slice (ex: `ciborium`)
        let string = Option::<String>::deserialize(deserializer)?;

        // If there is a value, attempt to parse it in a timestamp, return error if parsing fails
        let timestamp = string
            .map(|string| Timestamp::from_str(&string).map_err(serde::de::Error::custom))
            .transpose()?;

        Ok(timestamp)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("Failed to parse timestamp {timestamp}"))]
#[snafu(visibility(pub(crate)))]
/// Error while parsing a timestamp from an integer
pub struct TimestampError {
    timestamp: i64,
    source: jiff::Error,
}

pub(crate) fn parse_timestamp(timestamp: i64) -> Result<Timestamp, TimestampError> {
    Timestamp::from_second(timestamp).context(TimestampSnafu { timestamp })
}

/// Resolve a seconds-from-creation expiration into an absolute timestamp.
/// Zero means never-expire.
pub(crate) fn expiry_from_seconds(
    created_at: Timestamp,
    expires: u64,
) -> Result<Option<Timestamp>, TimestampError> {
    if expires == 0 {
        return Ok(None);
    }
    parse_timestamp(created_at.as_second() + expires as i64).map(Some)
}
