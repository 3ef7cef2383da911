//! Shared serde helpers for configuration
//!
//! Durations are written as plain integers so that TOML files stay readable.

/// `Duration` as whole milliseconds, for sub-second retry delays
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Policy {
///     #[serde(with = "kf_core::config::serde_utils::duration_millis")]
///     delay: Duration,
/// }
/// ```
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Poll {
        #[serde(with = "duration_millis")]
        delay: Duration,
    }

    #[test]
    fn test_duration_as_millis() {
        let poll = Poll {
            delay: Duration::from_secs(1),
        };
        assert_eq!(serde_json::to_string(&poll).unwrap(), r#"{"delay":1000}"#);
    }

    #[test]
    fn test_duration_from_millis() {
        let poll: Poll = serde_json::from_str(r#"{"delay":1500}"#).unwrap();
        assert_eq!(poll.delay, Duration::from_millis(1500));
    }
}
