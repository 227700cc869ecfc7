//! Serde support for `Duration` values encoded as milliseconds

/// `Duration` as milliseconds
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `Option<Duration>` as optional milliseconds
pub mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timings {
        #[serde(with = "super::duration_millis")]
        interval: Duration,
        #[serde(with = "super::option_duration_millis", default)]
        ban_time: Option<Duration>,
    }

    #[test]
    fn test_durations_as_millis() {
        let timings = Timings {
            interval: Duration::from_millis(1500),
            ban_time: None,
        };

        let json = serde_json::to_value(&timings).unwrap();
        assert_eq!(json, serde_json::json!({"interval": 1500, "ban_time": null}));

        let parsed: Timings = serde_json::from_str(r#"{"interval": 250, "ban_time": 60000}"#).unwrap();
        assert_eq!(parsed.interval, Duration::from_millis(250));
        assert_eq!(parsed.ban_time, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_optional_duration() {
        let parsed: Timings = serde_json::from_str(r#"{"interval": 10}"#).unwrap();
        assert_eq!(parsed.ban_time, None);
    }
}
