use chrono::Local;
use serde::{Deserialize, Deserializer, Serialize};

/// A tracked creator channel. Identity is `channel_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub channel_id: String,
    pub display_name: String,
    /// Message sent along with the thanks for this channel's uploads.
    pub message: String,
}

/// Newest upload found on a channel's video listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestVideo {
    pub video_id: String,
    /// Best-effort title scraped next to the id.
    pub title: Option<String>,
}

/// One request to run the automation flow for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchJob {
    pub channel_id: String,
    pub video_id: String,
    pub title: Option<String>,
    pub message: String,
}

/// A handled video in the completion ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub title: String,
    /// ISO-8601 local time the actuator returned. Kept as text: older
    /// ledgers carry naive timestamps without an offset.
    pub completed_at: String,
    /// Same instant as `completed_at`, in epoch seconds. Fractional values
    /// from older ledgers are truncated on load.
    #[serde(deserialize_with = "epoch_secs")]
    pub timestamp: i64,
    #[serde(default)]
    pub message: String,
    /// Actuator result string, stored verbatim.
    #[serde(default)]
    pub result: String,
}

fn epoch_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Whole(i64),
        Fractional(f64),
    }

    Ok(match Secs::deserialize(deserializer)? {
        Secs::Whole(secs) => secs,
        Secs::Fractional(secs) => secs.trunc() as i64,
    })
}

impl LedgerEntry {
    pub fn completed_now(job: &DispatchJob, result: String) -> Self {
        let now = Local::now();
        Self {
            title: job.title.clone().unwrap_or_else(|| job.video_id.clone()),
            completed_at: now.to_rfc3339(),
            timestamp: now.timestamp(),
            message: job.message.clone(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_title_falls_back_to_video_id() {
        let job = DispatchJob {
            channel_id: "C1".into(),
            video_id: "v100".into(),
            title: None,
            message: "thanks".into(),
        };
        let entry = LedgerEntry::completed_now(&job, "ok".into());
        assert_eq!(entry.title, "v100");
        assert_eq!(entry.message, "thanks");
        let parsed = chrono::DateTime::parse_from_rfc3339(&entry.completed_at).unwrap();
        assert_eq!(entry.timestamp, parsed.timestamp());
    }

    #[test]
    fn test_entry_loads_without_optional_fields() {
        let entry: LedgerEntry = serde_json::from_str(
            r#"{"title":"Some upload","completed_at":"2025-06-01T12:00:00.123456","timestamp":1748746800}"#,
        )
        .unwrap();
        assert_eq!(entry.title, "Some upload");
        assert!(entry.message.is_empty());
        assert!(entry.result.is_empty());
    }

    #[test]
    fn test_fractional_timestamp_is_truncated() {
        let entry: LedgerEntry = serde_json::from_str(
            r#"{"title":"t","completed_at":"2025-06-01T12:00:00.123456","timestamp":1748746800.923}"#,
        )
        .unwrap();
        assert_eq!(entry.timestamp, 1748746800);

        // Written back as a whole number.
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["timestamp"], serde_json::json!(1748746800));
    }
}
