use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The timestamp written for bundles that never started or stopped.
pub fn zero_time() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc())
        .expect("year one is a valid timestamp")
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, strum::Display,
)]
pub enum BundleType {
    /// Built by a single node for itself.
    #[default]
    Local,
    /// Aggregates local bundles downloaded from peer nodes.
    Cluster,
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, strum::Display,
)]
pub enum BundleStatus {
    #[default]
    Unknown,
    Started,
    InProgress,
    Done,
    Canceled,
    Deleted,
    Failed,
}

impl BundleStatus {
    /// Terminal bundles accept no further state transitions (other than the
    /// tombstone transition performed by delete).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BundleStatus::Done | BundleStatus::Canceled | BundleStatus::Deleted | BundleStatus::Failed
        )
    }
}

/// A diagnostics bundle record, both the wire representation and the
/// contents of the persisted `state.json`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Bundle {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub bundle_type: BundleType,
    #[serde(default)]
    pub status: BundleStatus,
    #[serde(default = "zero_time")]
    pub started_at: DateTime<Utc>,
    #[serde(default = "zero_time")]
    pub stopped_at: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Bundle {
    /// A freshly created bundle, about to be built.
    pub fn new(id: impl Into<String>, bundle_type: BundleType) -> Self {
        Self {
            id: id.into(),
            bundle_type,
            status: BundleStatus::Started,
            started_at: Utc::now(),
            stopped_at: zero_time(),
            size: 0,
            errors: Vec::new(),
        }
    }

    /// The record returned for ids whose state cannot be read.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            bundle_type: BundleType::default(),
            status: BundleStatus::Unknown,
            started_at: zero_time(),
            stopped_at: zero_time(),
            size: 0,
            errors: Vec::new(),
        }
    }
}
