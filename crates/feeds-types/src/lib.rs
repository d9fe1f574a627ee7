//! Shared types for the Mobility Feeds platform.
//!
//! This crate holds the small vocabulary that both the data-access layer
//! (`feeds-db`) and the HTTP service (`feeds-api`) speak: feed data types,
//! feed lifecycle status, and the `order_by` request grammar.
//!
//! Nothing here touches the database, so the service and the storage
//! layer can share these types without a dependency cycle.

use serde::{Deserialize, Serialize};

/// Kind of data a feed publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Static GTFS schedule.
    #[default]
    Gtfs,
    /// GTFS Realtime.
    GtfsRt,
    /// General Bikeshare Feed Specification.
    Gbfs,
}

impl DataType {
    /// Returns the stored string label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gtfs => "gtfs",
            Self::GtfsRt => "gtfs_rt",
            Self::Gbfs => "gbfs",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataType {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gtfs" => Ok(Self::Gtfs),
            "gtfs_rt" => Ok(Self::GtfsRt),
            "gbfs" => Ok(Self::Gbfs),
            _ => Err(ParseLabelError {
                kind: "data type",
                value: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Published and maintained.
    #[default]
    Active,
    /// Replaced by another feed.
    Deprecated,
    /// No longer published.
    Inactive,
    /// Published for testing only.
    Development,
    /// Announced but not live yet.
    Future,
}

impl FeedStatus {
    /// Returns the stored string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deprecated => "deprecated",
            Self::Inactive => "inactive",
            Self::Development => "development",
            Self::Future => "future",
        }
    }
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FeedStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deprecated" => Ok(Self::Deprecated),
            "inactive" => Ok(Self::Inactive),
            "development" => Ok(Self::Development),
            "future" => Ok(Self::Future),
            _ => Err(ParseLabelError {
                kind: "feed status",
                value: s.to_string(),
            }),
        }
    }
}

/// Error returned when a stored label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseLabelError {
    /// What was being parsed ("data type", "feed status").
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

mod order;
pub use order::{OrderBy, ParseOrderByError, SortDirection};
