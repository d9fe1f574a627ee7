//! Feed catalogue models.

use std::str::FromStr;

use feeds_types::{DataType, FeedStatus};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::record::{self, Model, Record, Relationship};

/// A published transit feed with its locations and external identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: String,
    pub data_type: DataType,
    pub stable_id: String,
    pub provider: Option<String>,
    pub feed_name: Option<String>,
    pub note: Option<String>,
    pub producer_url: Option<String>,
    pub status: FeedStatus,
    /// Ordered by country code.
    #[serde(default)]
    pub locations: Vec<Location>,
    /// Ordered by external identifier.
    #[serde(default)]
    pub external_ids: Vec<ExternalId>,
    /// Columns a projected read left at their defaults. Saving keeps their
    /// stored values unless they were assigned since.
    #[serde(skip)]
    pub unloaded: Vec<&'static str>,
}

/// A place a feed serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub country_code: Option<String>,
    pub subdivision_name: Option<String>,
    pub municipality: Option<String>,
}

/// An identifier another catalogue uses for a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalId {
    #[serde(skip)]
    pub feed_id: String,
    #[serde(rename = "external_id")]
    pub associated_id: String,
    pub source: String,
}

impl Feed {
    /// The feed's location collection.
    pub fn locations() -> Relationship<Feed, Location> {
        Relationship::new("locations", push_location)
    }

    /// The feed's external identifier collection. Appending sets the
    /// identifier's `feed_id` to the parent feed.
    pub fn external_ids() -> Relationship<Feed, ExternalId> {
        Relationship::new("external_ids", push_external_id)
    }
}

fn push_location(feed: &mut Feed, location: Location) {
    feed.locations.push(location);
}

fn push_external_id(feed: &mut Feed, mut external_id: ExternalId) {
    external_id.feed_id = feed.id.clone();
    feed.external_ids.push(external_id);
}

/// Reads a label column, defaulting when the column was not loaded or is NULL.
fn label<T>(record: &Record, column: &str) -> rusqlite::Result<T>
where
    T: FromStr + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match record.get_or_default::<Option<String>>(column)? {
        None => Ok(T::default()),
        Some(raw) => raw
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))),
    }
}

impl Model for Feed {
    const TABLE: &'static str = "feed";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "data_type",
        "stable_id",
        "provider",
        "feed_name",
        "note",
        "producer_url",
        "status",
    ];

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", &self.id)
            .with("data_type", self.data_type.as_str())
            .with("stable_id", &self.stable_id)
            .with("provider", self.provider.clone())
            .with("feed_name", self.feed_name.clone())
            .with("note", self.note.clone())
            .with("producer_url", self.producer_url.clone())
            .with("status", self.status.as_str())
    }

    fn from_record(record: &Record) -> rusqlite::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            data_type: label(record, "data_type")?,
            stable_id: record.get_or_default("stable_id")?,
            provider: record.get_or_default("provider")?,
            feed_name: record.get_or_default("feed_name")?,
            note: record.get_or_default("note")?,
            producer_url: record.get_or_default("producer_url")?,
            status: label(record, "status")?,
            locations: Vec::new(),
            external_ids: Vec::new(),
            unloaded: Vec::new(),
        })
    }

    fn unloaded_columns(&self) -> &[&'static str] {
        &self.unloaded
    }

    fn unloaded_columns_mut(&mut self) -> Option<&mut Vec<&'static str>> {
        Some(&mut self.unloaded)
    }

    /// Replaces the feed's location links and external identifiers with the
    /// collections held in memory.
    fn save_related(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute("DELETE FROM feed_locations WHERE feed_id = ?1", [&self.id])?;
        for location in &self.locations {
            record::save(conn, location)?;
            conn.execute(
                "INSERT OR IGNORE INTO feed_locations (feed_id, location_id) VALUES (?1, ?2)",
                params![self.id, location.id],
            )?;
        }

        conn.execute("DELETE FROM external_id WHERE feed_id = ?1", [&self.id])?;
        for external_id in &self.external_ids {
            conn.execute(
                "INSERT OR IGNORE INTO external_id (feed_id, associated_id, source) VALUES (?1, ?2, ?3)",
                params![self.id, external_id.associated_id, external_id.source],
            )?;
        }
        Ok(())
    }

    fn load_related(&mut self, conn: &Connection) -> rusqlite::Result<()> {
        let mut stmt = conn.prepare_cached(
            "SELECT l.id, l.country_code, l.subdivision_name, l.municipality
             FROM location l
             JOIN feed_locations fl ON fl.location_id = l.id
             WHERE fl.feed_id = ?1
             ORDER BY l.country_code IS NULL, l.country_code, l.id",
        )?;
        self.locations = stmt
            .query_map([&self.id], |row| {
                Ok(Location {
                    id: row.get(0)?,
                    country_code: row.get(1)?,
                    subdivision_name: row.get(2)?,
                    municipality: row.get(3)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare_cached(
            "SELECT feed_id, associated_id, source
             FROM external_id
             WHERE feed_id = ?1
             ORDER BY associated_id, source",
        )?;
        self.external_ids = stmt
            .query_map([&self.id], |row| {
                Ok(ExternalId {
                    feed_id: row.get(0)?,
                    associated_id: row.get(1)?,
                    source: row.get(2)?,
                })
            })?
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

impl Model for Location {
    const TABLE: &'static str = "location";
    const PRIMARY_KEY: &'static [&'static str] = &["id"];
    const COLUMNS: &'static [&'static str] =
        &["id", "country_code", "subdivision_name", "municipality"];

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", &self.id)
            .with("country_code", self.country_code.clone())
            .with("subdivision_name", self.subdivision_name.clone())
            .with("municipality", self.municipality.clone())
    }

    fn from_record(record: &Record) -> rusqlite::Result<Self> {
        Ok(Self {
            id: record.get("id")?,
            country_code: record.get_or_default("country_code")?,
            subdivision_name: record.get_or_default("subdivision_name")?,
            municipality: record.get_or_default("municipality")?,
        })
    }
}

impl Model for ExternalId {
    const TABLE: &'static str = "external_id";
    const PRIMARY_KEY: &'static [&'static str] = &["feed_id", "source", "associated_id"];
    const COLUMNS: &'static [&'static str] = &["feed_id", "associated_id", "source"];

    fn to_record(&self) -> Record {
        Record::new()
            .with("feed_id", &self.feed_id)
            .with("associated_id", &self.associated_id)
            .with("source", &self.source)
    }

    fn from_record(record: &Record) -> rusqlite::Result<Self> {
        Ok(Self {
            feed_id: record.get("feed_id")?,
            associated_id: record.get("associated_id")?,
            source: record.get("source")?,
        })
    }
}
