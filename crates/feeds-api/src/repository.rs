//! Feed queries used by the HTTP handlers.
//!
//! Every method is synchronous; handlers call them from
//! `tokio::task::spawn_blocking`.

use std::sync::Arc;

use feeds_db::{Condition, Database, DbError, Feed, MergeOptions, Select, Value};
use feeds_types::{DataType, OrderBy, SortDirection};

/// Fields a feed listing can be ordered by.
pub const ORDER_FIELDS: &[&str] = &["id", "provider", "country_code", "external_id"];

/// Default page size.
pub const DEFAULT_LIMIT: u64 = 100;

/// Largest page size a caller may request.
pub const MAX_LIMIT: u64 = 1_000;

/// Listing criteria for GTFS feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    pub limit: u64,
    pub offset: u64,
    /// Case-insensitive exact match on any of the feed's locations.
    pub country_code: Option<String>,
    /// Case-insensitive substring match on any of the feed's locations.
    pub subdivision_name: Option<String>,
    /// Case-insensitive substring match on any of the feed's locations.
    pub municipality: Option<String>,
    /// Case-insensitive substring match on the provider.
    pub provider: Option<String>,
    pub order: OrderBy,
}

impl Default for FeedFilter {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            country_code: None,
            subdivision_name: None,
            municipality: None,
            provider: None,
            order: OrderBy::ascending("id"),
        }
    }
}

/// Read and write access to the feed catalogue.
#[derive(Debug, Clone)]
pub struct FeedRepository {
    db: Arc<Database>,
}

impl FeedRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Lists GTFS feeds matching `filter`, one page at a time.
    ///
    /// Ordering by `country_code` or `external_id` sorts on the smallest
    /// value among the feed's locations or identifiers, which is the first
    /// element of the nested collection. Ties are broken by feed id.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] raised by the select.
    pub fn list_gtfs_feeds(&self, filter: &FeedFilter) -> Result<Vec<Feed>, DbError> {
        let query = listing_query(filter)?;
        self.db.select(&query)
    }

    /// Fetches one GTFS feed by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when no GTFS feed has that id, or any select error.
    pub fn get_gtfs_feed(&self, id: &str) -> Result<Feed, DbError> {
        let query = Select::<Feed>::new()
            .filter(Condition::eq("id", id))
            .filter(Condition::eq("data_type", DataType::Gtfs.as_str()))
            .limit(1);
        self.db
            .select(&query)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound {
                table: "feed",
                key: id.to_string(),
            })
    }

    /// Stores `feed` with its locations and external ids and commits.
    ///
    /// # Errors
    ///
    /// Any [`DbError`] raised by the merge or the commit.
    pub fn save_feed(&self, feed: Feed) -> Result<(), DbError> {
        self.db.merge(feed, MergeOptions::default().update_session(true))?;
        self.db.commit()
    }
}

fn listing_query(filter: &FeedFilter) -> Result<Select<Feed>, DbError> {
    if !ORDER_FIELDS.contains(&filter.order.field.as_str()) {
        return Err(DbError::Query(format!(
            "cannot order feeds by {}",
            filter.order.field
        )));
    }

    let mut sql = String::from(
        "SELECT f.id, f.data_type, f.stable_id, f.provider, f.feed_name, f.note, \
         f.producer_url, f.status, \
         (SELECT MIN(l.country_code) FROM location l \
          JOIN feed_locations fl ON fl.location_id = l.id \
          WHERE fl.feed_id = f.id) AS country_code, \
         (SELECT MIN(e.associated_id) FROM external_id e \
          WHERE e.feed_id = f.id) AS external_id \
         FROM feed f WHERE f.data_type = ?",
    );
    let mut params = vec![Value::Text(DataType::Gtfs.as_str().to_string())];

    let location_filters = [
        ("country_code", filter.country_code.as_deref(), false),
        ("subdivision_name", filter.subdivision_name.as_deref(), true),
        ("municipality", filter.municipality.as_deref(), true),
    ];
    for (column, value, substring) in location_filters {
        let Some(value) = value else { continue };
        if substring {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM feed_locations fl \
                 JOIN location l ON l.id = fl.location_id \
                 WHERE fl.feed_id = f.id AND l.{column} LIKE ? ESCAPE '\\')"
            ));
            params.push(Value::Text(contains_pattern(value)));
        } else {
            sql.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM feed_locations fl \
                 JOIN location l ON l.id = fl.location_id \
                 WHERE fl.feed_id = f.id AND l.{column} = ? COLLATE NOCASE)"
            ));
            params.push(Value::Text(value.to_string()));
        }
    }
    if let Some(provider) = filter.provider.as_deref() {
        sql.push_str(" AND f.provider LIKE ? ESCAPE '\\'");
        params.push(Value::Text(contains_pattern(provider)));
    }

    let mut query = Select::<Feed>::raw(sql, params)
        .order_by(&filter.order.field, filter.order.direction)
        .limit(filter.limit.min(MAX_LIMIT))
        .offset(filter.offset);
    if filter.order.field != "id" {
        query = query.order_by("id", SortDirection::Ascending);
    }
    Ok(query)
}

/// `%value%` with LIKE wildcards in `value` escaped.
fn contains_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("metro"), "%metro%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn listing_orders_by_requested_field_then_id() {
        let filter = FeedFilter {
            order: OrderBy::descending("country_code"),
            ..FeedFilter::default()
        };
        let (sql, params) = listing_query(&filter)
            .expect("query")
            .to_sql()
            .expect("render");
        assert!(sql.ends_with("ORDER BY \"country_code\" DESC, \"id\" ASC LIMIT ? OFFSET ?"));
        assert_eq!(params[0], Value::Text("gtfs".into()));
        assert_eq!(params[params.len() - 2], Value::Integer(100));
    }

    #[test]
    fn listing_caps_the_page_size() {
        let filter = FeedFilter {
            limit: 50_000,
            ..FeedFilter::default()
        };
        let (_, params) = listing_query(&filter)
            .expect("query")
            .to_sql()
            .expect("render");
        assert_eq!(params[params.len() - 2], Value::Integer(1_000));
    }

    #[test]
    fn listing_binds_filters_in_order() {
        let filter = FeedFilter {
            country_code: Some("ca".into()),
            provider: Some("metro".into()),
            ..FeedFilter::default()
        };
        let (_, params) = listing_query(&filter)
            .expect("query")
            .to_sql()
            .expect("render");
        assert_eq!(params[1], Value::Text("ca".into()));
        assert_eq!(params[2], Value::Text("%metro%".into()));
    }

    #[test]
    fn listing_rejects_unknown_order_field() {
        let filter = FeedFilter {
            order: OrderBy::ascending("note"),
            ..FeedFilter::default()
        };
        assert!(matches!(listing_query(&filter), Err(DbError::Query(_))));
    }
}
