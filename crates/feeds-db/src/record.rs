//! Records, models and relationships.
//!
//! A [`Record`] is the ordered column/value map that travels between SQL
//! rows and typed entities. A [`Model`] knows its table, its primary key and
//! how to convert itself to and from a record. A [`Relationship`] names a
//! one-to-many collection on a parent model together with the function that
//! appends a child to it.

use std::fmt;

use rusqlite::types::{FromSql, Value, ValueRef};
use rusqlite::{Connection, Row};

/// Conversion into an SQLite value for conditions and records.
pub trait IntoValue {
    /// Converts `self` into an owned SQLite value.
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &String {
    fn into_value(self) -> Value {
        Value::Text(self.clone())
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Integer(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Integer(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Real(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

/// An ordered set of column values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces `column` and returns the record.
    pub fn with(mut self, column: &str, value: impl IntoValue) -> Self {
        self.set(column, value);
        self
    }

    /// Adds or replaces `column`.
    pub fn set(&mut self, column: &str, value: impl IntoValue) {
        let value = value.into_value();
        match self.values.iter_mut().find(|(name, _)| name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    /// Returns the raw value stored for `column`.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Reads `column` as `T`.
    ///
    /// # Errors
    ///
    /// `InvalidColumnName` if the column was not loaded, or
    /// `FromSqlConversionFailure` if the stored value does not convert.
    pub fn get<T: FromSql>(&self, column: &str) -> rusqlite::Result<T> {
        let (idx, value) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, (name, _))| name == column)
            .map(|(idx, (_, value))| (idx, value))
            .ok_or_else(|| rusqlite::Error::InvalidColumnName(column.to_string()))?;
        T::column_result(ValueRef::from(value))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, value.data_type(), Box::new(e)))
    }

    /// Reads `column` as `T`, falling back to `T::default()` when the column
    /// was not loaded or holds NULL.
    ///
    /// # Errors
    ///
    /// `FromSqlConversionFailure` if a non-NULL value does not convert.
    pub fn get_or_default<T: FromSql + Default>(&self, column: &str) -> rusqlite::Result<T> {
        match self.value(column) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(_) => self.get(column),
        }
    }

    /// Column names in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }

    /// Number of columns held.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record holds no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drops every column not named in `keep`.
    pub fn retain_columns(&mut self, keep: &[&str]) {
        self.values.retain(|(name, _)| keep.contains(&name.as_str()));
    }

    /// Reads every column of `row`, naming them with `names`.
    pub(crate) fn from_row(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Self> {
        let mut values = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            values.push((name.clone(), row.get::<_, Value>(idx)?));
        }
        Ok(Self { values })
    }
}

/// A persisted entity type.
///
/// `COLUMNS` lists every stored column, primary key included. `from_record`
/// must accept records that carry only part of the columns: a projected
/// read loads the primary key and the requested attributes, and the rest
/// take their default values (use [`Record::get_or_default`]). Models that
/// can be read with a projection also keep the list of columns it left out
/// (see [`Model::unloaded_columns_mut`]) so that saving the entity does not
/// overwrite stored values with those defaults.
pub trait Model: Clone + Send + fmt::Debug + 'static {
    /// Table the entity lives in.
    const TABLE: &'static str;
    /// Primary-key columns, in key order.
    const PRIMARY_KEY: &'static [&'static str];
    /// All stored columns.
    const COLUMNS: &'static [&'static str];

    /// Converts the entity into a record holding every column.
    fn to_record(&self) -> Record;

    /// Builds an entity from a full or projected record.
    ///
    /// # Errors
    ///
    /// Any conversion error raised by [`Record::get`].
    fn from_record(record: &Record) -> rusqlite::Result<Self>;

    /// Persists child collections after the entity row has been written.
    ///
    /// # Errors
    ///
    /// The first SQLite error encountered.
    fn save_related(&self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    /// Loads child collections after the entity row has been read.
    ///
    /// # Errors
    ///
    /// The first SQLite error encountered.
    fn load_related(&mut self, _conn: &Connection) -> rusqlite::Result<()> {
        Ok(())
    }

    /// Columns a projected read did not load.
    fn unloaded_columns(&self) -> &[&'static str] {
        &[]
    }

    /// Storage for [`Model::unloaded_columns`]. Models returning `None`
    /// cannot be read with a projection.
    fn unloaded_columns_mut(&mut self) -> Option<&mut Vec<&'static str>> {
        None
    }

    /// Primary-key values, in `PRIMARY_KEY` order.
    fn key_values(&self) -> Vec<Value> {
        let record = self.to_record();
        Self::PRIMARY_KEY
            .iter()
            .map(|column| record.value(column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Renders primary-key values for identity keys and log messages.
pub(crate) fn render_key(values: &[Value]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|value| match value {
            Value::Null => "null".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => f.to_string(),
            Value::Text(s) => format!("{s:?}"),
            Value::Blob(b) => format!("blob:{}", b.len()),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}

/// Quotes an identifier for SQLite.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Unloaded columns that still hold the default a projected read gave them.
fn untouched_columns<M: Model>(
    entity: &M,
    record: &Record,
) -> rusqlite::Result<Vec<&'static str>> {
    let unloaded = entity.unloaded_columns();
    if unloaded.is_empty() {
        return Ok(Vec::new());
    }
    let loaded: Vec<&str> = M::COLUMNS
        .iter()
        .copied()
        .filter(|column| !unloaded.contains(column))
        .collect();
    let mut projected = record.clone();
    projected.retain_columns(&loaded);
    let defaults = M::from_record(&projected)?.to_record();

    Ok(unloaded
        .iter()
        .copied()
        .filter(|column| record.value(column) == defaults.value(column))
        .collect())
}

/// Writes `entity` with an upsert keyed on its primary key, then its
/// related collections.
///
/// When the row already exists, columns a projected read left unloaded are
/// kept as stored unless the entity now holds something other than their
/// default.
///
/// # Errors
///
/// The first SQLite error encountered.
pub fn save<M: Model>(conn: &Connection, entity: &M) -> rusqlite::Result<()> {
    let record = entity.to_record();
    let untouched = untouched_columns(entity, &record)?;
    let columns: Vec<&str> = record.columns().collect();
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let key_list = M::PRIMARY_KEY
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !M::PRIMARY_KEY.contains(c) && !untouched.contains(c))
        .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
        .collect();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({column_list}) VALUES ({placeholders}) ON CONFLICT ({key_list}) {conflict_action}",
        quote_ident(M::TABLE)
    );
    let params: Vec<&Value> = record.values.iter().map(|(_, value)| value).collect();
    conn.execute(&sql, rusqlite::params_from_iter(params))?;

    entity.save_related(conn)
}

/// A named one-to-many collection on a parent model.
///
/// The append strategy is explicit, so attaching a child never relies on
/// looking up a field by name at runtime.
pub struct Relationship<P, C> {
    name: &'static str,
    append: fn(&mut P, C),
}

impl<P, C> Relationship<P, C> {
    /// Creates a relationship called `name` that attaches children with `append`.
    pub fn new(name: &'static str, append: fn(&mut P, C)) -> Self {
        Self { name, append }
    }

    /// The collection name, used in log messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends `child` to the collection on `parent`.
    pub fn attach(&self, parent: &mut P, child: C) {
        (self.append)(parent, child);
    }
}

impl<P, C> fmt::Debug for Relationship<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship").field("name", &self.name).finish()
    }
}
