//! Composable read descriptors.
//!
//! [`Select`] describes a read against a model's table or against a raw SQL
//! source: conjunctive [`Condition`]s, an optional attribute projection,
//! ordering, and limit/offset. It renders to a single parameterised
//! statement; values are always bound, never interpolated, and column names
//! are validated before they reach the SQL text.

use std::marker::PhantomData;

use feeds_types::SortDirection;
use rusqlite::types::Value;

use crate::error::DbError;
use crate::record::{quote_ident, IntoValue, Model, Record};

/// Comparison operators usable in a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
}

impl Operator {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// A single filter; a query's conditions are joined with `AND`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column <op> value`
    Compare {
        /// Column compared.
        column: String,
        /// Operator applied.
        op: Operator,
        /// Right-hand value.
        value: Value,
    },
    /// `column IN (values...)`; an empty list matches nothing.
    In {
        /// Column tested.
        column: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// `column IS NULL`, or `IS NOT NULL` when `negated`.
    IsNull {
        /// Column tested.
        column: String,
        /// Whether the test is `IS NOT NULL`.
        negated: bool,
    },
}

impl Condition {
    fn compare(column: &str, op: Operator, value: impl IntoValue) -> Self {
        Self::Compare {
            column: column.to_string(),
            op,
            value: value.into_value(),
        }
    }

    /// `column = value`
    pub fn eq(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Eq, value)
    }

    /// `column != value`
    pub fn ne(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Ne, value)
    }

    /// `column < value`
    pub fn lt(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Le, value)
    }

    /// `column > value`
    pub fn gt(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: &str, value: impl IntoValue) -> Self {
        Self::compare(column, Operator::Ge, value)
    }

    /// `column LIKE pattern`
    pub fn like(column: &str, pattern: impl IntoValue) -> Self {
        Self::compare(column, Operator::Like, pattern)
    }

    /// `column IN (values...)`
    pub fn is_in<V: IntoValue>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            column: column.to_string(),
            values: values.into_iter().map(IntoValue::into_value).collect(),
        }
    }

    /// `column IS NULL`
    pub fn is_null(column: &str) -> Self {
        Self::IsNull {
            column: column.to_string(),
            negated: false,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: &str) -> Self {
        Self::IsNull {
            column: column.to_string(),
            negated: true,
        }
    }

    /// The column this condition tests.
    pub fn column(&self) -> &str {
        match self {
            Self::Compare { column, .. } | Self::In { column, .. } | Self::IsNull { column, .. } => {
                column
            }
        }
    }

    /// Renders the condition, appending its bound values to `params`.
    fn to_sql(&self, params: &mut Vec<Value>) -> String {
        match self {
            Self::Compare { column, op, value } => {
                params.push(value.clone());
                format!("{} {} ?", quote_ident(column), op.as_sql())
            }
            Self::In { values, .. } if values.is_empty() => "0".to_string(),
            Self::In { column, values } => {
                params.extend(values.iter().cloned());
                let marks = vec!["?"; values.len()].join(", ");
                format!("{} IN ({marks})", quote_ident(column))
            }
            Self::IsNull { column, negated } => {
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
                format!("{} {test}", quote_ident(column))
            }
        }
    }

    /// Evaluates the condition against an in-memory record.
    ///
    /// Only equality is supported: objects that have not reached storage
    /// are matched by exact field value.
    pub(crate) fn matches(&self, record: &Record) -> Result<bool, DbError> {
        match self {
            Self::Compare {
                column,
                op: Operator::Eq,
                value,
            } => Ok(record.value(column) == Some(value)),
            other => Err(DbError::Query(format!(
                "only equality conditions can match uncommitted objects (column {})",
                other.column()
            ))),
        }
    }
}

/// Where a [`Select`] reads its rows from.
#[derive(Debug, Clone)]
enum Source {
    Table,
    Raw { sql: String, params: Vec<Value> },
}

/// A read descriptor for model `M`.
///
/// ```rust,ignore
/// let query = Select::<Feed>::new()
///     .filter(Condition::eq("data_type", "gtfs"))
///     .order_by("id", SortDirection::Ascending)
///     .limit(10);
/// let feeds = database.select(&query)?;
/// ```
#[derive(Debug, Clone)]
pub struct Select<M> {
    source: Source,
    conditions: Vec<Condition>,
    attributes: Option<Vec<String>>,
    order: Vec<(String, SortDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    update_session: bool,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Default for Select<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Select<M> {
    /// Reads from the model's table.
    pub fn new() -> Self {
        Self {
            source: Source::Table,
            conditions: Vec::new(),
            attributes: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            update_session: true,
            _model: PhantomData,
        }
    }

    /// Reads from a raw SQL statement.
    ///
    /// The statement becomes a subquery, so its result must expose the
    /// model's columns; it may expose more (for ordering or filtering).
    /// Its own placeholders are bound to `params` before any value added
    /// by conditions or limits.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            source: Source::Raw {
                sql: sql.into(),
                params,
            },
            ..Self::new()
        }
    }

    /// Adds a condition.
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Adds several conditions.
    pub fn filters(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    /// Loads only `attributes` (plus the primary key); other columns take
    /// their default values.
    pub fn attributes(mut self, attributes: &[&str]) -> Self {
        self.attributes = Some(attributes.iter().map(|a| a.to_string()).collect());
        self
    }

    /// Appends an ordering term.
    pub fn order_by(mut self, column: &str, direction: SortDirection) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    /// Caps the number of rows returned.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips the first `offset` rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether the read starts a session first and releases it afterwards
    /// (default `true`). When `false` the currently active session is used.
    pub fn update_session(mut self, update_session: bool) -> Self {
        self.update_session = update_session;
        self
    }

    /// See [`Select::update_session`].
    pub fn updates_session(&self) -> bool {
        self.update_session
    }

    /// The conditions attached so far.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Columns the read loads, or `None` for all of them.
    pub fn projection(&self) -> Option<Vec<&str>> {
        self.attributes.as_ref().map(|attributes| project::<M>(attributes))
    }

    fn check_column(&self, column: &str) -> Result<(), DbError> {
        let known = match self.source {
            Source::Table => M::COLUMNS.contains(&column),
            Source::Raw { .. } => is_identifier(column),
        };
        if known {
            Ok(())
        } else {
            Err(DbError::Query(format!(
                "unknown column '{column}' for {}",
                M::TABLE
            )))
        }
    }

    /// Renders the statement and its bound values.
    ///
    /// # Errors
    ///
    /// `DbError::Query` if a condition, attribute or ordering names a column
    /// the source cannot have.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>), DbError> {
        for condition in &self.conditions {
            self.check_column(condition.column())?;
        }
        for (column, _) in &self.order {
            self.check_column(column)?;
        }
        if let Some(attributes) = &self.attributes {
            for attribute in attributes {
                if !M::COLUMNS.contains(&attribute.as_str()) {
                    return Err(DbError::Query(format!(
                        "unknown attribute '{attribute}' for {}",
                        M::TABLE
                    )));
                }
            }
        }

        let columns = self.projection().unwrap_or_else(|| M::COLUMNS.to_vec());
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params: Vec<Value> = Vec::new();
        let from = match &self.source {
            Source::Table => quote_ident(M::TABLE),
            Source::Raw { sql, params: raw } => {
                params.extend(raw.iter().cloned());
                format!("({sql}) AS q")
            }
        };

        let mut sql = format!("SELECT {column_list} FROM {from}");

        if !self.conditions.is_empty() {
            let clauses: Vec<String> = self
                .conditions
                .iter()
                .map(|condition| condition.to_sql(&mut params))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|(column, direction)| format!("{} {}", quote_ident(column), direction.as_sql()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        match (self.limit, self.offset) {
            (None, None) => {}
            (limit, offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit.map_or(-1, to_sql_int)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(to_sql_int(offset)));
                }
            }
        }

        Ok((sql, params))
    }
}

fn to_sql_int(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Primary-key columns followed by the requested attributes, in the
/// model's column order.
pub(crate) fn project<M: Model>(attributes: &[String]) -> Vec<&'static str> {
    M::COLUMNS
        .iter()
        .copied()
        .filter(|column| {
            M::PRIMARY_KEY.contains(column) || attributes.iter().any(|a| a == column)
        })
        .collect()
}

/// Records on `entity` which of its columns a projected read left out.
///
/// # Errors
///
/// `DbError::Query` if the model cannot remember unloaded columns.
pub(crate) fn mark_unloaded<M: Model>(entity: &mut M, loaded: &[&str]) -> Result<(), DbError> {
    let unloaded: Vec<&'static str> = M::COLUMNS
        .iter()
        .copied()
        .filter(|column| !loaded.contains(column))
        .collect();
    let slot = entity.unloaded_columns_mut().ok_or_else(|| {
        DbError::Query(format!("{} does not support projected reads", M::TABLE))
    })?;
    *slot = unloaded;
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Partitions rows that are already sorted by `key` into runs of equal key.
///
/// This is not an aggregation: unsorted input yields one group per run, so
/// the same key may appear in several groups. Concatenating the groups
/// always gives back the input in its original order.
pub fn group_sorted<T, K, F>(rows: Vec<T>, key: F) -> Vec<Vec<T>>
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let mut groups: Vec<Vec<T>> = Vec::new();
    let mut current: Option<K> = None;

    for row in rows {
        let row_key = key(&row);
        match groups.last_mut() {
            Some(group) if current.as_ref() == Some(&row_key) => group.push(row),
            _ => {
                current = Some(row_key);
                groups.push(vec![row]);
            }
        }
    }

    groups
}
