//! Per-attachment schema snapshots.
//!
//! A [`DbSchema`] records which tables and columns an attached database
//! actually has. It is read once at attach time; the catalog derives a
//! [`FulfillableColumnSet`] from it that stays fixed for the attachment's
//! lifetime.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{RomqlError, RomqlResult};

/// One column as declared in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

/// Table name → ordered columns for one attached database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbSchema {
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl DbSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with `(name, declared type)` columns.
    pub fn add_table(&mut self, table: &str, columns: &[(&str, &str)]) {
        self.tables.insert(
            table.to_string(),
            columns
                .iter()
                .map(|(name, ty)| ColumnInfo {
                    name: name.to_string(),
                    declared_type: ty.to_string(),
                })
                .collect(),
        );
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// SQLite names are case-insensitive, so lookups are too.
    pub fn columns(&self, table: &str) -> Option<&[ColumnInfo]> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, cols)| cols.as_slice())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.columns(table).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table)
            .is_some_and(|cols| cols.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
    }

    /// `Table.Column` form of [`DbSchema::has_column`].
    pub fn has_qualified_column(&self, qualified: &str) -> bool {
        match qualified.split_once('.') {
            Some((table, column)) => self.has_column(table, column),
            None => false,
        }
    }

    /// Read the tables and columns of attached schema `schema_name`.
    pub async fn load(conn: &mut SqliteConnection, schema_name: &str) -> RomqlResult<Self> {
        let schema = quote_ident(schema_name);
        let list_sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
            schema
        );
        let names: Vec<String> = sqlx::query_scalar(&list_sql)
            .persistent(false)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| RomqlError::engine(&list_sql, e))?;

        let mut loaded = DbSchema::new();
        for table in names {
            let info_sql = format!("PRAGMA {}.table_info({})", schema, quote_ident(&table));
            let rows = sqlx::query(&info_sql)
                .persistent(false)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| RomqlError::engine(&info_sql, e))?;

            let mut columns = Vec::with_capacity(rows.len());
            for row in rows {
                let name: String = row
                    .try_get("name")
                    .map_err(|e| RomqlError::engine(&info_sql, e))?;
                let declared_type: String = row.try_get("type").unwrap_or_default();
                columns.push(ColumnInfo {
                    name,
                    declared_type,
                });
            }
            loaded.tables.insert(table, columns);
        }
        Ok(loaded)
    }
}

/// Catalog column ids realizable against one attachment.
///
/// Built once from a [`DbSchema`]; there are no mutators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FulfillableColumnSet(BTreeSet<String>);

impl FulfillableColumnSet {
    pub fn contains(&self, column_id: &str) -> bool {
        self.0.contains(column_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for FulfillableColumnSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Quote an SQLite identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Reduce a display name such as `Sega Mega Drive` to a schema name
/// (`Sega_Mega_Drive`): only `[A-Za-z0-9_]`, never starting with a digit,
/// never empty.
pub fn sanitize_schema_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("db");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    // SQLite reserves these two schema names.
    if name.eq_ignore_ascii_case("main") || name.eq_ignore_ascii_case("temp") {
        name.push('_');
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbSchema {
        let mut schema = DbSchema::new();
        schema.add_table("Game", &[("GameId", "INTEGER"), ("Name", "TEXT")]);
        schema.add_table("Years", &[("GameId", "INTEGER"), ("Year", "INTEGER")]);
        schema
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let schema = sample();
        assert!(schema.has_table("game"));
        assert!(schema.has_column("GAME", "name"));
        assert!(schema.has_qualified_column("Years.Year"));
        assert!(!schema.has_qualified_column("Genre.Name"));
        assert!(!schema.has_qualified_column("Year"));
    }

    #[test]
    fn test_table_names_sorted() {
        let schema = sample();
        assert_eq!(schema.table_names().collect::<Vec<_>>(), vec!["Game", "Years"]);
    }

    #[test]
    fn test_sanitize_schema_name() {
        assert_eq!(sanitize_schema_name("Sega Mega Drive"), "Sega_Mega_Drive");
        assert_eq!(sanitize_schema_name("3DO"), "_3DO");
        assert_eq!(sanitize_schema_name("  "), "db");
        assert_eq!(sanitize_schema_name("main"), "main_");
        assert_eq!(sanitize_schema_name("NES/Famicom"), "NES_Famicom");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("Game"), "\"Game\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_fulfillable_set() {
        let set: FulfillableColumnSet = vec!["Name".to_string(), "Year".to_string()]
            .into_iter()
            .collect();
        assert!(set.contains("Name"));
        assert!(!set.contains("Genre"));
        assert_eq!(set.len(), 2);
    }
}
