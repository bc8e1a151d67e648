//! The column catalog.
//!
//! Every column the frontend can show or filter on is a [`UsableColumn`]:
//! which tables and `Table.Column`s it needs, how to project it, and the
//! identifiers a filter may use for it. Tables other than the root are
//! reached through a join-dependency graph (`ParentGenre` needs `Genre`,
//! `Genre` needs `Game`).
//!
//! Definitions are checked once, in [`Catalog::from_def`]. After that the
//! query builder can look things up without re-validating.
//!
//! # Example
//! ```
//! use romql::catalog::Catalog;
//! use romql::schema::DbSchema;
//!
//! let catalog = Catalog::games();
//! let mut schema = DbSchema::new();
//! schema.add_table("Game", &[("GameId", "INTEGER"), ("Name", "TEXT")]);
//!
//! let fulfillable = catalog.fulfillable(&schema);
//! assert!(fulfillable.contains("Name"));
//! assert!(!fulfillable.contains("Genre"));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use strsim::levenshtein;

use crate::error::{RomqlError, RomqlResult};
use crate::schema::{quote_ident, DbSchema, FulfillableColumnSet};

/// Value class of a catalog column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    #[default]
    Text,
    Integer,
    Real,
}

fn default_true() -> bool {
    true
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsableColumn {
    /// Stable, UI-facing key.
    pub id: String,
    /// Tables that must exist.
    #[serde(default)]
    pub tables: Vec<String>,
    /// `Table.Column`s that must exist.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Projection term ending in `AS <alias>`.
    pub select: String,
    /// Identifiers accepted in filter text; the first is canonical and
    /// equals the projection alias.
    pub filters: Vec<String>,
    #[serde(default)]
    pub kind: ColumnKind,
    /// Projection used where the column cannot be realized.
    #[serde(default)]
    pub placeholder: Option<String>,

    // Presentation hints, carried for the UI only.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default = "default_true")]
    pub sortable: bool,
    #[serde(default = "default_true")]
    pub filterable: bool,
}

impl UsableColumn {
    /// Start a column definition. The canonical filter identifier is
    /// taken from the alias of `select`.
    pub fn new(id: &str, select: &str, kind: ColumnKind) -> Self {
        let mut column = Self {
            id: id.to_string(),
            tables: Vec::new(),
            columns: Vec::new(),
            select: select.to_string(),
            filters: Vec::new(),
            kind,
            placeholder: None,
            width: None,
            sortable: true,
            filterable: true,
        };
        if let Some(alias) = split_alias(select).map(|(_, a)| a.to_string()) {
            column.filters.push(alias);
        }
        column
    }

    /// Require `Table.Column`, registering `Table` as well.
    pub fn requires(mut self, qualified: &str) -> Self {
        if let Some((table, _)) = qualified.split_once('.') {
            if !self.tables.iter().any(|t| t == table) {
                self.tables.push(table.to_string());
            }
        }
        self.columns.push(qualified.to_string());
        self
    }

    /// Accept another identifier in filter text.
    pub fn alias(mut self, identifier: &str) -> Self {
        self.filters.push(identifier.to_string());
        self
    }

    pub fn width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Alias the projection is exposed under.
    pub fn result_name(&self) -> &str {
        split_alias(&self.select).map(|(_, a)| a).unwrap_or(&self.select)
    }

    /// Projection expression without its alias.
    pub fn expression(&self) -> &str {
        split_alias(&self.select).map(|(e, _)| e).unwrap_or(&self.select)
    }

    pub fn canonical_filter(&self) -> &str {
        self.filters.first().map(String::as_str).unwrap_or(&self.id)
    }

    /// Projection used when an attachment cannot fulfill this column.
    pub fn placeholder_select(&self) -> String {
        self.placeholder
            .clone()
            .unwrap_or_else(|| format!("NULL AS {}", self.result_name()))
    }

    pub fn matches_identifier(&self, identifier: &str) -> bool {
        self.filters.iter().any(|f| f.eq_ignore_ascii_case(identifier))
    }
}

/// Split `expr AS alias` on the last ` AS `, case-insensitively.
fn split_alias(select: &str) -> Option<(&str, &str)> {
    let upper = select.to_ascii_uppercase();
    let idx = upper.rfind(" AS ")?;
    let alias = select[idx + 4..].trim();
    if alias.is_empty() {
        return None;
    }
    Some((select[..idx].trim(), alias))
}

/// Schema validator: true when every required table and `Table.Column`
/// exists in `schema`.
pub fn validate(column: &UsableColumn, schema: &DbSchema) -> bool {
    column.tables.iter().all(|t| schema.has_table(t))
        && column.columns.iter().all(|c| schema.has_qualified_column(c))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

/// How to reach `table` from the tables already joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinDef {
    pub table: String,
    /// Table that must be joined first; `None` means the root table.
    #[serde(default)]
    pub requires: Option<String>,
    /// Join condition, written against unqualified table names.
    pub on: String,
    #[serde(default)]
    pub kind: JoinKind,
}

impl JoinDef {
    pub fn new(table: &str, requires: Option<&str>, on: &str) -> Self {
        Self {
            table: table.to_string(),
            requires: requires.map(str::to_string),
            on: on.to_string(),
            kind: JoinKind::Left,
        }
    }

    fn render(&self, schema_name: &str) -> String {
        let keyword = match self.kind {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "JOIN",
        };
        format!(
            "{} {}.{} AS {} ON {}",
            keyword,
            quote_ident(schema_name),
            quote_ident(&self.table),
            self.table,
            self.on
        )
    }
}

/// Unvalidated catalog definition, as read from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDef {
    pub root_table: String,
    pub key_column: String,
    pub columns: Vec<UsableColumn>,
    #[serde(default)]
    pub joins: Vec<JoinDef>,
}

impl CatalogDef {
    /// Definition of the built-in game catalogue.
    pub fn games() -> Self {
        CatalogDef {
            root_table: "Game".into(),
            key_column: "GameId".into(),
            columns: vec![
                UsableColumn::new("Name", "Game.Name AS Name", ColumnKind::Text)
                    .requires("Game.Name")
                    .alias("Game.Name")
                    .alias("Title")
                    .width(240),
                UsableColumn::new("Year", "Years.Year AS Year", ColumnKind::Integer)
                    .requires("Years.Year")
                    .alias("Years.Year")
                    .width(50),
                UsableColumn::new("Publisher", "Game.Publisher AS Publisher", ColumnKind::Text)
                    .requires("Game.Publisher")
                    .alias("Game.Publisher")
                    .width(120),
                UsableColumn::new("Developer", "Game.Developer AS Developer", ColumnKind::Text)
                    .requires("Game.Developer")
                    .alias("Game.Developer")
                    .width(120),
                UsableColumn::new("Players", "Game.Players AS Players", ColumnKind::Integer)
                    .requires("Game.Players")
                    .alias("Game.Players")
                    .width(40),
                UsableColumn::new("Genre", "Genre.Name AS Genre", ColumnKind::Text)
                    .requires("Genre.Name")
                    .requires("Genre.GenreId")
                    .requires("Game.GenreId")
                    .alias("Genre.Name")
                    .width(100),
                UsableColumn::new(
                    "ParentGenre",
                    "ParentGenre.Name AS ParentGenre",
                    ColumnKind::Text,
                )
                .requires("ParentGenre.Name")
                .requires("ParentGenre.ParentGenreId")
                .requires("Genre.ParentGenreId")
                .requires("Genre.GenreId")
                .requires("Game.GenreId")
                .alias("ParentGenre.Name")
                .width(100),
                UsableColumn::new("Rating", "Game.Rating AS Rating", ColumnKind::Real)
                    .requires("Game.Rating")
                    .alias("Game.Rating")
                    .width(50),
            ],
            joins: vec![
                JoinDef::new("Years", None, "Years.GameId = Game.GameId"),
                JoinDef::new("Genre", None, "Genre.GenreId = Game.GenreId"),
                JoinDef::new(
                    "ParentGenre",
                    Some("Genre"),
                    "ParentGenre.ParentGenreId = Genre.ParentGenreId",
                ),
            ],
        }
    }
}

/// A validated column catalog plus its join graph.
#[derive(Debug, Clone)]
pub struct Catalog {
    root_table: String,
    key_column: String,
    columns: Vec<UsableColumn>,
    joins: HashMap<String, JoinDef>,
}

impl Catalog {
    /// Validate a definition.
    pub fn from_def(def: CatalogDef) -> RomqlResult<Self> {
        let CatalogDef {
            root_table,
            key_column,
            columns,
            joins,
        } = def;

        if !is_plain_identifier(&root_table) || !is_plain_identifier(&key_column) {
            return Err(RomqlError::Config(format!(
                "root table '{}' and key column '{}' must be plain identifiers",
                root_table, key_column
            )));
        }

        let mut join_map = HashMap::new();
        for join in joins {
            if join.table.eq_ignore_ascii_case(&root_table) {
                return Err(RomqlError::Config(format!(
                    "root table '{}' cannot have a join",
                    root_table
                )));
            }
            let key = join.table.to_ascii_lowercase();
            if join_map.insert(key, join).is_some() {
                return Err(RomqlError::Config("duplicate join definition".into()));
            }
        }

        let catalog = Self {
            root_table,
            key_column,
            columns,
            joins: join_map,
        };

        for join in catalog.joins.values() {
            if let Some(dep) = &join.requires {
                if !catalog.is_reachable(dep) {
                    return Err(RomqlError::Config(format!(
                        "join for '{}' requires unknown table '{}'",
                        join.table, dep
                    )));
                }
            }
            catalog.check_acyclic(&join.table)?;
        }

        let mut seen = HashSet::new();
        for column in &catalog.columns {
            catalog.check_column(column)?;
            if !seen.insert(column.id.as_str()) {
                return Err(RomqlError::Config(format!(
                    "duplicate column id '{}'",
                    column.id
                )));
            }
        }

        Ok(catalog)
    }

    /// The built-in game catalogue, assembled from [`CatalogDef::games`]
    /// without re-running the load-time checks.
    pub fn games() -> Self {
        let CatalogDef {
            root_table,
            key_column,
            columns,
            joins,
        } = CatalogDef::games();
        Self {
            root_table,
            key_column,
            columns,
            joins: joins
                .into_iter()
                .map(|join| (join.table.to_ascii_lowercase(), join))
                .collect(),
        }
    }

    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    /// Projection of the row key, always the second result column.
    pub fn key_select(&self) -> String {
        format!("{}.{} AS {}", self.root_table, self.key_column, self.key_column)
    }

    pub fn columns(&self) -> &[UsableColumn] {
        &self.columns
    }

    pub fn get(&self, id: &str) -> Option<&UsableColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Look up a column id, failing with a suggestion when unknown.
    pub fn require(&self, id: &str) -> RomqlResult<&UsableColumn> {
        self.get(id).ok_or_else(|| RomqlError::UnknownIdentifier {
            name: id.to_string(),
            suggestion: did_you_mean(id, self.columns.iter().map(|c| c.id.as_str())),
        })
    }

    /// Map a filter identifier to its column.
    pub fn resolve_identifier(&self, identifier: &str) -> RomqlResult<&UsableColumn> {
        self.columns
            .iter()
            .find(|c| c.matches_identifier(identifier))
            .ok_or_else(|| RomqlError::UnknownIdentifier {
                name: identifier.to_string(),
                suggestion: did_you_mean(
                    identifier,
                    self.columns.iter().flat_map(|c| c.filters.iter().map(String::as_str)),
                ),
            })
    }

    /// Columns whose requirements `schema` meets.
    pub fn fulfillable(&self, schema: &DbSchema) -> FulfillableColumnSet {
        self.columns
            .iter()
            .filter(|c| validate(c, schema))
            .map(|c| c.id.clone())
            .collect()
    }

    /// True when `schema` has the root table and key column every
    /// statement selects.
    pub fn accepts(&self, schema: &DbSchema) -> bool {
        schema.has_column(&self.root_table, &self.key_column)
    }

    /// JOIN clauses connecting `tables` to the root table inside attached
    /// schema `schema_name`, dependencies first, each table at most once.
    pub fn join_clauses<S: AsRef<str>>(
        &self,
        schema_name: &str,
        tables: &[S],
    ) -> RomqlResult<Vec<String>> {
        let mut pending: Vec<String> = Vec::new();
        for table in tables {
            let table = table.as_ref();
            if !pending.iter().any(|p| p.eq_ignore_ascii_case(table)) {
                pending.push(table.to_string());
            }
        }

        let mut emitted: Vec<String> = Vec::new();
        let mut clauses = Vec::new();
        while let Some(next) = pending.first().cloned() {
            self.emit_join(schema_name, &next, &mut pending, &mut emitted, &mut clauses)?;
        }
        Ok(clauses)
    }

    fn emit_join(
        &self,
        schema_name: &str,
        table: &str,
        pending: &mut Vec<String>,
        emitted: &mut Vec<String>,
        clauses: &mut Vec<String>,
    ) -> RomqlResult<()> {
        pending.retain(|p| !p.eq_ignore_ascii_case(table));
        if table.eq_ignore_ascii_case(&self.root_table)
            || emitted.iter().any(|e| e.eq_ignore_ascii_case(table))
        {
            return Ok(());
        }

        let join = self.join_for(table).ok_or_else(|| {
            RomqlError::Config(format!("no join path to table '{}'", table))
        })?;
        if let Some(dep) = &join.requires {
            self.emit_join(schema_name, dep, pending, emitted, clauses)?;
        }
        clauses.push(join.render(schema_name));
        emitted.push(table.to_string());
        Ok(())
    }

    fn join_for(&self, table: &str) -> Option<&JoinDef> {
        self.joins.get(&table.to_ascii_lowercase())
    }

    fn is_reachable(&self, table: &str) -> bool {
        table.eq_ignore_ascii_case(&self.root_table) || self.join_for(table).is_some()
    }

    fn check_acyclic(&self, start: &str) -> RomqlResult<()> {
        let mut current = start.to_string();
        for _ in 0..=self.joins.len() {
            match self.join_for(&current).and_then(|j| j.requires.clone()) {
                Some(dep) => current = dep,
                None => return Ok(()),
            }
        }
        Err(RomqlError::Config(format!(
            "join dependencies of '{}' form a cycle",
            start
        )))
    }

    fn check_column(&self, column: &UsableColumn) -> RomqlResult<()> {
        let fail = |msg: String| RomqlError::Config(format!("column '{}': {}", column.id, msg));

        let alias = split_alias(&column.select)
            .map(|(_, a)| a)
            .ok_or_else(|| fail(format!("projection '{}' has no 'AS <alias>'", column.select)))?;
        match column.filters.first() {
            None => return Err(fail("no filter identifiers".into())),
            Some(first) if first != alias => {
                return Err(fail(format!(
                    "first filter identifier '{}' must equal projection alias '{}'",
                    first, alias
                )));
            }
            Some(_) => {}
        }

        for qualified in &column.columns {
            let Some((table, _)) = qualified.split_once('.') else {
                return Err(fail(format!("required column '{}' is not Table.Column", qualified)));
            };
            if !column.tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                return Err(fail(format!("table '{}' is used but not required", table)));
            }
        }
        for table in &column.tables {
            if !self.is_reachable(table) {
                return Err(fail(format!("no join path to table '{}'", table)));
            }
        }
        Ok(())
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Find the best match with Levenshtein distance <= 3.
fn did_you_mean<'a>(input: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let threshold = match input.len() {
        0..=2 => 0,
        3..=5 => 2,
        _ => 3,
    };
    let needle = input.to_ascii_lowercase();

    let mut best: Option<(&str, usize)> = None;
    for cand in candidates {
        let dist = levenshtein(&needle, &cand.to_ascii_lowercase());
        if dist <= threshold && best.is_none_or(|(_, d)| dist < d) {
            best = Some((cand, dist));
        }
    }
    best.map(|(c, _)| c.to_string())
}
