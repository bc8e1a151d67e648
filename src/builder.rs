//! Federated SELECT generation.
//!
//! Every attachment gets its own statement with the same column shape:
//! columns the attachment cannot fulfill are projected through their
//! placeholder (`NULL AS Genre`), so per-attachment statements can be glued
//! together with `UNION ALL`.
//!
//! ```text
//! SELECT 'snes' AS SchemaName, Game.GameId AS GameId, Game.Name AS Name, NULL AS Genre
//! FROM "snes"."Game" AS Game
//! LEFT JOIN "snes"."Years" AS Years ON Years.GameId = Game.GameId
//! WHERE Years.Year >= 1990
//! ```

use tracing::debug;

use crate::ast::Expr;
use crate::catalog::{Catalog, ColumnKind};
use crate::error::{RomqlError, RomqlResult};
use crate::merge::{Collation, SortKey, SortOrder};
use crate::schema::{quote_ident, FulfillableColumnSet};
use crate::transpiler::{quote_string, render_with};

/// Alias of the synthetic first column.
pub const SCHEMA_NAME_COLUMN: &str = "SchemaName";

/// Tables to join and projection terms for one attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectPlan {
    pub tables: Vec<String>,
    pub terms: Vec<String>,
}

impl SelectPlan {
    fn require_tables(&mut self, tables: &[String]) {
        for table in tables {
            if !self.tables.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                self.tables.push(table.clone());
            }
        }
    }
}

/// Work out the projection and the tables it needs.
///
/// Columns referenced only by `filter` still contribute their tables, as
/// long as the attachment can fulfill them.
pub fn plan_select<S: AsRef<str>>(
    catalog: &Catalog,
    fulfillable: &FulfillableColumnSet,
    column_ids: &[S],
    filter: Option<&Expr>,
) -> RomqlResult<SelectPlan> {
    let mut plan = SelectPlan::default();

    for id in column_ids {
        let column = catalog.require(id.as_ref())?;
        if fulfillable.contains(&column.id) {
            plan.terms.push(column.select.clone());
            plan.require_tables(&column.tables);
        } else {
            plan.terms.push(column.placeholder_select());
        }
    }

    if let Some(filter) = filter {
        for ident in filter.identifiers() {
            let column = catalog.resolve_identifier(ident)?;
            if fulfillable.contains(&column.id) {
                plan.require_tables(&column.tables);
            }
        }
    }

    Ok(plan)
}

/// Build the SELECT for one attachment.
pub fn build_select<S: AsRef<str>>(
    catalog: &Catalog,
    schema_name: &str,
    fulfillable: &FulfillableColumnSet,
    column_ids: &[S],
    filter: Option<&Expr>,
) -> RomqlResult<String> {
    let plan = plan_select(catalog, fulfillable, column_ids, filter)?;
    let joins = catalog.join_clauses(schema_name, &plan.tables)?;

    let mut terms = vec![
        format!("{} AS {}", quote_string(schema_name), SCHEMA_NAME_COLUMN),
        catalog.key_select(),
    ];
    terms.extend(plan.terms);

    let mut sql = format!(
        "SELECT {} FROM {}.{} AS {}",
        terms.join(", "),
        quote_ident(schema_name),
        quote_ident(catalog.root_table()),
        catalog.root_table()
    );
    for join in joins {
        sql.push(' ');
        sql.push_str(&join);
    }
    if let Some(filter) = filter {
        let where_sql = where_clause(catalog, fulfillable, filter)?;
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }

    debug!(schema = schema_name, %sql, "built select");
    Ok(sql)
}

/// Render `filter` against one attachment: catalog identifiers become
/// projection expressions, or `NULL` where the attachment lacks them.
pub fn where_clause(
    catalog: &Catalog,
    fulfillable: &FulfillableColumnSet,
    filter: &Expr,
) -> RomqlResult<String> {
    render_with(filter, |name| {
        let column = catalog.resolve_identifier(name)?;
        Ok(if fulfillable.contains(&column.id) {
            column.expression().to_string()
        } else {
            "NULL".to_string()
        })
    })
}

/// Result column names for a projection of `column_ids`.
pub fn result_columns<S: AsRef<str>>(
    catalog: &Catalog,
    column_ids: &[S],
) -> RomqlResult<Vec<String>> {
    let mut names = vec![
        SCHEMA_NAME_COLUMN.to_string(),
        catalog.key_column().to_string(),
    ];
    for id in column_ids {
        names.push(catalog.require(id.as_ref())?.result_name().to_string());
    }
    Ok(names)
}

/// Bind sort keys to result columns.
///
/// A key may name a requested column by id or alias, or one of the two
/// leading columns. Text columns sort under `NOCASE`.
pub fn resolve_sort<S: AsRef<str>>(
    catalog: &Catalog,
    column_ids: &[S],
    keys: &[SortKey],
) -> RomqlResult<Vec<(String, SortOrder)>> {
    let mut resolved = Vec::with_capacity(keys.len());
    for key in keys {
        let order = |index: usize, collation: Collation| SortOrder {
            index,
            descending: key.descending,
            collation,
        };

        if key.column.eq_ignore_ascii_case(SCHEMA_NAME_COLUMN) {
            resolved.push((SCHEMA_NAME_COLUMN.to_string(), order(0, Collation::NoCase)));
            continue;
        }
        if key.column.eq_ignore_ascii_case(catalog.key_column()) {
            resolved.push((catalog.key_column().to_string(), order(1, Collation::Binary)));
            continue;
        }

        let found = column_ids.iter().enumerate().find_map(|(i, id)| {
            let column = catalog.get(id.as_ref())?;
            (column.id.eq_ignore_ascii_case(&key.column)
                || column.result_name().eq_ignore_ascii_case(&key.column))
            .then_some((i, column))
        });
        let Some((i, column)) = found else {
            return Err(RomqlError::Translation(format!(
                "cannot sort by '{}': not a selected column",
                key.column
            )));
        };
        let collation = match column.kind {
            ColumnKind::Text => Collation::NoCase,
            ColumnKind::Integer | ColumnKind::Real => Collation::Binary,
        };
        resolved.push((column.result_name().to_string(), order(i + 2, collation)));
    }
    Ok(resolved)
}

/// `ORDER BY` clause for resolved sort keys, empty when there are none.
pub fn order_by_clause(resolved: &[(String, SortOrder)]) -> String {
    if resolved.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = resolved
        .iter()
        .map(|(alias, order)| {
            format!(
                "{}{} {}",
                alias,
                order.collation.sql_suffix(),
                if order.descending { "DESC" } else { "ASC" }
            )
        })
        .collect();
    format!(" ORDER BY {}", terms.join(", "))
}

/// Glue per-attachment statements into one container statement.
pub fn union_all(statements: &[String], order_by: &str) -> String {
    format!("{}{}", statements.join(" UNION ALL "), order_by)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::schema::DbSchema;
    use pretty_assertions::assert_eq;

    fn names_only() -> FulfillableColumnSet {
        let mut schema = DbSchema::new();
        schema.add_table(
            "Game",
            &[("GameId", "INTEGER"), ("Name", "TEXT"), ("GenreId", "INTEGER")],
        );
        Catalog::games().fulfillable(&schema)
    }

    fn with_genres() -> FulfillableColumnSet {
        let mut schema = DbSchema::new();
        schema.add_table(
            "Game",
            &[("GameId", "INTEGER"), ("Name", "TEXT"), ("GenreId", "INTEGER")],
        );
        schema.add_table("Years", &[("GameId", "INTEGER"), ("Year", "INTEGER")]);
        schema.add_table(
            "Genre",
            &[("GenreId", "INTEGER"), ("Name", "TEXT"), ("ParentGenreId", "INTEGER")],
        );
        schema.add_table("ParentGenre", &[("ParentGenreId", "INTEGER"), ("Name", "TEXT")]);
        Catalog::games().fulfillable(&schema)
    }

    #[test]
    fn test_placeholder_for_unfulfilled_column() {
        let catalog = Catalog::games();
        let sql = build_select(&catalog, "nes", &names_only(), &["Name", "Genre"], None).unwrap();
        assert_eq!(
            sql,
            "SELECT 'nes' AS SchemaName, Game.GameId AS GameId, Game.Name AS Name, NULL AS Genre \
             FROM \"nes\".\"Game\" AS Game"
        );
    }

    #[test]
    fn test_joins_follow_dependencies() {
        let catalog = Catalog::games();
        let sql = build_select(
            &catalog,
            "snes",
            &with_genres(),
            &["Name", "ParentGenre", "Genre"],
            None,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT 'snes' AS SchemaName, Game.GameId AS GameId, Game.Name AS Name, \
             ParentGenre.Name AS ParentGenre, Genre.Name AS Genre \
             FROM \"snes\".\"Game\" AS Game \
             LEFT JOIN \"snes\".\"Genre\" AS Genre ON Genre.GenreId = Game.GenreId \
             LEFT JOIN \"snes\".\"ParentGenre\" AS ParentGenre ON ParentGenre.ParentGenreId = Genre.ParentGenreId"
        );
    }

    #[test]
    fn test_filter_only_column_is_joined() {
        let catalog = Catalog::games();
        let filter = parse("Years.Year BETWEEN 1983 AND 1985").unwrap();
        let sql = build_select(&catalog, "md", &with_genres(), &["Name"], Some(&filter)).unwrap();
        assert_eq!(
            sql,
            "SELECT 'md' AS SchemaName, Game.GameId AS GameId, Game.Name AS Name \
             FROM \"md\".\"Game\" AS Game \
             LEFT JOIN \"md\".\"Years\" AS Years ON Years.GameId = Game.GameId \
             WHERE Years.Year BETWEEN 1983 AND 1985"
        );
    }

    #[test]
    fn test_filter_on_missing_column_becomes_null() {
        let catalog = Catalog::games();
        let filter = parse("Name LIKE '%a%' AND (Year > 1990 OR Genre IS NULL)").unwrap();
        let sql = where_clause(&catalog, &names_only(), &filter).unwrap();
        assert_eq!(sql, "Game.Name LIKE '%a%' AND (NULL > 1990 OR NULL IS NULL)");
    }

    #[test]
    fn test_unknown_identifier_in_filter() {
        let catalog = Catalog::games();
        let filter = parse("Nmae = 'x'").unwrap();
        let err =
            build_select(&catalog, "x", &names_only(), &["Name"], Some(&filter)).unwrap_err();
        assert!(matches!(
            err,
            RomqlError::UnknownIdentifier { ref suggestion, .. }
                if suggestion.as_deref() == Some("Name")
        ));
    }

    #[test]
    fn test_unknown_requested_column() {
        let catalog = Catalog::games();
        assert!(plan_select(&catalog, &names_only(), &["Region"], None).is_err());
    }

    #[test]
    fn test_sort_resolution_and_order_by() {
        let catalog = Catalog::games();
        let keys = vec![SortKey::asc("name"), SortKey::desc("Year"), SortKey::asc("SchemaName")];
        let resolved = resolve_sort(&catalog, &["Year", "Name"], &keys).unwrap();
        assert_eq!(resolved[0].1.index, 3);
        assert_eq!(resolved[1].1.index, 2);
        assert_eq!(resolved[2].1.index, 0);
        assert_eq!(
            order_by_clause(&resolved),
            " ORDER BY Name COLLATE NOCASE ASC, Year DESC, SchemaName COLLATE NOCASE ASC"
        );
        assert_eq!(order_by_clause(&[]), "");
    }

    #[test]
    fn test_sort_on_unselected_column_fails() {
        let catalog = Catalog::games();
        assert!(resolve_sort(&catalog, &["Name"], &[SortKey::asc("Year")]).is_err());
    }

    #[test]
    fn test_result_columns() {
        let catalog = Catalog::games();
        assert_eq!(
            result_columns(&catalog, &["Name", "Genre"]).unwrap(),
            vec!["SchemaName", "GameId", "Name", "Genre"]
        );
    }

    #[test]
    fn test_union_all() {
        let stmts = vec!["SELECT 1".to_string(), "SELECT 2".to_string()];
        assert_eq!(union_all(&stmts, " ORDER BY 1"), "SELECT 1 UNION ALL SELECT 2 ORDER BY 1");
    }
}
