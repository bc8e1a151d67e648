//! # romql
//!
//! Filter expressions and federated queries over per-platform game
//! catalogue databases.
//!
//! A filter is a small SQL `WHERE` dialect. It is parsed into an [`ast::Expr`],
//! which is then used two ways: decomposed into per-column criteria for a
//! "box under each column" UI ([`criteria`]), and embedded into one SELECT per
//! attached SQLite database ([`builder`]). Databases may each lack some
//! tables or columns; missing catalog columns come back as `NULL` instead of
//! failing the query.
//!
//! ## Quick Example
//!
//! ```
//! use romql::prelude::*;
//!
//! let expr = romql::parse("Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')")?;
//! let rows = expr_to_criteria(&expr, &Catalog::games(), Strictness::Strict)?;
//!
//! assert_eq!(rows.len(), 2);
//! assert_eq!(rows[0]["Publisher"], "soft");
//! assert_eq!(rows[1]["Developer"], "=Acme");
//! # Ok::<(), RomqlError>(())
//! ```
//!
//! ## Filter dialect
//!
//! | Operator                   | Example                          |
//! |----------------------------|----------------------------------|
//! | `= == != <> < <= > >=`     | `Year >= 1986`                   |
//! | `LIKE ... [ESCAPE 'c']`    | `Name LIKE '%Mario%'`            |
//! | `REGEXP`, `~`              | `Name ~ '^Sonic'`                |
//! | `IS [NOT] NULL`            | `Genre IS NOT NULL`              |
//! | `BETWEEN ... AND ...`      | `Years.Year BETWEEN 1983 AND 1985` |
//! | `AND`, `OR`, `( )`         | `a = 1 AND (b = 2 OR c = 3)`     |

pub mod ast;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod merge;
pub mod parser;
pub mod schema;
pub mod transpiler;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::catalog::{Catalog, CatalogDef, ColumnKind, JoinDef, UsableColumn};
    pub use crate::config::RomqlConfig;
    pub use crate::criteria::{
        criteria_to_where, expr_to_criteria, filter_to_criteria, CriteriaRow, Strictness,
    };
    pub use crate::engine::{Federation, QueryRequest};
    pub use crate::error::*;
    pub use crate::merge::{CellValue, QueryResult, SortKey};
    pub use crate::schema::{DbSchema, FulfillableColumnSet};
    pub use crate::transpiler::ToSql;
}

/// Parse a filter expression into an AST.
///
/// # Example
///
/// ```
/// use romql::parse;
/// use romql::ast::Operator;
///
/// let expr = parse("Name LIKE '%Zelda%' OR Year < 1990").unwrap();
/// assert_eq!(expr.operator(), Some(Operator::Or));
/// ```
pub fn parse(input: &str) -> Result<ast::Expr, error::RomqlError> {
    parser::parse(input)
}
