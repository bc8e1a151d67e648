//! Result sets and the cross-container merge sort.
//!
//! When every attachment sits in one container SQLite sorts the rows itself.
//! Otherwise the per-container result sets are concatenated and re-sorted
//! here, with the same ordering SQLite would have used: `NULL` first, then
//! numbers, then text, then blobs; text under `NOCASE` for text columns.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::RomqlError;

/// One result cell, as SQLite stored it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// SQLite storage-class rank.
    fn class(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Integer(_) | CellValue::Real(_) => 1,
            CellValue::Text(_) => 2,
            CellValue::Blob(_) => 3,
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            CellValue::Integer(n) => *n as f64,
            CellValue::Real(r) => *r,
            _ => 0.0,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Real(r) => write!(f, "{}", r),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Text comparison rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collation {
    #[default]
    Binary,
    /// ASCII case folding, like SQLite's `NOCASE`.
    NoCase,
}

impl Collation {
    /// `COLLATE` suffix for an `ORDER BY` term.
    pub fn sql_suffix(self) -> &'static str {
        match self {
            Collation::Binary => "",
            Collation::NoCase => " COLLATE NOCASE",
        }
    }
}

/// Compare two cells the way SQLite orders them.
pub fn compare_cells(a: &CellValue, b: &CellValue, collation: Collation) -> Ordering {
    let by_class = a.class().cmp(&b.class());
    if by_class != Ordering::Equal {
        return by_class;
    }
    match (a, b) {
        (CellValue::Integer(x), CellValue::Integer(y)) => x.cmp(y),
        (CellValue::Text(x), CellValue::Text(y)) => match collation {
            Collation::Binary => x.as_bytes().cmp(y.as_bytes()),
            Collation::NoCase => x
                .bytes()
                .map(|c| c.to_ascii_lowercase())
                .cmp(y.bytes().map(|c| c.to_ascii_lowercase())),
        },
        (CellValue::Blob(x), CellValue::Blob(y)) => x.cmp(y),
        (CellValue::Null, CellValue::Null) => Ordering::Equal,
        _ => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
    }
}

/// A requested sort key: `Name` ascending, `-Name` descending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortKey {
    pub column: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

impl FromStr for SortKey {
    type Err = RomqlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (column, descending) = match s.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (s.strip_prefix('+').unwrap_or(s), false),
        };
        if column.is_empty() {
            return Err(RomqlError::Config(format!("invalid sort key '{}'", s)));
        }
        Ok(Self {
            column: column.to_string(),
            descending,
        })
    }
}

/// A sort key bound to a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub index: usize,
    pub descending: bool,
    pub collation: Collation,
}

/// Stable multi-key sort; later keys only break ties.
pub fn sort_rows(rows: &mut [Vec<CellValue>], order: &[SortOrder]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order {
            let (Some(x), Some(y)) = (a.get(key.index), b.get(key.index)) else {
                continue;
            };
            let ord = compare_cells(x, y, key.collation);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Column names plus rows; the first two columns are always the schema
/// name and the game id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Values of one column, top to bottom.
    pub fn column_values(&self, name: &str) -> Vec<&CellValue> {
        match self.column_index(name) {
            Some(i) => self.rows.iter().filter_map(|r| r.get(i)).collect(),
            None => Vec::new(),
        }
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_records(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let record: serde_json::Map<String, serde_json::Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().map(|cell| serde_json::json!(cell)))
                    .collect();
                serde_json::Value::Object(record)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn names(rows: &[Vec<CellValue>]) -> Vec<String> {
        rows.iter().map(|r| r[0].to_string()).collect()
    }

    #[test]
    fn test_storage_class_order() {
        let mut cells = vec![
            CellValue::Blob(vec![1]),
            text("a"),
            CellValue::Real(2.5),
            CellValue::Null,
            CellValue::Integer(3),
        ];
        cells.sort_by(|a, b| compare_cells(a, b, Collation::Binary));
        assert_eq!(
            cells,
            vec![
                CellValue::Null,
                CellValue::Real(2.5),
                CellValue::Integer(3),
                text("a"),
                CellValue::Blob(vec![1]),
            ]
        );
    }

    #[test]
    fn test_nocase_text() {
        assert_eq!(compare_cells(&text("abc"), &text("ABD"), Collation::NoCase), Ordering::Less);
        assert_eq!(
            compare_cells(&text("abc"), &text("ABD"), Collation::Binary),
            Ordering::Greater
        );
        assert_eq!(
            compare_cells(&text("Zelda"), &text("zelda"), Collation::NoCase),
            Ordering::Equal
        );
    }

    #[test]
    fn test_sort_is_stable_and_multi_key() {
        let mut rows = vec![
            vec![text("b"), CellValue::Integer(1990)],
            vec![text("a"), CellValue::Integer(1991)],
            vec![text("c"), CellValue::Integer(1990)],
            vec![text("d"), CellValue::Integer(1991)],
        ];
        sort_rows(
            &mut rows,
            &[SortOrder {
                index: 1,
                descending: true,
                collation: Collation::Binary,
            }],
        );
        assert_eq!(names(&rows), vec!["a", "d", "b", "c"]);

        sort_rows(
            &mut rows,
            &[
                SortOrder {
                    index: 1,
                    descending: false,
                    collation: Collation::Binary,
                },
                SortOrder {
                    index: 0,
                    descending: true,
                    collation: Collation::NoCase,
                },
            ],
        );
        assert_eq!(names(&rows), vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_nulls_first_ascending_last_descending() {
        let mut rows = vec![vec![text("x")], vec![CellValue::Null], vec![text("a")]];
        let mut order = SortOrder {
            index: 0,
            descending: false,
            collation: Collation::NoCase,
        };
        sort_rows(&mut rows, &[order]);
        assert_eq!(names(&rows), vec!["NULL", "a", "x"]);
        order.descending = true;
        sort_rows(&mut rows, &[order]);
        assert_eq!(names(&rows), vec!["x", "a", "NULL"]);
    }

    #[test]
    fn test_sort_key_from_str() {
        assert_eq!("Name".parse::<SortKey>().unwrap(), SortKey::asc("Name"));
        assert_eq!("-Year".parse::<SortKey>().unwrap(), SortKey::desc("Year"));
        assert_eq!("+Year".parse::<SortKey>().unwrap(), SortKey::asc("Year"));
        assert!("-".parse::<SortKey>().is_err());
    }

    #[test]
    fn test_records() {
        let result = QueryResult {
            columns: vec!["SchemaName".into(), "GameId".into(), "Genre".into()],
            rows: vec![vec![text("snes"), CellValue::Integer(7), CellValue::Null]],
        };
        assert_eq!(
            result.to_records(),
            vec![serde_json::json!({"SchemaName": "snes", "GameId": 7, "Genre": null})]
        );
        assert_eq!(result.column_values("gameid"), vec![&CellValue::Integer(7)]);
    }
}
