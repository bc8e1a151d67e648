//! Per-column filter criteria.
//!
//! The simplified filter UI shows one text box under each column. A row of
//! boxes is an AND group; several rows are ORed. Box contents use a tiny
//! encoding:
//!
//! | text        | meaning                         |
//! |-------------|---------------------------------|
//! | `soft`      | `LIKE '%soft%'`                  |
//! | `=5`, `<>x` | comparison (also `<` `<=` `>` `>=`) |
//! | `=NULL`     | `IS NULL` (`<>NULL`: `IS NOT NULL`) |
//! | `10~20`     | `BETWEEN 10 AND 20`              |
//! | `/^a/`      | `REGEXP '^a'`                    |
//!
//! [`expr_to_criteria`] fills the boxes from a parsed filter,
//! [`criteria_to_where`] turns them back into filter text.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::ast::{Expr, LiteralKind, Operator};
use crate::catalog::Catalog;
use crate::error::{RomqlError, RomqlResult};
use crate::parser::parse;
use crate::transpiler::{quote_string, ToSql};

/// Column id → box text, for one AND group.
pub type CriteriaRow = BTreeMap<String, String>;

/// What to do with a term that has no per-column form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Fail the whole translation.
    #[default]
    Strict,
    /// Drop the term and keep going.
    Lenient,
}

/// Parse `filter` and translate it into criteria rows.
pub fn filter_to_criteria(
    filter: &str,
    catalog: &Catalog,
    mode: Strictness,
) -> RomqlResult<Vec<CriteriaRow>> {
    let expr = parse(filter)?;
    expr_to_criteria(&expr, catalog, mode)
}

/// Translate a filter tree into OR-rows of per-column criteria.
///
/// The tree is expanded to disjunctive normal form first, so
/// `a AND (b OR c)` fills two rows, `{a, b}` and `{a, c}`.
pub fn expr_to_criteria(
    expr: &Expr,
    catalog: &Catalog,
    mode: Strictness,
) -> RomqlResult<Vec<CriteriaRow>> {
    let flat = expr.clone().flatten_logical();
    let groups = match flat.disjunctive_groups() {
        Ok(groups) => groups,
        Err(e) if mode == Strictness::Lenient => {
            warn!(error = %e, "filter too large for per-column criteria");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };
    let mut rows = Vec::new();

    for group in groups {
        let mut row = CriteriaRow::new();
        for term in group {
            let (column, text) = match reduce_term(term, catalog, mode) {
                Ok(reduced) => reduced,
                Err(e) if mode == Strictness::Lenient => {
                    warn!(error = %e, "dropping filter term");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(previous) = row.get(&column) {
                if mode == Strictness::Strict {
                    return Err(RomqlError::Translation(format!(
                        "column '{}' is constrained twice in one group ('{}' and '{}')",
                        column, previous, text
                    )));
                }
                warn!(
                    column = %column,
                    dropped = %previous,
                    "column constrained twice, keeping the later term"
                );
            }
            row.insert(column, text);
        }
        if !row.is_empty() {
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Reduce one comparison to `(column id, box text)`.
///
/// In strict mode the box must decode back to exactly `term`. Lenient mode
/// also accepts a box that decodes to some other term.
fn reduce_term(
    term: &Expr,
    catalog: &Catalog,
    mode: Strictness,
) -> RomqlResult<(String, String)> {
    let Expr::Op { op, operands } = term else {
        return Err(RomqlError::Translation(format!(
            "'{}' is not a comparison",
            describe(term)
        )));
    };
    let [left, right] = operands.as_slice() else {
        return Err(arity_error(*op, operands.len()));
    };

    // Identifier on the left, value on the right.
    let (op, ident, value) = match (left.as_identifier(), right.as_identifier()) {
        (Some(ident), None) => (*op, ident, right),
        (None, Some(ident)) => {
            let flipped = op.flipped().ok_or_else(|| {
                RomqlError::Translation(format!(
                    "{} needs the column on the left of '{}'",
                    op,
                    describe(right)
                ))
            })?;
            (flipped, ident, left)
        }
        (Some(_), Some(_)) => {
            return Err(RomqlError::Translation(format!(
                "{} compares two columns",
                op
            )));
        }
        (None, None) => {
            return Err(RomqlError::Translation(format!(
                "{} does not reference a column",
                op
            )));
        }
    };

    let column = catalog.resolve_identifier(ident)?;

    let text = match op {
        Operator::Between => {
            let Expr::Op {
                op: Operator::And,
                operands: bounds,
            } = value
            else {
                return Err(RomqlError::Translation(
                    "BETWEEN requires 'low AND high'".into(),
                ));
            };
            let [lo, hi] = bounds.as_slice() else {
                return Err(arity_error(Operator::And, bounds.len()));
            };
            format!("{}~{}", value_text(lo)?, value_text(hi)?)
        }
        Operator::Like => strip_brackets(&like_pattern(value)?).to_string(),
        Operator::Regexp => format!("/{}/", value_text(value)?),
        Operator::Is | Operator::Eq => format!("={}", value_text(value)?),
        Operator::IsNot | Operator::Ne => format!("<>{}", value_text(value)?),
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            format!("{}{}", op.sql(), value_text(value)?)
        }
        Operator::Escape | Operator::And | Operator::Or => {
            return Err(RomqlError::Translation(format!(
                "{} has no per-column form",
                op
            )));
        }
    };

    let ident = column.canonical_filter();
    let expected = Expr::binary(op, Expr::ident(ident), value.clone());
    match decodes_to(ident, &text) {
        Some(decoded) if decoded == expected => {}
        Some(_) if mode == Strictness::Lenient => {
            debug!(term = %expected.to_sql(), text = %text, "approximate per-column form");
        }
        _ => {
            return Err(RomqlError::Translation(format!(
                "'{}' has no exact per-column form",
                expected.to_sql()
            )));
        }
    }

    Ok((column.id.clone(), text))
}

/// Parse the term a box decodes to, if it decodes at all.
fn decodes_to(ident: &str, text: &str) -> Option<Expr> {
    if text.trim().is_empty() {
        return None;
    }
    let sql = decode_box(ident, text).ok()?;
    parse(&sql).ok()
}

/// The effective pattern of a `LIKE` operand, looking through `ESCAPE`.
fn like_pattern(value: &Expr) -> RomqlResult<String> {
    match value {
        Expr::Op {
            op: Operator::Escape,
            operands,
        } => match operands.as_slice() {
            [pattern, _escape] => value_text(pattern),
            _ => Err(arity_error(Operator::Escape, operands.len())),
        },
        other => value_text(other),
    }
}

fn value_text(value: &Expr) -> RomqlResult<String> {
    match value.as_literal() {
        Some(lit) if lit.kind != LiteralKind::Identifier => Ok(lit.text.clone()),
        _ => Err(RomqlError::Translation(format!(
            "expected a literal, found '{}'",
            describe(value)
        ))),
    }
}

/// `%x%` → `x`; anything else is returned as written.
fn strip_brackets(pattern: &str) -> &str {
    if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') {
        &pattern[1..pattern.len() - 1]
    } else {
        pattern
    }
}

fn arity_error(op: Operator, found: usize) -> RomqlError {
    RomqlError::Translation(format!("{} takes 2 operands, found {}", op, found))
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Value(lit) => lit.text.clone(),
        Expr::Op { op, .. } => op.sql().to_string(),
    }
}

/// Turn criteria rows back into filter text.
///
/// Terms in a row are ANDed in catalog order and parenthesized; rows are
/// ORed. Blank boxes are skipped, and an all-blank input gives an empty
/// string.
pub fn criteria_to_where(rows: &[CriteriaRow], catalog: &Catalog) -> RomqlResult<String> {
    for row in rows {
        for id in row.keys() {
            catalog.require(id)?;
        }
    }

    let mut groups = Vec::new();
    for row in rows {
        let mut terms = Vec::new();
        for column in catalog.columns() {
            let Some(text) = row.get(&column.id) else {
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            terms.push(decode_box(column.canonical_filter(), text)?);
        }
        if !terms.is_empty() {
            groups.push(format!("({})", terms.join(" AND ")));
        }
    }

    Ok(groups.join(" OR "))
}

const COMPARATORS: [&str; 6] = ["<>", ">=", "<=", "=", ">", "<"];

/// Decode one box into a filter term on `ident`.
fn decode_box(ident: &str, text: &str) -> RomqlResult<String> {
    let text = text.trim();

    if text.len() >= 2 && text.starts_with('/') && text.ends_with('/') {
        let pattern = &text[1..text.len() - 1];
        return Ok(format!("{} REGEXP {}", ident, quote_string(pattern)));
    }

    if let Some(cmp) = COMPARATORS.iter().find(|c| text.starts_with(*c)) {
        let rest = text[cmp.len()..].trim();
        if rest.is_empty() {
            return Err(RomqlError::Translation(format!(
                "'{}' for {} has no value",
                text, ident
            )));
        }
        if rest.eq_ignore_ascii_case("NULL") {
            match *cmp {
                "=" => return Ok(format!("{} IS NULL", ident)),
                "<>" => return Ok(format!("{} IS NOT NULL", ident)),
                _ => {}
            }
        }
        return Ok(format!("{} {} {}", ident, cmp, sql_value(rest)));
    }

    if let Some((lo, hi)) = text.split_once('~') {
        let (lo, hi) = (lo.trim(), hi.trim());
        if looks_numeric(lo) && looks_numeric(hi) {
            return Ok(format!("{} BETWEEN {} AND {}", ident, lo, hi));
        }
    }

    Ok(format!("{} LIKE {}", ident, quote_string(&format!("%{}%", text))))
}

fn sql_value(text: &str) -> String {
    if looks_numeric(text) {
        text.to_string()
    } else {
        quote_string(text)
    }
}

/// `-?[0-9]+(\.[0-9]+)?`
pub(crate) fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (int, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    !int.is_empty()
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(pairs: &[(&str, &str)]) -> CriteriaRow {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn strict(filter: &str) -> RomqlResult<Vec<CriteriaRow>> {
        filter_to_criteria(filter, &Catalog::games(), Strictness::Strict)
    }

    fn lenient(filter: &str) -> Vec<CriteriaRow> {
        filter_to_criteria(filter, &Catalog::games(), Strictness::Lenient).unwrap()
    }

    #[test]
    fn test_grouping_scenario() {
        let rows =
            strict("Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')").unwrap();
        assert_eq!(
            rows,
            vec![
                row(&[("Year", ">=1986"), ("Publisher", "soft")]),
                row(&[("Year", ">=1986"), ("Developer", "=Acme")]),
            ]
        );
    }

    #[test]
    fn test_every_operator() {
        let rows = strict(
            "Years.Year BETWEEN 1983 AND 1985 AND Name ~ '^Sonic' AND Genre IS NULL \
             AND Developer IS NOT NULL AND Players <> 2 AND Publisher = 'Sega'",
        )
        .unwrap();
        assert_eq!(
            rows,
            vec![row(&[
                ("Year", "1983~1985"),
                ("Name", "/^Sonic/"),
                ("Genre", "=NULL"),
                ("Developer", "<>NULL"),
                ("Players", "<>2"),
                ("Publisher", "=Sega"),
            ])]
        );
    }

    #[test]
    fn test_inexact_terms_are_rejected() {
        let inexact = [
            ("Name LIKE '%=Acme%'", Some(("Name", "=Acme"))),
            ("Name LIKE '%/x/%'", Some(("Name", "/x/"))),
            ("Name LIKE '%10~20%'", Some(("Name", "10~20"))),
            ("Publisher = 'NULL'", Some(("Publisher", "=NULL"))),
            (r"Name LIKE '%100\%%' ESCAPE '\'", Some(("Name", r"100\%"))),
            ("Name LIKE 'Sonic%'", Some(("Name", "Sonic%"))),
            ("Publisher = '1942'", Some(("Publisher", "=1942"))),
            ("Year IS 1990", Some(("Year", "=1990"))),
            ("Year = NULL", Some(("Year", "=NULL"))),
            ("Name LIKE '%%'", None),
            ("Name = ''", None),
        ];
        for (filter, approximate) in inexact {
            assert!(
                matches!(strict(filter), Err(RomqlError::Translation(_))),
                "filter: {filter}"
            );
            let expected: Vec<CriteriaRow> =
                approximate.map(|pair| row(&[pair])).into_iter().collect();
            assert_eq!(lenient(filter), expected, "filter: {filter}");
        }
    }

    #[test]
    fn test_undecodable_term_dropped_from_lenient_group() {
        assert_eq!(
            lenient("Name = '' AND Year = 1991"),
            vec![row(&[("Year", "=1991")])]
        );
    }

    #[test]
    fn test_exact_terms_are_kept() {
        assert_eq!(strict("Name LIKE '%50%%'").unwrap(), vec![row(&[("Name", "50%")])]);
        assert_eq!(strict("Name LIKE '%a~b%'").unwrap(), vec![row(&[("Name", "a~b")])]);
        assert_eq!(strict("Name LIKE '%NULL%'").unwrap(), vec![row(&[("Name", "NULL")])]);
        assert_eq!(strict("Name REGEXP '/x/'").unwrap(), vec![row(&[("Name", "//x//")])]);
        assert_eq!(strict("Year == 1990").unwrap(), vec![row(&[("Year", "=1990")])]);
        assert_eq!(strict("Year != -3").unwrap(), vec![row(&[("Year", "<>-3")])]);
    }

    #[test]
    fn test_reversed_comparison_is_normalized() {
        assert_eq!(strict("1986 <= Year").unwrap(), vec![row(&[("Year", ">=1986")])]);
        assert_eq!(strict("'Sega' = Publisher").unwrap(), vec![row(&[("Publisher", "=Sega")])]);
    }

    #[test]
    fn test_strict_rejects_unreducible_terms() {
        assert!(matches!(strict("Name = Publisher"), Err(RomqlError::Translation(_))));
        assert!(matches!(strict("1 = 1"), Err(RomqlError::Translation(_))));
        assert!(matches!(strict("'x' LIKE Name"), Err(RomqlError::Translation(_))));
        assert!(matches!(strict("Name"), Err(RomqlError::Translation(_))));
    }

    #[test]
    fn test_strict_rejects_duplicate_column() {
        assert!(matches!(
            strict("Year > 1980 AND Year < 1990"),
            Err(RomqlError::Translation(_))
        ));
    }

    #[test]
    fn test_unknown_identifier() {
        assert!(matches!(
            strict("Pubisher = 'x'"),
            Err(RomqlError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_lenient_drops_terms_and_empty_rows() {
        let rows = lenient("(Name = Publisher AND Year = 1990) OR 1 = 1 OR Bogus = 3");
        assert_eq!(rows, vec![row(&[("Year", "=1990")])]);
    }

    #[test]
    fn test_large_expansion_is_refused() {
        let filter = (0..16)
            .map(|i| format!("(Year = {} OR Name = 'x{}')", 1980 + i, i))
            .collect::<Vec<_>>()
            .join(" AND ");
        assert!(matches!(strict(&filter), Err(RomqlError::Translation(_))));
        assert_eq!(lenient(&filter), Vec::<CriteriaRow>::new());
    }

    #[test]
    fn test_lenient_keeps_later_duplicate() {
        assert_eq!(
            lenient("Year > 1980 AND Year < 1990"),
            vec![row(&[("Year", "<1990")])]
        );
    }

    #[test]
    fn test_decode_boxes() {
        assert_eq!(decode_box("Name", "soft").unwrap(), "Name LIKE '%soft%'");
        assert_eq!(decode_box("Year", ">=1986").unwrap(), "Year >= 1986");
        assert_eq!(decode_box("Year", " 10 ~ 20 ").unwrap(), "Year BETWEEN 10 AND 20");
        assert_eq!(decode_box("Name", "/^a(b|c)/").unwrap(), "Name REGEXP '^a(b|c)'");
        assert_eq!(decode_box("Genre", "=null").unwrap(), "Genre IS NULL");
        assert_eq!(decode_box("Genre", "<>NULL").unwrap(), "Genre IS NOT NULL");
        assert_eq!(decode_box("Name", "=Tony's").unwrap(), "Name = 'Tony''s'");
        assert_eq!(decode_box("Year", "=-3").unwrap(), "Year = -3");
        assert_eq!(decode_box("Name", "a~b").unwrap(), "Name LIKE '%a~b%'");
        assert!(decode_box("Year", ">=").is_err());
    }

    #[test]
    fn test_criteria_to_where() {
        let rows = vec![
            row(&[("Publisher", "soft"), ("Year", ">=1986")]),
            row(&[("Developer", "=Acme"), ("Year", ">=1986"), ("Genre", " ")]),
        ];
        let sql = criteria_to_where(&rows, &Catalog::games()).unwrap();
        assert_eq!(
            sql,
            "(Year >= 1986 AND Publisher LIKE '%soft%') OR (Year >= 1986 AND Developer = 'Acme')"
        );
    }

    #[test]
    fn test_criteria_to_where_empty() {
        assert_eq!(criteria_to_where(&[], &Catalog::games()).unwrap(), "");
        let blank = vec![row(&[("Name", "")])];
        assert_eq!(criteria_to_where(&blank, &Catalog::games()).unwrap(), "");
    }

    #[test]
    fn test_criteria_to_where_unknown_column() {
        let rows = vec![row(&[("Region", "EU")])];
        assert!(matches!(
            criteria_to_where(&rows, &Catalog::games()),
            Err(RomqlError::UnknownIdentifier { .. })
        ));
    }

    #[test]
    fn test_looks_numeric() {
        assert!(looks_numeric("10"));
        assert!(looks_numeric("-1.5"));
        assert!(!looks_numeric("1."));
        assert!(!looks_numeric("1e5"));
        assert!(!looks_numeric("inf"));
        assert!(!looks_numeric("-"));
    }
}
