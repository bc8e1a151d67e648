//! SQL rendering for filter ASTs.
//!
//! Turns a parsed [`Expr`] back into WHERE-clause text. Identifiers can be
//! rewritten on the way out through a resolver, which is how the query
//! builder swaps catalog names for projection expressions.

use std::convert::Infallible;

use crate::ast::{Expr, LiteralKind, Operator};
use crate::error::RomqlResult;

/// Trait for converting AST nodes to SQL.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

impl ToSql for Expr {
    fn to_sql(&self) -> String {
        match write_expr::<Infallible>(self, &mut |name: &str| Ok(name.to_string())) {
            Ok(sql) => sql,
            Err(never) => match never {},
        }
    }
}

/// Render `expr`, replacing every identifier with `resolve(name)`.
pub fn render_with<F>(expr: &Expr, mut resolve: F) -> RomqlResult<String>
where
    F: FnMut(&str) -> RomqlResult<String>,
{
    write_expr(expr, &mut resolve)
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn write_expr<E>(
    expr: &Expr,
    resolve: &mut dyn FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    match expr {
        Expr::Value(lit) => Ok(match lit.kind {
            LiteralKind::Identifier => resolve(&lit.text)?,
            LiteralKind::String => quote_string(&lit.text),
            LiteralKind::Null => "NULL".to_string(),
            LiteralKind::Integer | LiteralKind::Float => lit.text.clone(),
        }),
        Expr::Op {
            op: Operator::Between,
            operands,
        } if operands.len() == 2 => {
            let subject = write_child(&operands[0], Operator::Between, false, resolve)?;
            match &operands[1] {
                Expr::Op {
                    op: Operator::And,
                    operands: bounds,
                } if bounds.len() == 2 => {
                    let lo = write_bound(&bounds[0], resolve)?;
                    let hi = write_bound(&bounds[1], resolve)?;
                    Ok(format!("{} BETWEEN {} AND {}", subject, lo, hi))
                }
                other => {
                    let range = write_bound(other, resolve)?;
                    Ok(format!("{} BETWEEN {}", subject, range))
                }
            }
        }
        Expr::Op { op, operands } => {
            let mut parts = Vec::with_capacity(operands.len());
            for (i, operand) in operands.iter().enumerate() {
                parts.push(write_child(operand, *op, i > 0, resolve)?);
            }
            Ok(parts.join(&format!(" {} ", op.sql())))
        }
    }
}

fn write_child<E>(
    child: &Expr,
    parent: Operator,
    is_right: bool,
    resolve: &mut dyn FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let sql = write_expr(child, resolve)?;
    let needs_parens = match child.operator() {
        None => false,
        Some(op) => {
            op.precedence() < parent.precedence()
                || (is_right && op.precedence() == parent.precedence() && !parent.is_logical())
        }
    };
    Ok(if needs_parens { format!("({})", sql) } else { sql })
}

fn write_bound<E>(
    bound: &Expr,
    resolve: &mut dyn FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let sql = write_expr(bound, resolve)?;
    Ok(if bound.operator().is_some() {
        format!("({})", sql)
    } else {
        sql
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RomqlError;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn roundtrip(input: &str) -> String {
        parse(input).unwrap().to_sql()
    }

    #[test]
    fn test_simple_comparison() {
        assert_eq!(roundtrip("Year>=1986"), "Year >= 1986");
        assert_eq!(roundtrip("a == 1"), "a = 1");
        assert_eq!(roundtrip("a != 1"), "a <> 1");
        assert_eq!(roundtrip("a ~ 'x'"), "a REGEXP 'x'");
    }

    #[test]
    fn test_string_quoting() {
        assert_eq!(roundtrip("Name = 'Tony Hawk''s'"), "Name = 'Tony Hawk''s'");
    }

    #[test]
    fn test_or_under_and_is_parenthesized() {
        assert_eq!(
            roundtrip("Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')"),
            "Year >= 1986 AND (Publisher LIKE '%soft%' OR Developer = 'Acme')"
        );
    }

    #[test]
    fn test_between_and_escape() {
        assert_eq!(
            roundtrip("Years.Year between 1983 and 1985"),
            "Years.Year BETWEEN 1983 AND 1985"
        );
        assert_eq!(
            roundtrip(r"Name LIKE 'a\%' ESCAPE '\'"),
            r"Name LIKE 'a\%' ESCAPE '\'"
        );
    }

    #[test]
    fn test_is_not_null() {
        assert_eq!(roundtrip("x is not null"), "x IS NOT NULL");
    }

    #[test]
    fn test_rendered_text_reparses_to_same_tree() {
        let inputs = [
            "a = 1 OR b = 2 AND c = 3",
            "(a = 1 OR b = 2) AND c = 3",
            "X = 1 AND Years.Year BETWEEN 1983 AND 1985 AND Y = 2",
            "Name LIKE '%x%' OR Name REGEXP '^a' OR Name IS NULL",
            "(a = 1 OR (b = 2 AND (c = 3 OR d = 4)))",
        ];
        for input in inputs {
            let tree = parse(input).unwrap();
            let reparsed = parse(&tree.to_sql()).unwrap();
            assert_eq!(
                reparsed.flatten_logical(),
                tree.flatten_logical(),
                "input: {input}"
            );
        }
    }

    #[test]
    fn test_render_with_resolver() {
        let expr = parse("Name = 'x' AND Year > 1990").unwrap();
        let sql = render_with(&expr, |name| {
            Ok(match name {
                "Name" => "Game.Name".to_string(),
                _ => "NULL".to_string(),
            })
        })
        .unwrap();
        assert_eq!(sql, "Game.Name = 'x' AND NULL > 1990");
    }

    #[test]
    fn test_render_with_failing_resolver() {
        let expr = parse("Bogus = 1").unwrap();
        let err = render_with(&expr, |name| Err(RomqlError::Translation(name.to_string())))
            .unwrap_err();
        assert!(matches!(err, RomqlError::Translation(ref n) if n == "Bogus"));
    }
}
