//! Abstract syntax tree for filter expressions.
//!
//! A parsed filter is a single-rooted tree of [`Expr`] nodes. Every
//! operator carries exactly two operands straight out of the parser;
//! [`Expr::flatten`] then collapses `AND`/`OR` chains into n-ary groups.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RomqlError, RomqlResult};

/// Kind of a leaf value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiteralKind {
    Integer,
    Float,
    String,
    Null,
    Identifier,
}

/// A leaf: literal value or column identifier.
///
/// For strings `text` is the unescaped content, for identifiers the name as
/// written (`Years.Year` or `Year`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal {
    pub kind: LiteralKind,
    pub text: String,
}

/// Operators of the filter dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Or,
    And,
    /// `=` or `==`
    Eq,
    /// `!=` or `<>`
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    /// `REGEXP` or `~`
    Regexp,
    Is,
    IsNot,
    /// `x BETWEEN lo AND hi`, stored as `Between(x, And(lo, hi))`.
    Between,
    /// `pattern ESCAPE 'c'`, the right operand of a `LIKE`.
    Escape,
}

/// Precedence levels, higher binds tighter.
pub const PREC_OR: u8 = 1;
pub const PREC_AND: u8 = 2;
pub const PREC_COMPARISON: u8 = 3;
pub const PREC_ESCAPE: u8 = 4;

/// Upper bound on the groups [`Expr::disjunctive_groups`] will produce.
pub const MAX_DISJUNCTIVE_GROUPS: usize = 4096;

impl Operator {
    /// Map a normalized keyword or symbol token to its operator.
    pub fn from_token(text: &str) -> Option<Self> {
        let op = match text {
            "OR" => Operator::Or,
            "AND" => Operator::And,
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "LIKE" => Operator::Like,
            "REGEXP" | "~" => Operator::Regexp,
            "IS" => Operator::Is,
            "IS NOT" => Operator::IsNot,
            "BETWEEN" => Operator::Between,
            "ESCAPE" => Operator::Escape,
            _ => return None,
        };
        Some(op)
    }

    /// Base binding strength.
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Or => PREC_OR,
            Operator::And => PREC_AND,
            Operator::Escape => PREC_ESCAPE,
            _ => PREC_COMPARISON,
        }
    }

    /// SQL spelling.
    pub fn sql(self) -> &'static str {
        match self {
            Operator::Or => "OR",
            Operator::And => "AND",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::Regexp => "REGEXP",
            Operator::Is => "IS",
            Operator::IsNot => "IS NOT",
            Operator::Between => "BETWEEN",
            Operator::Escape => "ESCAPE",
        }
    }

    /// `AND` and `OR`.
    pub fn is_logical(self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }

    /// The operator that gives the same result with operands swapped,
    /// if there is one.
    pub fn flipped(self) -> Option<Self> {
        match self {
            Operator::Eq | Operator::Ne => Some(self),
            Operator::Lt => Some(Operator::Gt),
            Operator::Le => Some(Operator::Ge),
            Operator::Gt => Some(Operator::Lt),
            Operator::Ge => Some(Operator::Le),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

/// A filter expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Value(Literal),
    Op { op: Operator, operands: Vec<Expr> },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Self::literal(LiteralKind::Identifier, name)
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::literal(LiteralKind::String, text)
    }

    pub fn integer(n: i64) -> Self {
        Self::literal(LiteralKind::Integer, n.to_string())
    }

    pub fn null() -> Self {
        Self::literal(LiteralKind::Null, "NULL")
    }

    pub fn literal(kind: LiteralKind, text: impl Into<String>) -> Self {
        Expr::Value(Literal {
            kind,
            text: text.into(),
        })
    }

    pub fn binary(op: Operator, left: Expr, right: Expr) -> Self {
        Expr::Op {
            op,
            operands: vec![left, right],
        }
    }

    pub fn nary(op: Operator, operands: Vec<Expr>) -> Self {
        Expr::Op { op, operands }
    }

    /// The leaf literal, if this is a value node.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Value(lit) => Some(lit),
            Expr::Op { .. } => None,
        }
    }

    /// The identifier name, if this is an identifier leaf.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expr::Value(Literal {
                kind: LiteralKind::Identifier,
                text,
            }) => Some(text),
            _ => None,
        }
    }

    /// Operator of an operator node.
    pub fn operator(&self) -> Option<Operator> {
        match self {
            Expr::Op { op, .. } => Some(*op),
            Expr::Value(_) => None,
        }
    }

    /// Collapse nested chains of `op` into a single n-ary node.
    ///
    /// Operand order is preserved left to right. Applying it twice gives
    /// the same tree as applying it once.
    pub fn flatten(self, target: Operator) -> Expr {
        match self {
            Expr::Value(_) => self,
            Expr::Op { op, operands } => {
                let operands = operands.into_iter().map(|e| e.flatten(target));
                if op != target {
                    return Expr::Op {
                        op,
                        operands: operands.collect(),
                    };
                }
                let mut flat = Vec::new();
                for child in operands {
                    match child {
                        Expr::Op {
                            op: child_op,
                            operands: grand,
                        } if child_op == target => flat.extend(grand),
                        other => flat.push(other),
                    }
                }
                Expr::Op { op, operands: flat }
            }
        }
    }

    /// Flatten both `AND` and `OR` chains.
    pub fn flatten_logical(self) -> Expr {
        self.flatten(Operator::And).flatten(Operator::Or)
    }

    /// Expand into disjunctive normal form: a list of OR-groups, each a
    /// list of terms that are implicitly ANDed.
    ///
    /// `AND` distributes over `OR`, so `a AND (b OR c)` yields
    /// `[[a, b], [a, c]]`. A `BETWEEN` range is a term, not a conjunction.
    /// Fails once the expansion would exceed [`MAX_DISJUNCTIVE_GROUPS`].
    pub fn disjunctive_groups(&self) -> RomqlResult<Vec<Vec<&Expr>>> {
        match self {
            Expr::Op {
                op: Operator::Or,
                operands,
            } => {
                let mut groups = Vec::new();
                for operand in operands {
                    groups.extend(operand.disjunctive_groups()?);
                    check_group_count(groups.len())?;
                }
                Ok(groups)
            }
            Expr::Op {
                op: Operator::And,
                operands,
            } => {
                let mut groups: Vec<Vec<&Expr>> = vec![Vec::new()];
                for operand in operands {
                    let alternatives = operand.disjunctive_groups()?;
                    check_group_count(groups.len().saturating_mul(alternatives.len()))?;
                    let mut next = Vec::with_capacity(groups.len() * alternatives.len());
                    for group in &groups {
                        for alt in &alternatives {
                            let mut combined = group.clone();
                            combined.extend(alt.iter().copied());
                            next.push(combined);
                        }
                    }
                    groups = next;
                }
                Ok(groups)
            }
            _ => Ok(vec![vec![self]]),
        }
    }

    /// Every identifier leaf, in source order, duplicates included.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Value(_) => {
                if let Some(name) = self.as_identifier() {
                    out.push(name);
                }
            }
            Expr::Op { operands, .. } => {
                for operand in operands {
                    operand.collect_identifiers(out);
                }
            }
        }
    }
}

fn check_group_count(count: usize) -> RomqlResult<()> {
    if count > MAX_DISJUNCTIVE_GROUPS {
        return Err(RomqlError::Translation(format!(
            "filter expands to more than {} OR-groups",
            MAX_DISJUNCTIVE_GROUPS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn eq(col: &str, n: i64) -> Expr {
        Expr::binary(Operator::Eq, Expr::ident(col), Expr::integer(n))
    }

    #[test]
    fn test_flatten_left_nested_chain() {
        let tree = Expr::binary(
            Operator::And,
            Expr::binary(Operator::And, eq("a", 1), eq("b", 2)),
            eq("c", 3),
        );
        let flat = tree.flatten(Operator::And);
        assert_eq!(
            flat,
            Expr::nary(Operator::And, vec![eq("a", 1), eq("b", 2), eq("c", 3)])
        );
    }

    #[test]
    fn test_flatten_right_nested_and_deep() {
        let tree = Expr::binary(
            Operator::Or,
            eq("a", 1),
            Expr::binary(
                Operator::Or,
                eq("b", 2),
                Expr::binary(Operator::Or, eq("c", 3), eq("d", 4)),
            ),
        );
        let flat = tree.flatten(Operator::Or);
        match flat {
            Expr::Op { op, operands } => {
                assert_eq!(op, Operator::Or);
                assert_eq!(operands, vec![eq("a", 1), eq("b", 2), eq("c", 3), eq("d", 4)]);
            }
            _ => panic!("expected OR node"),
        }
    }

    #[test]
    fn test_flatten_keeps_other_operators_nested() {
        let inner_or = Expr::binary(Operator::Or, eq("b", 2), eq("c", 3));
        let tree = Expr::binary(Operator::And, eq("a", 1), inner_or.clone());
        let flat = tree.clone().flatten(Operator::And);
        assert_eq!(flat, tree);
    }

    #[test]
    fn test_flatten_idempotent() {
        let tree = Expr::binary(
            Operator::And,
            Expr::binary(
                Operator::And,
                eq("a", 1),
                Expr::binary(
                    Operator::Or,
                    eq("b", 2),
                    Expr::binary(Operator::Or, eq("c", 3), eq("d", 4)),
                ),
            ),
            eq("e", 5),
        );
        let once = tree.flatten_logical();
        let twice = once.clone().flatten_logical();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_disjunctive_groups_distributes() {
        let tree = Expr::nary(
            Operator::And,
            vec![
                eq("a", 1),
                Expr::nary(Operator::Or, vec![eq("b", 2), eq("c", 3)]),
            ],
        );
        let groups = tree.disjunctive_groups().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], vec![&eq("a", 1), &eq("b", 2)]);
        assert_eq!(groups[1], vec![&eq("a", 1), &eq("c", 3)]);
    }

    #[test]
    fn test_disjunctive_groups_between_is_a_term() {
        let between = Expr::binary(
            Operator::Between,
            Expr::ident("Year"),
            Expr::binary(Operator::And, Expr::integer(1983), Expr::integer(1985)),
        );
        let groups = between.disjunctive_groups().unwrap();
        assert_eq!(groups, vec![vec![&between]]);
    }

    #[test]
    fn test_disjunctive_groups_are_capped() {
        // 13 two-way alternatives ANDed together would need 8192 groups.
        let clauses = (0..13)
            .map(|i| Expr::nary(Operator::Or, vec![eq("a", i), eq("b", i)]))
            .collect();
        let tree = Expr::nary(Operator::And, clauses);
        assert!(matches!(
            tree.disjunctive_groups(),
            Err(RomqlError::Translation(_))
        ));

        let clauses = (0..12)
            .map(|i| Expr::nary(Operator::Or, vec![eq("a", i), eq("b", i)]))
            .collect();
        let tree = Expr::nary(Operator::And, clauses);
        assert_eq!(tree.disjunctive_groups().unwrap().len(), MAX_DISJUNCTIVE_GROUPS);
    }

    #[test]
    fn test_identifiers_in_order() {
        let tree = Expr::nary(
            Operator::Or,
            vec![eq("Name", 1), eq("Years.Year", 2), eq("Name", 3)],
        );
        assert_eq!(tree.identifiers(), vec!["Name", "Years.Year", "Name"]);
    }

    #[test]
    fn test_flipped() {
        assert_eq!(Operator::Lt.flipped(), Some(Operator::Gt));
        assert_eq!(Operator::Ge.flipped(), Some(Operator::Le));
        assert_eq!(Operator::Like.flipped(), None);
    }
}
