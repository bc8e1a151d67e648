//! Precedence-climbing parser for filter expressions.
//!
//! # Precedence
//!
//! ```text
//! ESCAPE                                        (tightest)
//! = == != <> < <= > >= ~ LIKE REGEXP IS IS NOT BETWEEN
//! AND
//! OR                                            (loosest)
//! ```
//!
//! `x BETWEEN a AND b` needs the `AND` to belong to the `BETWEEN`. The
//! right-hand side of a `BETWEEN` is parsed with a [`ParseContext`] that
//! lifts `AND` above the comparison level for exactly one occurrence; the
//! context is passed by value, so nothing has to be restored afterwards.

use crate::ast::{Expr, LiteralKind, Operator, PREC_AND};
use crate::error::{RomqlError, RomqlResult};
use crate::lexer::{tokenize, Token, TokenKind};

/// How far a `BETWEEN` operand lifts `AND`.
pub const BETWEEN_AND_BOOST: u8 = 3;

/// Precedence overrides in effect for one level of the climb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseContext {
    and_boost: u8,
}

impl ParseContext {
    /// Context for the range operand of a `BETWEEN`.
    fn between_range() -> Self {
        Self {
            and_boost: BETWEEN_AND_BOOST,
        }
    }

    fn precedence(&self, op: Operator) -> u8 {
        match op {
            Operator::And => PREC_AND + self.and_boost,
            _ => op.precedence(),
        }
    }

    fn boosts(&self, op: Operator) -> bool {
        op == Operator::And && self.and_boost > 0
    }
}

/// Tokenize and parse a filter expression.
pub fn parse(input: &str) -> RomqlResult<Expr> {
    let tokens = tokenize(input)?;
    parse_tokens(&tokens)
}

/// Parse a token stream. Every token must be consumed.
pub fn parse_tokens(tokens: &[Token]) -> RomqlResult<Expr> {
    let mut parser = Parser { tokens, pos: 0 };
    if tokens.is_empty() {
        return Err(RomqlError::parse(0, "empty expression"));
    }
    let expr = parser.expression(0, ParseContext::default())?;
    if let Some(tok) = parser.peek() {
        return Err(RomqlError::parse(
            tok.span.start,
            format!("unexpected '{}'", tok.text),
        ));
    }
    Ok(expr)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let tok = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(tok)
    }

    fn end_position(&self) -> usize {
        self.tokens.last().map(|t| t.span.end).unwrap_or(0)
    }

    fn expression(&mut self, min_prec: u8, mut ctx: ParseContext) -> RomqlResult<Expr> {
        let mut lhs = self.operand()?;

        while let Some(tok) = self.peek() {
            let Some(op) = binary_operator(tok) else {
                break;
            };
            let prec = ctx.precedence(op);
            if prec < min_prec {
                break;
            }
            self.advance();

            // The lifted AND is spent once it has been taken.
            if ctx.boosts(op) {
                ctx = ParseContext::default();
            }

            let rhs = if op == Operator::Between {
                let range = self.expression(prec + 1, ParseContext::between_range())?;
                if range.operator() != Some(Operator::And) {
                    return Err(RomqlError::parse(
                        tok.span.start,
                        "BETWEEN requires 'low AND high'",
                    ));
                }
                range
            } else {
                self.expression(prec + 1, ParseContext::default())?
            };

            lhs = Expr::binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn operand(&mut self) -> RomqlResult<Expr> {
        let Some(tok) = self.advance() else {
            return Err(RomqlError::parse(
                self.end_position(),
                "expected a value, found end of input",
            ));
        };

        let kind = match tok.kind {
            TokenKind::LParen => {
                let inner = self.expression(0, ParseContext::default())?;
                return match self.advance() {
                    Some(close) if close.kind == TokenKind::RParen => Ok(inner),
                    Some(other) => Err(RomqlError::parse(
                        other.span.start,
                        format!(
                            "expected ')' to close '(' at {}, found '{}'",
                            tok.span.start, other.text
                        ),
                    )),
                    None => Err(RomqlError::parse(
                        tok.span.start,
                        "unclosed parenthesis",
                    )),
                };
            }
            TokenKind::Integer => LiteralKind::Integer,
            TokenKind::Float => LiteralKind::Float,
            TokenKind::String => LiteralKind::String,
            TokenKind::Null => LiteralKind::Null,
            TokenKind::Identifier => LiteralKind::Identifier,
            TokenKind::Keyword | TokenKind::Operator | TokenKind::RParen => {
                return Err(RomqlError::parse(
                    tok.span.start,
                    format!("expected a value, found '{}'", tok.text),
                ));
            }
        };

        Ok(Expr::literal(kind, tok.text.clone()))
    }
}

fn binary_operator(tok: &Token) -> Option<Operator> {
    match tok.kind {
        TokenKind::Keyword | TokenKind::Operator => Operator::from_token(&tok.text),
        _ => None,
    }
}
