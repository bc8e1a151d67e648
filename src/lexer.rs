//! Filter expression tokenizer built on nom.
//!
//! Turns filter text such as
//!
//! ```text
//! Years.Year BETWEEN 1983 AND 1985 AND Name LIKE '%kong%'
//! ```
//!
//! into a flat token stream. Each token keeps the byte span it was read
//! from so the parser can point at the offending input.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit0, digit1, multispace1, satisfy},
    combinator::{map, not, opt, peek, recognize},
    sequence::{pair, terminated, tuple},
    IResult,
};

use crate::error::{RomqlError, RomqlResult};

/// Token classes produced by [`tokenize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Integer,
    Float,
    /// The `NULL` literal.
    Null,
    /// Word operators: `AND`, `OR`, `LIKE`, `REGEXP`, `IS`, `IS NOT`,
    /// `ESCAPE`, `BETWEEN`.
    Keyword,
    /// Symbolic comparison operators.
    Operator,
    Identifier,
    String,
    LParen,
    RParen,
}

/// Byte range of a token inside the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A single lexical token.
///
/// `text` holds the normalized literal: keywords are upper-cased
/// (`is  not` becomes `IS NOT`), string literals are unquoted with `''`
/// collapsed to `'`, everything else is the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

/// Tokenize a whole filter expression.
pub fn tokenize(input: &str) -> RomqlResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        let start = input.len() - rest.len();

        if rest.starts_with('\'') {
            let (remaining, text) = string_literal(rest)
                .ok_or_else(|| RomqlError::lex(start, "unterminated string literal"))?;
            let end = input.len() - remaining.len();
            tokens.push(Token {
                kind: TokenKind::String,
                text,
                span: Span { start, end },
            });
            rest = remaining;
            continue;
        }

        match token(rest) {
            Ok((remaining, (kind, raw))) => {
                let end = input.len() - remaining.len();
                tokens.push(Token {
                    kind,
                    text: normalize(kind, raw),
                    span: Span { start, end },
                });
                rest = remaining;
            }
            Err(_) => {
                let found = rest.chars().next().unwrap_or_default();
                return Err(RomqlError::lex(
                    start,
                    format!("unrecognized input starting at '{}'", found),
                ));
            }
        }
    }

    Ok(tokens)
}

fn normalize(kind: TokenKind, raw: &str) -> String {
    match kind {
        TokenKind::Keyword | TokenKind::Null => raw
            .split_whitespace()
            .map(|w| w.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(" "),
        _ => raw.to_string(),
    }
}

/// One non-string token. Alternatives are tried in priority order.
fn token(input: &str) -> IResult<&str, (TokenKind, &str)> {
    alt((
        map(float, |t| (TokenKind::Float, t)),
        map(integer, |t| (TokenKind::Integer, t)),
        map(word("NULL"), |t| (TokenKind::Null, t)),
        map(keyword, |t| (TokenKind::Keyword, t)),
        map(comparison, |t| (TokenKind::Operator, t)),
        map(identifier, |t| (TokenKind::Identifier, t)),
        map(recognize(char('(')), |t| (TokenKind::LParen, t)),
        map(recognize(char(')')), |t| (TokenKind::RParen, t)),
    ))(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Succeeds without consuming when the next char cannot continue a word.
fn boundary(input: &str) -> IResult<&str, ()> {
    not(peek(satisfy(is_ident_char)))(input)
}

/// `[0-9]+\.[0-9]*`, optionally negative. Tried before [`integer`].
fn float(input: &str) -> IResult<&str, &str> {
    terminated(
        recognize(tuple((opt(char('-')), digit1, char('.'), digit0))),
        boundary,
    )(input)
}

fn integer(input: &str) -> IResult<&str, &str> {
    terminated(recognize(pair(opt(char('-')), digit1)), boundary)(input)
}

/// Case-insensitive keyword that must not run into an identifier char.
fn word(kw: &'static str) -> impl Fn(&str) -> IResult<&str, &str> {
    move |input| terminated(tag_no_case(kw), boundary)(input)
}

fn keyword(input: &str) -> IResult<&str, &str> {
    alt((
        terminated(
            recognize(tuple((tag_no_case("IS"), multispace1, tag_no_case("NOT")))),
            boundary,
        ),
        word("AND"),
        word("OR"),
        word("REGEXP"),
        word("LIKE"),
        word("IS"),
        word("ESCAPE"),
        word("BETWEEN"),
    ))(input)
}

/// Longest match first.
fn comparison(input: &str) -> IResult<&str, &str> {
    alt((
        tag("<="),
        tag(">="),
        tag("<>"),
        tag("=="),
        tag("!="),
        tag("<"),
        tag(">"),
        tag("="),
        tag("~"),
    ))(input)
}

fn identifier_part(input: &str) -> IResult<&str, &str> {
    recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)
}

/// `Column` or `Table.Column`.
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(identifier_part, opt(pair(char('.'), identifier_part))))(input)
}

/// Scan a single-quoted string starting at `input`. Returns the remaining
/// input and the unescaped content, or `None` if the closing quote is missing.
fn string_literal(input: &str) -> Option<(&str, String)> {
    let mut rest = input.strip_prefix('\'')?;
    let mut content = String::new();

    loop {
        let (after, chunk) =
            take_while::<_, _, nom::error::Error<&str>>(|c: char| c != '\'')(rest).ok()?;
        content.push_str(chunk);
        if let Some(after_escape) = after.strip_prefix("''") {
            content.push('\'');
            rest = after_escape;
        } else if let Some(after_quote) = after.strip_prefix('\'') {
            return Some((after_quote, content));
        } else {
            return None;
        }
    }
}
