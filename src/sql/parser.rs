//! Tokenizer-backed statement splitting.
//!
//! Uses the sqlparser-rs tokenizer with the PostgreSQL dialect so that
//! semicolons inside string literals, quoted identifiers, dollar-quoted bodies
//! and comments never end a statement.

use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::sync::OnceLock;

/// `USE <db>` or `USE [db]`, optionally followed by a semicolon.
static USE_PATTERN: OnceLock<Regex> = OnceLock::new();

fn use_pattern() -> &'static Regex {
    USE_PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*USE\s+(\[?\w+\]?)\s*;?\s*$").expect("USE pattern is valid")
    })
}

/// Splits SQL text into individual statements on top-level semicolons.
///
/// Statements are trimmed and empty ones dropped. If the text cannot be
/// tokenized (an unterminated string, say) every semicolon splits.
pub fn split_statements(sql: &str) -> Vec<String> {
    let cuts = semicolon_offsets(sql).unwrap_or_else(|| {
        sql.char_indices()
            .filter(|(_, ch)| *ch == ';')
            .map(|(i, _)| i)
            .collect()
    });

    let mut statements = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;

    for cut in cuts.into_iter().chain(std::iter::once(sql.len())) {
        let statement = sql[start..cut].trim();
        if !is_blank(statement) {
            statements.push(statement.to_string());
        }
        start = (cut + 1).min(sql.len());
    }

    statements
}

/// Returns the database named by a `USE` statement, without brackets.
pub fn use_database(statement: &str) -> Option<String> {
    let captures = use_pattern().captures(statement)?;
    let name = captures.get(1)?.as_str();

    let name = name
        .strip_prefix('[')
        .and_then(|n| n.strip_suffix(']'))
        .unwrap_or(name);

    Some(name.to_string())
}

/// Returns the first keyword of a statement, upper-cased, skipping comments.
pub(super) fn leading_keyword(statement: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};

    match Tokenizer::new(&dialect, statement).tokenize() {
        Ok(tokens) => tokens.into_iter().find_map(|token| match token {
            Token::Whitespace(_) => None,
            Token::Word(word) if word.quote_style.is_none() => Some(word.value.to_uppercase()),
            _ => Some(String::new()),
        }),
        Err(_) => statement
            .split_whitespace()
            .next()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_ascii_alphabetic())
                    .to_uppercase()
            }),
    }
}

/// Byte offsets of every top-level semicolon, or None if tokenizing fails.
fn semicolon_offsets(sql: &str) -> Option<Vec<usize>> {
    let dialect = PostgreSqlDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .with_unescape(false)
        .tokenize_with_location()
        .ok()?;

    tokens
        .iter()
        .filter(|t| t.token == Token::SemiColon)
        .map(|t| {
            let offset = byte_offset(sql, t.location)?;
            sql[offset..].starts_with(';').then_some(offset)
        })
        .collect()
}

/// Converts a 1-based line/column (in chars) location to a byte offset.
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let mut line_start = 0;
    for _ in 1..location.line {
        line_start += sql[line_start..].find('\n')? + 1;
    }

    let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
    sql[line_start..]
        .char_indices()
        .nth(column)
        .map(|(i, _)| line_start + i)
}

/// True when the text holds nothing but whitespace and comments.
fn is_blank(text: &str) -> bool {
    if text.trim().is_empty() {
        return true;
    }

    let dialect = PostgreSqlDialect {};
    match Tokenizer::new(&dialect, text).tokenize() {
        Ok(tokens) => tokens.iter().all(|t| matches!(t, Token::Whitespace(_))),
        Err(_) => false,
    }
}
