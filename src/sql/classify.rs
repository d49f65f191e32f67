//! Statement splitting and classification.
//!
//! Splitting is lexical: `;` ends a statement unless it sits inside a string,
//! quoted identifier, comment, dollar-quoted body or procedural block. A line
//! holding only `/` also ends a statement. Classification of everything that
//! is not a procedural block goes through `sqlparser`; text it cannot parse
//! is classified `Unknown` and left for the engine to judge.

use serde::Serialize;
use sqlparser::ast as sp;
use sqlparser::parser::Parser as SqlParser;

use super::dialect::Dialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatementKind {
    Query,
    Mutation,
    Ddl,
    Transaction,
    Block,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub kind: StatementKind,
    returning: bool,
}

impl Statement {
    pub fn parse(text: impl Into<String>, dialect: &dyn Dialect) -> Self {
        let text = text.into();
        let (kind, returning) = classify_text(&text, dialect);
        Self {
            text,
            kind,
            returning,
        }
    }

    /// Text to send to the engine. The trailing `;` is removed except for
    /// procedural blocks, where it belongs to the final `END`.
    pub fn executable_text(&self) -> &str {
        if self.kind == StatementKind::Block {
            return self.text.trim();
        }
        let trimmed = self.text.trim_end();
        trimmed.strip_suffix(';').unwrap_or(trimmed).trim()
    }

    pub fn returns_rows(&self) -> bool {
        match self.kind {
            StatementKind::Query => true,
            StatementKind::Mutation => self.returning,
            StatementKind::Unknown => matches!(
                leading_words(&self.text, 1).first().map(String::as_str),
                Some("SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "VALUES" | "TABLE")
            ),
            _ => false,
        }
    }
}

pub fn classify(text: &str, dialect: &dyn Dialect) -> StatementKind {
    classify_text(text, dialect).0
}

/// Split a script and classify every statement.
pub fn parse_script(text: &str, dialect: &dyn Dialect) -> Vec<Statement> {
    split_statements(text)
        .into_iter()
        .map(|s| Statement::parse(s, dialect))
        .collect()
}

fn classify_text(text: &str, dialect: &dyn Dialect) -> (StatementKind, bool) {
    if is_block(text) {
        return (StatementKind::Block, false);
    }

    let parser_dialect = dialect.parser_dialect();
    let parsed = match SqlParser::parse_sql(&*parser_dialect, text) {
        Ok(statements) => statements,
        Err(_) => return (StatementKind::Unknown, false),
    };
    let Some(first) = parsed.into_iter().next() else {
        return (StatementKind::Unknown, false);
    };

    match first {
        sp::Statement::Query(_)
        | sp::Statement::Explain { .. }
        | sp::Statement::ShowVariable { .. }
        | sp::Statement::ShowTables { .. }
        | sp::Statement::ShowColumns { .. } => (StatementKind::Query, false),
        sp::Statement::Insert(insert) => (StatementKind::Mutation, insert.returning.is_some()),
        sp::Statement::Update { returning, .. } => (StatementKind::Mutation, returning.is_some()),
        sp::Statement::Delete(delete) => (StatementKind::Mutation, delete.returning.is_some()),
        sp::Statement::Merge { .. } => (StatementKind::Mutation, false),
        sp::Statement::CreateTable { .. }
        | sp::Statement::CreateView { .. }
        | sp::Statement::CreateIndex { .. }
        | sp::Statement::CreateSchema { .. }
        | sp::Statement::CreateSequence { .. }
        | sp::Statement::AlterTable { .. }
        | sp::Statement::AlterIndex { .. }
        | sp::Statement::AlterView { .. }
        | sp::Statement::Drop { .. }
        | sp::Statement::Truncate { .. }
        | sp::Statement::Comment { .. }
        | sp::Statement::Grant { .. }
        | sp::Statement::Revoke { .. } => (StatementKind::Ddl, false),
        sp::Statement::StartTransaction { .. }
        | sp::Statement::Commit { .. }
        | sp::Statement::Rollback { .. }
        | sp::Statement::Savepoint { .. }
        | sp::Statement::ReleaseSavepoint { .. } => (StatementKind::Transaction, false),
        _ => (StatementKind::Unknown, false),
    }
}

/// Upper-cased leading words, skipping whitespace and comments.
fn leading_words(text: &str, count: usize) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut words = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() && words.len() < count {
        let b = bytes[pos];
        if b.is_ascii_whitespace() {
            pos += 1;
        } else if b == b'-' && bytes.get(pos + 1) == Some(&b'-') {
            pos = skip_line_comment(bytes, pos);
        } else if b == b'/' && bytes.get(pos + 1) == Some(&b'*') {
            pos = skip_block_comment(bytes, pos);
        } else if is_word_start(b) {
            let end = word_end(bytes, pos);
            words.push(text[pos..end].to_ascii_uppercase());
            pos = end;
        } else {
            break;
        }
    }
    words
}

/// Whether the statement opens a procedural block or a stored program unit.
fn is_block(text: &str) -> bool {
    let words = leading_words(text, 6);
    let word = |i: usize| words.get(i).map(String::as_str);
    match word(0) {
        Some("DO") | Some("DECLARE") => true,
        Some("BEGIN") => !matches!(
            word(1),
            None | Some("TRANSACTION" | "WORK" | "ISOLATION" | "READ" | "DEFERRABLE" | "NOT")
        ),
        Some("CREATE") => {
            let mut i = 1;
            if word(i) == Some("OR") && word(i + 1) == Some("REPLACE") {
                i += 2;
            }
            if matches!(word(i), Some("EDITIONABLE" | "NONEDITIONABLE")) {
                i += 1;
            }
            match word(i) {
                Some("FUNCTION" | "PROCEDURE" | "PACKAGE" | "TRIGGER") => true,
                Some("TYPE") => word(i + 1) == Some("BODY"),
                _ => false,
            }
        }
        _ => false,
    }
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn word_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    end
}

fn skip_line_comment(bytes: &[u8], pos: usize) -> usize {
    bytes[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|i| pos + i + 1)
        .unwrap_or(bytes.len())
}

/// Block comments nest.
fn skip_block_comment(bytes: &[u8], pos: usize) -> usize {
    let mut depth = 0usize;
    let mut i = pos;
    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Skip a quoted run where the quote character is escaped by doubling.
/// `backslash` also honors `\` escapes (PostgreSQL `E''` strings).
fn skip_quoted(bytes: &[u8], pos: usize, quote: u8, backslash: bool) -> usize {
    let mut i = pos + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash && b == b'\\' {
            i += 2;
        } else if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// `$tag$ ... $tag$` body. `None` when `pos` does not open one (`$1` parameters).
fn skip_dollar_quoted(text: &str, pos: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut j = pos + 1;
    if j < bytes.len() && bytes[j].is_ascii_digit() {
        return None;
    }
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
        j += 1;
    }
    if bytes.get(j) != Some(&b'$') {
        return None;
    }
    let tag = &text[pos..=j];
    let body_start = j + 1;
    Some(
        text[body_start..]
            .find(tag)
            .map(|i| body_start + i + tag.len())
            .unwrap_or(bytes.len()),
    )
}

/// A line whose only content is `/`.
fn is_slash_line(bytes: &[u8], pos: usize) -> Option<usize> {
    let line_start = bytes[..pos]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    if !bytes[line_start..pos].iter().all(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let mut end = pos + 1;
    while end < bytes.len() && bytes[end] != b'\n' {
        if !bytes[end].is_ascii_whitespace() {
            return None;
        }
        end += 1;
    }
    Some(end)
}

/// Nesting of `BEGIN`/`DECLARE`/`CASE`/program-unit headers against `END`.
#[derive(Default)]
struct BlockDepth {
    active: bool,
    depth: u32,
    /// Headers (`DECLARE`, unit `IS`/`AS`) whose `BEGIN` does not nest again.
    pending: u32,
    /// After `PROCEDURE`/`FUNCTION`/`PACKAGE`/`BODY`, the next `IS`/`AS` opens a body.
    expect_header: bool,
}

impl BlockDepth {
    fn word(&mut self, word: &str, next_word: Option<&str>, next_byte: Option<u8>) -> bool {
        if !self.active {
            return false;
        }
        let mut consume_next = false;
        match word {
            "BEGIN" => {
                if self.pending > 0 {
                    self.pending -= 1;
                } else {
                    self.depth += 1;
                }
                self.expect_header = false;
            }
            "DECLARE" => {
                self.depth += 1;
                self.pending += 1;
            }
            "CASE" => self.depth += 1,
            "END" => match next_word {
                Some("IF" | "LOOP" | "WHILE" | "REPEAT" | "FOR") => consume_next = true,
                Some("CASE") => {
                    self.depth = self.depth.saturating_sub(1);
                    consume_next = true;
                }
                _ => self.depth = self.depth.saturating_sub(1),
            },
            "PROCEDURE" | "FUNCTION" | "PACKAGE" | "BODY" => self.expect_header = true,
            "IS" | "AS" if self.expect_header => {
                self.expect_header = false;
                if !matches!(next_byte, Some(b'$' | b'\'')) {
                    self.depth += 1;
                    self.pending += 1;
                }
            }
            _ => {}
        }
        consume_next
    }

    fn semicolon_ends_statement(&mut self) -> bool {
        self.expect_header = false;
        !self.active || self.depth == 0
    }
}

pub fn split_statements(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut at_statement_start = true;
    let mut block = BlockDepth::default();
    let mut pos = 0;

    let push = |from: usize, to: usize, has_code: bool, out: &mut Vec<String>| {
        let stmt = text[from..to].trim();
        if has_code && !stmt.is_empty() {
            out.push(stmt.to_string());
        }
    };

    while pos < bytes.len() {
        let b = bytes[pos];
        match b {
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                pos = skip_line_comment(bytes, pos);
                continue;
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos = skip_block_comment(bytes, pos);
                continue;
            }
            b'/' => {
                if let Some(line_end) = is_slash_line(bytes, pos) {
                    push(start, pos, has_code, &mut statements);
                    pos = line_end;
                    start = pos;
                    has_code = false;
                    at_statement_start = true;
                    block = BlockDepth::default();
                    continue;
                }
            }
            b'\'' => {
                let escaped = pos > 0
                    && matches!(bytes[pos - 1], b'E' | b'e')
                    && (pos < 2 || !is_word_byte(bytes[pos - 2]));
                pos = skip_quoted(bytes, pos, b'\'', escaped);
                has_code = true;
                at_statement_start = false;
                continue;
            }
            b'"' => {
                pos = skip_quoted(bytes, pos, b'"', false);
                has_code = true;
                at_statement_start = false;
                continue;
            }
            b'$' => {
                if let Some(end) = skip_dollar_quoted(text, pos) {
                    pos = end;
                    has_code = true;
                    at_statement_start = false;
                    continue;
                }
            }
            b';' => {
                if block.semicolon_ends_statement() {
                    push(start, pos + 1, has_code, &mut statements);
                    pos += 1;
                    start = pos;
                    has_code = false;
                    at_statement_start = true;
                    block = BlockDepth::default();
                    continue;
                }
            }
            _ if is_word_start(b) && (pos == 0 || !is_word_byte(bytes[pos - 1])) => {
                if at_statement_start {
                    block.active = is_block(&text[pos..]);
                    at_statement_start = false;
                }
                let end = word_end(bytes, pos);
                let word = text[pos..end].to_ascii_uppercase();
                let next = leading_words(&text[end..], 1);
                let next_byte = text[end..].trim_start().bytes().next();
                let consume = block.word(&word, next.first().map(String::as_str), next_byte);
                has_code = true;
                pos = end;
                if consume {
                    let skip = text[pos..].len() - text[pos..].trim_start().len();
                    pos = word_end(bytes, pos + skip);
                }
                continue;
            }
            _ => {}
        }
        if !b.is_ascii_whitespace() {
            has_code = true;
            at_statement_start = false;
        }
        pos += 1;
    }
    push(start, bytes.len(), has_code, &mut statements);
    statements
}
