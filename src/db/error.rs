use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the client layer.
///
/// Cancellation is deliberately absent: a canceled query resolves to
/// [`Outcome::Canceled`](crate::db::Outcome), not to an error.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication, network or handshake failure. Never retried.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The pool could not hand out a session (closed, timed out, misconfigured).
    #[error("Pool error: {0}")]
    Pool(String),

    /// The engine rejected a statement.
    #[error("{0}")]
    Statement(StructuredError),

    /// A statement inside a multi-statement batch failed; nothing was committed.
    #[error("Statement {} of batch failed: {source}", index + 1)]
    Batch {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    /// The current dialect does not implement this operation.
    #[error("Not implemented for {dialect}: {operation}")]
    NotImplemented {
        dialect: &'static str,
        operation: &'static str,
    },

    #[error("Invalid connection state: expected {expected}, found {found}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Table {table} has no primary key usable for row addressing")]
    MissingPrimaryKey { table: String },

    #[error("Invalid change for {table}: {reason}")]
    InvalidChange { table: String, reason: String },

    #[error("Invalid filter on {field}: {reason}")]
    InvalidFilter { field: String, reason: String },

    #[error("Cursor is closed")]
    CursorClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_implemented(dialect: &'static str, operation: &'static str) -> Self {
        Self::NotImplemented { dialect, operation }
    }

    /// Category of the underlying engine failure, if any.
    pub fn category(&self) -> Option<&ErrorCategory> {
        match self {
            Error::Statement(e) => Some(&e.category),
            Error::Batch { source, .. } => source.category(),
            Error::Connection(_) | Error::Pool(_) => Some(&ErrorCategory::Connection),
            _ => None,
        }
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Error::NotImplemented { .. })
    }

    /// The engine-level error, looking through batch wrapping.
    pub fn statement_error(&self) -> Option<&StructuredError> {
        match self {
            Error::Statement(e) => Some(e),
            Error::Batch { source, .. } => source.statement_error(),
            _ => None,
        }
    }
}

impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.as_db_error().is_some() {
            Error::Statement(StructuredError::from_pg_error(&err, ""))
        } else if err.is_closed() {
            Error::Connection(err.to_string())
        } else {
            let structured = StructuredError::from_pg_error(&err, "");
            match structured.category {
                ErrorCategory::Connection => Error::Connection(structured.message),
                _ => Error::Statement(structured),
            }
        }
    }
}

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, constraint violation)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with the context an engine reports alongside a failure.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// Engine severity (ERROR, FATAL, etc.)
    pub severity: String,
    /// SQLSTATE or engine error code (e.g., "42601", "ORA-00942")
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Character position in the statement (1-based byte offset)
    pub position: Option<u32>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub constraint: Option<String>,
    /// Computed line number (1-based) from position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from position, if available
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code_str = db_err.code().code().to_string();
            let category = categorize_sqlstate(&code_str);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            let (line, col) = match position {
                Some(pos) if !query.is_empty() => byte_offset_to_line_col(query, pos as usize),
                _ => (None, None),
            };

            StructuredError {
                category,
                severity: db_err.severity().to_string(),
                code: code_str,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                position,
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                constraint: db_err.constraint().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            let mut structured = StructuredError::from_string(err.to_string());
            structured.category = category;
            structured.detail = err.source().map(|e| e.to_string());
            structured
        }
    }

    /// Create a simple error from a plain string (for non-database errors).
    pub fn from_string(msg: impl Into<String>) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            severity: "ERROR".to_string(),
            code: String::new(),
            message: msg.into(),
            detail: None,
            hint: None,
            position: None,
            table: None,
            column: None,
            constraint: None,
            line: None,
            col: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        if let Some(category) = categorize_code(&self.code) {
            self.category = category;
        }
        self
    }

    /// Attach the statement text so the position can be mapped to line/column.
    pub fn locate(mut self, query: &str) -> Self {
        if let Some(pos) = self.position {
            let (line, col) = byte_offset_to_line_col(query, pos as usize);
            self.line = line;
            self.col = col;
        }
        self
    }

    /// Format as a rich multi-line string.
    pub fn display_full(&self) -> String {
        let mut lines = vec![format!("{}: {}", self.category, self.message)];

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            lines.push(format!("  Code: {}", self.code));
        }
        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }
        if let Some(table) = &self.table {
            match &self.column {
                Some(column) => lines.push(format!("  Object: {}.{}", table, column)),
                None => lines.push(format!("  Table: {}", table)),
            }
        }
        if let Some(constraint) = &self.constraint {
            lines.push(format!("  Constraint: {}", constraint));
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

fn categorize_code(code: &str) -> Option<ErrorCategory> {
    if let Some(ora) = code.strip_prefix("ORA-") {
        return Some(categorize_oracle(ora));
    }
    if code.len() == 5 {
        return Some(categorize_sqlstate(code));
    }
    None
}

fn categorize_oracle(number: &str) -> ErrorCategory {
    match number {
        "00900" | "00904" | "00905" | "00906" | "00907" | "00911" | "00933" | "00936" => {
            ErrorCategory::Syntax
        }
        "00942" | "04043" | "00918" => ErrorCategory::Semantic,
        "00001" | "01400" | "02291" | "02292" | "01722" | "01476" => ErrorCategory::Execution,
        "08177" | "00060" => ErrorCategory::Transaction,
        "03113" | "03114" | "12541" | "12514" | "01017" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    let class = &code[..2];
    match class {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" | "28" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_error_category_display() {
        assert_eq!(ErrorCategory::Syntax.to_string(), "Syntax Error");
        assert_eq!(ErrorCategory::Semantic.to_string(), "Semantic Error");
        assert_eq!(ErrorCategory::Connection.to_string(), "Connection Error");
        assert_eq!(ErrorCategory::Unknown.to_string(), "Error");
    }

    #[test]
    fn test_byte_offset_to_line_col() {
        let query = "SELECT *\nFROM users\nWHERE id = 1";
        assert_eq!(byte_offset_to_line_col(query, 1), (Some(1), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 10), (Some(2), Some(1)));
        assert_eq!(byte_offset_to_line_col(query, 21), (Some(3), Some(1)));
    }

    #[test]
    fn test_categorize_sqlstate() {
        assert_eq!(categorize_sqlstate("42601"), ErrorCategory::Syntax);
        assert_eq!(categorize_sqlstate("42P01"), ErrorCategory::Semantic);
        assert_eq!(categorize_sqlstate("23505"), ErrorCategory::Execution);
        assert_eq!(categorize_sqlstate("25001"), ErrorCategory::Transaction);
        assert_eq!(categorize_sqlstate("08006"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("28P01"), ErrorCategory::Connection);
        assert_eq!(categorize_sqlstate("XX000"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_oracle_codes_are_categorized() {
        let err =
            StructuredError::from_string("table or view does not exist").with_code("ORA-00942");
        assert_eq!(err.category, ErrorCategory::Semantic);
        let err = StructuredError::from_string("unique constraint violated").with_code("ORA-00001");
        assert_eq!(err.category, ErrorCategory::Execution);
    }

    #[test]
    fn test_display_full_includes_location_and_hint() {
        // position is 1-based: 11 is the `F` that opens the second line
        let mut err =
            StructuredError::from_string("syntax error at or near \"FROM\"").with_code("42601");
        err.position = Some(11);
        err.hint = Some("Remove trailing comma.".to_string());
        let err = err.locate("SELECT a,\nFROM t");
        let full = err.display_full();
        assert!(full.contains("Syntax Error"));
        assert!(full.contains("at line 2, column 1"));
        assert!(full.contains("Remove trailing comma"));
    }

    #[test]
    fn test_locate_stays_on_first_line_before_newline() {
        let mut err = StructuredError::from_string("syntax error at or near \",\"");
        err.position = Some(9);
        let err = err.locate("SELECT a,\nFROM t");
        assert_eq!((err.line, err.col), (Some(1), Some(9)));
    }

    #[test]
    fn test_batch_error_exposes_inner_category() {
        let inner = Error::Statement(StructuredError::from_string("boom").with_code("42703"));
        let err = Error::Batch {
            index: 2,
            source: Box::new(inner),
        };
        assert_eq!(err.category(), Some(&ErrorCategory::Semantic));
        assert!(err.to_string().starts_with("Statement 3 of batch failed"));
    }
}
