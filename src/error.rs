//! Error types.

use thiserror::Error;

/// A `< status` directive named a code the status table does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown HTTP status code {code}")]
pub struct UnknownStatusCode {
    pub code: u16,
}

/// Stanza text that does not conform to the grammar.
///
/// Lines and columns are 1-based.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}, column {column}: expected {expected}, found {found:?}")]
    Syntax {
        line: usize,
        column: usize,
        expected: &'static str,
        found: String,
    },

    #[error("line {line}: {source}")]
    UnknownStatus {
        line: usize,
        #[source]
        source: UnknownStatusCode,
    },

    #[error("line {line}: invalid pattern /{pattern}/: {source}")]
    InvalidPattern {
        line: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("line {line}: {directive} out of order (request headers, then params, then response directives)")]
    OutOfOrder { line: usize, directive: &'static str },

    #[error("stanza starting at line {line} is missing its '.' terminator")]
    UnterminatedStanza { line: usize },

    #[error("line {line}: body block is missing its closing '<<<'")]
    UnterminatedBody { line: usize },

    #[error("no stanzas found")]
    Empty,
}

impl ParseError {
    /// Line the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Syntax { line, .. }
            | ParseError::UnknownStatus { line, .. }
            | ParseError::InvalidPattern { line, .. }
            | ParseError::OutOfOrder { line, .. }
            | ParseError::UnterminatedStanza { line }
            | ParseError::UnterminatedBody { line } => Some(*line),
            ParseError::Empty => None,
        }
    }
}

/// Request-time failures that surface to the client.
#[derive(Debug, Error)]
pub enum MatchError {
    /// JSON parameter matching was attempted against a body that is not JSON.
    #[error("request body is not valid JSON: {source}")]
    BadRequestBody {
        body: String,
        #[source]
        source: serde_json::Error,
    },
}
