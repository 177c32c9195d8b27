//! HTTP status lookup.
//!
//! Maps numeric status codes to their reason phrases. The table includes a
//! few non-standard codes (444, 499) that mock servers are commonly asked
//! to produce.

use crate::error::UnknownStatusCode;
use serde::{Serialize, Serializer};
use std::fmt;

/// Reason phrase for a status code, if the code is known.
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    let reason = match code {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Payload Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Requested Range Not Satisfiable",
        417 => "Expectation Failed",
        418 => "I'm a teapot",
        421 => "Misdirected Request",
        422 => "Unprocessable Entity",
        423 => "Locked",
        424 => "Failed Dependency",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        444 => "Connection Closed Without Response",
        451 => "Unavailable For Legal Reasons",
        499 => "Client Closed Request",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => return None,
    };
    Some(reason)
}

/// A resolved status line, rendered as `"<code> <reason>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine {
    code: u16,
    reason: &'static str,
}

impl StatusLine {
    pub const OK: StatusLine = StatusLine {
        code: 200,
        reason: "OK",
    };

    pub const BAD_REQUEST: StatusLine = StatusLine {
        code: 400,
        reason: "Bad Request",
    };

    /// Resolve a status code through the lookup table.
    pub fn lookup(code: u16) -> Result<Self, UnknownStatusCode> {
        reason_phrase(code)
            .map(|reason| Self { code, reason })
            .ok_or(UnknownStatusCode { code })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    /// True for 1xx codes, which cannot end an exchange.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// True for 4xx codes.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::OK
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

impl Serialize for StatusLine {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
