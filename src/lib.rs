//! dumdum
//!
//! Stands up throwaway HTTP servers for testing clients. Endpoints and the
//! conditions under which each canned response fires are described in a
//! small line-oriented grammar.
//!
//! # Features
//!
//! - **Request Matching**: Exact method and path, then headers and
//!   query, form or JSON body parameters
//! - **Ordered Rules**: The first rule declared for a route whose conditions
//!   hold wins
//! - **Pattern Parameters**: Unanchored regex search on parameter values
//! - **JSON Bodies**: Nested documents are flattened to dotted keys
//! - **Latency Simulation**: Fixed per-rule delays
//! - **Echo**: Return the request body unmodified
//!
//! # Example Stanzas
//!
//! ```text
//! > GET
//! > /hello
//! < status 418
//! < body world
//! .
//!
//! > POST, PUT
//! > /login
//! > header Content-Type: application/json
//! > param user.name is alice
//! < header Set-Cookie: session=abc
//! < body <<<{"welcome": "alice"}<<<
//! .
//! ```
//!
//! ```
//! use dumdum::{parse, Matcher, RequestContext};
//!
//! let table = parse("> GET\n> /hello\n< status 418\n< body world\n.\n").unwrap();
//! let matcher = Matcher::new(table);
//! let response = tokio_test::block_on(matcher.respond(&RequestContext::new("GET", "/hello")));
//! assert_eq!(response.status.to_string(), "418 I'm a teapot");
//! assert_eq!(response.body, "world");
//! ```

pub mod config;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod server;
pub mod stanza;
pub mod status;

pub use config::{ServerConfig, StanzaSource};
pub use error::{MatchError, ParseError, UnknownStatusCode};
pub use matcher::{flatten_json, MatchResult, Matcher, RequestContext, ResponseContext};
pub use parser::parse;
pub use server::MockServer;
pub use stanza::{ParamMatcher, ResponseBody, ResponseTemplate, Rule, StanzaTable, Verb};
pub use status::StatusLine;
