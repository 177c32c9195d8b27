//! Stanza table data model.
//!
//! The table maps an HTTP verb to a URL path to the ordered list of rules
//! declared for it. It is built once by the parser and read-only afterwards.

use crate::status::StatusLine;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Normalized key of the request content type.
pub const CONTENT_TYPE_KEY: &str = "CONTENT_TYPE";

/// Prefix applied to every other normalized request header key.
pub const HEADER_PREFIX: &str = "HTTP_";

/// Normalize a request header name into its transport-style key.
///
/// `X-Api-Key` becomes `HTTP_X_API_KEY`; `Content-Type` stays `CONTENT_TYPE`.
pub fn normalize_header_key(name: &str) -> String {
    let key = name.trim().to_ascii_uppercase().replace('-', "_");
    if key == CONTENT_TYPE_KEY {
        key
    } else {
        format!("{HEADER_PREFIX}{key}")
    }
}

/// HTTP verbs a stanza can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
            Verb::Head => "HEAD",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method string is not one of the supported verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedVerb;

impl FromStr for Verb {
    type Err = UnsupportedVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "DELETE" => Ok(Verb::Delete),
            "HEAD" => Ok(Verb::Head),
            _ => Err(UnsupportedVerb),
        }
    }
}

/// Verb -> path -> ordered rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StanzaTable {
    routes: BTreeMap<Verb, BTreeMap<String, Vec<Rule>>>,
}

impl StanzaTable {
    /// Rules registered for a verb and path, in declaration order.
    pub fn rules(&self, verb: Verb, path: &str) -> Option<&[Rule]> {
        self.routes
            .get(&verb)
            .and_then(|paths| paths.get(path))
            .map(Vec::as_slice)
    }

    /// Verbs that have at least one registered path.
    pub fn verbs(&self) -> impl Iterator<Item = Verb> + '_ {
        self.routes.keys().copied()
    }

    /// Paths registered under a verb.
    pub fn paths(&self, verb: Verb) -> impl Iterator<Item = &str> + '_ {
        self.routes
            .get(&verb)
            .into_iter()
            .flat_map(|paths| paths.keys().map(String::as_str))
    }

    /// Number of distinct (verb, path) keys.
    pub fn route_count(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    /// Total number of rules across all keys.
    pub fn rule_count(&self) -> usize {
        self.routes
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Register a (verb, path) key with an empty rule list if absent.
    pub(crate) fn register(&mut self, verb: Verb, path: &str) {
        self.routes
            .entry(verb)
            .or_default()
            .entry(path.to_string())
            .or_default();
    }

    /// Append a rule under a (verb, path) key, registering it if needed.
    pub(crate) fn push(&mut self, verb: Verb, path: &str, rule: Rule) {
        self.routes
            .entry(verb)
            .or_default()
            .entry(path.to_string())
            .or_default()
            .push(rule);
    }
}

/// A predicate and the response it selects.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Rule {
    /// Conditions the request must satisfy
    pub request: RequestPredicate,

    /// Response to render when the conditions hold
    pub response: ResponseTemplate,
}

impl Rule {
    /// A rule with no request conditions.
    pub fn is_catch_all(&self) -> bool {
        self.request.headers.is_none() && self.request.params.is_none()
    }
}

/// Request conditions of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestPredicate {
    /// Normalized header key -> required literal value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    /// Parameter name -> value matcher
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, ParamMatcher>>,
}

/// Parameter value matching.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamMatcher {
    /// Exact string equality
    Exact { value: String },
    /// Unanchored regex search
    Pattern {
        #[serde(serialize_with = "serialize_regex")]
        regex: Regex,
    },
}

impl ParamMatcher {
    /// Test a single candidate value.
    pub fn is_match(&self, candidate: &str) -> bool {
        match self {
            ParamMatcher::Exact { value } => value == candidate,
            ParamMatcher::Pattern { regex } => regex.is_match(candidate),
        }
    }
}

impl PartialEq for ParamMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ParamMatcher::Exact { value: a }, ParamMatcher::Exact { value: b }) => a == b,
            (ParamMatcher::Pattern { regex: a }, ParamMatcher::Pattern { regex: b }) => {
                a.as_str() == b.as_str()
            }
            _ => false,
        }
    }
}

fn serialize_regex<S: Serializer>(regex: &Regex, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(regex.as_str())
}

/// Response rendered for a matched rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseTemplate {
    /// Status line, `200 OK` unless a status directive says otherwise
    pub status: StatusLine,

    /// Pause before responding, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Response headers, emitted verbatim in declaration order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,

    /// Response body
    pub body: ResponseBody,
}

impl ResponseTemplate {
    /// Set a response header. A repeated name replaces the earlier value in place.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }
}

/// Response body source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Fixed text
    Literal { text: String },
    /// The request body, unmodified
    Echo,
}

impl Default for ResponseBody {
    fn default() -> Self {
        ResponseBody::Literal {
            text: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_header_key() {
        assert_eq!(normalize_header_key("X-Api-Key"), "HTTP_X_API_KEY");
        assert_eq!(normalize_header_key("accept"), "HTTP_ACCEPT");
        assert_eq!(normalize_header_key("Content-Type"), "CONTENT_TYPE");
        assert_eq!(normalize_header_key("content-type"), "CONTENT_TYPE");
    }

    #[test]
    fn test_verb_from_str() {
        assert_eq!("GET".parse::<Verb>(), Ok(Verb::Get));
        assert_eq!("DELETE".parse::<Verb>(), Ok(Verb::Delete));
        assert_eq!("get".parse::<Verb>(), Err(UnsupportedVerb));
        assert_eq!("PATCH".parse::<Verb>(), Err(UnsupportedVerb));
    }

    #[test]
    fn test_table_register_and_push() {
        let mut table = StanzaTable::default();
        table.register(Verb::Get, "/a");
        assert_eq!(table.rules(Verb::Get, "/a").map(<[Rule]>::len), Some(0));

        table.push(Verb::Get, "/a", Rule::default());
        table.push(Verb::Post, "/b", Rule::default());
        assert_eq!(table.route_count(), 2);
        assert_eq!(table.rule_count(), 2);
        assert_eq!(table.verbs().collect::<Vec<_>>(), vec![Verb::Get, Verb::Post]);
        assert_eq!(table.paths(Verb::Post).collect::<Vec<_>>(), vec!["/b"]);
        assert!(table.rules(Verb::Put, "/a").is_none());
    }

    #[test]
    fn test_param_matcher_dispatch() {
        let exact = ParamMatcher::Exact {
            value: "wor".to_string(),
        };
        let pattern = ParamMatcher::Pattern {
            regex: Regex::new("wor").unwrap(),
        };
        assert!(!exact.is_match("world"));
        assert!(exact.is_match("wor"));
        assert!(pattern.is_match("world"));
        assert!(pattern.is_match("hello world"));
        assert_ne!(exact, pattern);
    }

    #[test]
    fn test_set_header_replaces_in_place() {
        let mut response = ResponseTemplate::default();
        response.set_header("X-One", "1");
        response.set_header("X-Two", "2");
        response.set_header("X-One", "uno");
        assert_eq!(
            response.headers,
            vec![
                ("X-One".to_string(), "uno".to_string()),
                ("X-Two".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_table_serializes_by_verb_and_path() {
        let table = crate::parser::parse(
            "> GET\n> /hello\n> param_maybe q like /wor/\n< status 418\n< echo\n.\n",
        )
        .unwrap();

        let value = serde_json::to_value(&table).unwrap();
        let rule = &value["GET"]["/hello"][0];
        assert_eq!(rule["response"]["status"], "418 I'm a teapot");
        assert_eq!(rule["response"]["body"]["type"], "echo");
        assert_eq!(rule["request"]["params"]["q"]["type"], "pattern");
        assert_eq!(rule["request"]["params"]["q"]["regex"], "wor");

        let yaml = serde_yaml::to_string(&table).unwrap();
        assert!(yaml.contains("GET:"));
    }

    #[test]
    fn test_catch_all() {
        let mut rule = Rule::default();
        assert!(rule.is_catch_all());
        rule.request.params = Some(BTreeMap::new());
        assert!(!rule.is_catch_all());
    }
}
