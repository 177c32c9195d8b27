//! Request matching logic.
//!
//! Resolves an inbound request against the stanza table: the rules for the
//! request's verb and path are tried in declaration order and the first one
//! whose predicate holds renders the response.

use crate::error::MatchError;
use crate::stanza::{
    normalize_header_key, RequestPredicate, ResponseBody, ResponseTemplate, Rule, StanzaTable,
    Verb, CONTENT_TYPE_KEY,
};
use crate::status::StatusLine;
use bytes::Bytes;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};

const JSON_CONTENT_TYPE: &str = "application/json";
const FALLBACK_BODY: &str = "Sorry I couldn't help.";

/// Parameter name -> every value supplied for it.
type ParamValues = HashMap<String, Vec<String>>;

/// Inbound request, as handed over by the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request method, e.g. `GET`
    pub method: String,
    /// URL path without the query string
    pub path: String,
    /// Headers keyed by their normalized form (`HTTP_X_API_KEY`, `CONTENT_TYPE`)
    pub headers: HashMap<String, String>,
    /// Raw query string, empty when absent
    pub query_string: String,
    /// Raw request body
    pub body: Bytes,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a header by its wire name; the key is normalized.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(normalize_header_key(name), value.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response produced for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContext {
    pub status: StatusLine,
    /// Header pairs in emission order
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ResponseContext {
    /// Response for requests no rule accepts.
    pub fn fallback() -> Self {
        Self::bad_request(Bytes::from_static(FALLBACK_BODY.as_bytes()))
    }

    /// Response for a body that JSON parameter matching could not parse.
    pub fn bad_request_body(body: &[u8]) -> Self {
        let mut text = b"Error parsing: ".to_vec();
        text.extend_from_slice(body);
        Self::bad_request(Bytes::from(text))
    }

    fn bad_request(body: Bytes) -> Self {
        Self {
            status: StatusLine::BAD_REQUEST,
            headers: vec![("Content-type".to_string(), "text/plain".to_string())],
            body,
        }
    }
}

/// Result of matching a request against the table.
#[derive(Debug)]
pub struct MatchResult<'a> {
    /// The matched rule
    pub rule: &'a Rule,
    /// Position of the rule under its verb and path
    pub index: usize,
}

/// Request matcher engine over a read-only stanza table.
#[derive(Debug, Clone)]
pub struct Matcher {
    table: StanzaTable,
}

impl Matcher {
    pub fn new(table: StanzaTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &StanzaTable {
        &self.table
    }

    /// Find the first rule that accepts the request.
    ///
    /// Fails only when a rule asks for JSON parameters and the body is not JSON.
    pub fn find_match(&self, req: &RequestContext) -> Result<Option<MatchResult<'_>>, MatchError> {
        let Ok(verb) = req.method.parse::<Verb>() else {
            return Ok(None);
        };
        let Some(rules) = self.table.rules(verb, &req.path) else {
            return Ok(None);
        };

        let mut sources = ParamSources::new(req);
        for (index, rule) in rules.iter().enumerate() {
            if matches_predicate(&rule.request, req, &mut sources)? {
                return Ok(Some(MatchResult { rule, index }));
            }
        }

        Ok(None)
    }

    /// Respond to a request. Never fails: misses render the 400 fallback.
    pub async fn respond(&self, req: &RequestContext) -> ResponseContext {
        match self.find_match(req) {
            Ok(Some(found)) => {
                debug!(
                    method = %req.method,
                    path = %req.path,
                    rule = found.index,
                    "Request matched stanza"
                );
                render(&found.rule.response, req).await
            }
            Ok(None) => {
                debug!(method = %req.method, path = %req.path, "No matching stanza found");
                ResponseContext::fallback()
            }
            Err(err) => {
                warn!(method = %req.method, path = %req.path, error = %err, "Rejecting request body");
                ResponseContext::bad_request_body(&req.body)
            }
        }
    }
}

/// Render a response template for a request.
pub async fn render(template: &ResponseTemplate, req: &RequestContext) -> ResponseContext {
    if let Some(delay_ms) = template.delay_ms {
        if delay_ms > 0 {
            debug!(delay_ms, "Applying delay");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    let body = match &template.body {
        ResponseBody::Literal { text } => Bytes::from(text.clone()),
        ResponseBody::Echo => req.body.clone(),
    };

    ResponseContext {
        status: template.status,
        headers: template.headers.clone(),
        body,
    }
}

fn matches_predicate(
    predicate: &RequestPredicate,
    req: &RequestContext,
    sources: &mut ParamSources<'_>,
) -> Result<bool, MatchError> {
    let mut json_mode = false;

    if let Some(headers) = &predicate.headers {
        for (key, expected) in headers {
            if req.headers.get(key) != Some(expected) {
                return Ok(false);
            }
            if key == CONTENT_TYPE_KEY && expected.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
                json_mode = true;
            }
        }
    }

    let Some(params) = &predicate.params else {
        return Ok(true);
    };

    let values = if json_mode && !req.body.is_empty() {
        sources.json()?
    } else {
        sources.form()
    };

    Ok(params.iter().all(|(name, matcher)| {
        values
            .get(name)
            .is_some_and(|candidates| candidates.iter().any(|v| matcher.is_match(v)))
    }))
}

/// Parameter values of one request, decoded on first use.
struct ParamSources<'r> {
    req: &'r RequestContext,
    json: Option<ParamValues>,
    form: Option<ParamValues>,
}

impl<'r> ParamSources<'r> {
    fn new(req: &'r RequestContext) -> Self {
        Self {
            req,
            json: None,
            form: None,
        }
    }

    fn json(&mut self) -> Result<&ParamValues, MatchError> {
        if self.json.is_none() {
            self.json = Some(json_params(&self.req.body)?);
        }
        Ok(self.json.get_or_insert_with(HashMap::new))
    }

    /// Query string when present, otherwise the body.
    fn form(&mut self) -> &ParamValues {
        let req = self.req;
        self.form.get_or_insert_with(|| {
            if req.query_string.is_empty() {
                form_params(&req.body)
            } else {
                form_params(req.query_string.as_bytes())
            }
        })
    }
}

fn json_params(body: &[u8]) -> Result<ParamValues, MatchError> {
    let json: Value =
        serde_json::from_slice(body).map_err(|source| MatchError::BadRequestBody {
            body: String::from_utf8_lossy(body).into_owned(),
            source,
        })?;

    Ok(flatten_json(&json)
        .into_iter()
        .map(|(key, values)| {
            let texts = values.iter().map(|v| scalar_text(v).into_owned()).collect();
            (key, texts)
        })
        .collect())
}

/// Decode `application/x-www-form-urlencoded` pairs, skipping empty values.
fn form_params(input: &[u8]) -> ParamValues {
    let mut params = ParamValues::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        if value.is_empty() {
            continue;
        }
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Flatten a JSON value into dotted key paths.
///
/// Object keys extend the path with `.`; array elements share their
/// parent's key, so `{"a": [{"b": 1}, {"b": 2}]}` becomes `{"a.b": [1, 2]}`.
pub fn flatten_json(value: &Value) -> BTreeMap<String, Vec<Value>> {
    let mut out = BTreeMap::new();
    flatten_into(value, "", &mut out);
    out
}

fn flatten_into(value: &Value, prefix: &str, out: &mut BTreeMap<String, Vec<Value>>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &path, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                flatten_into(item, prefix, out);
            }
        }
        scalar => out
            .entry(prefix.to_string())
            .or_default()
            .push(scalar.clone()),
    }
}

/// Text a JSON scalar is compared by: strings as-is, the rest as JSON.
fn scalar_text(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}
