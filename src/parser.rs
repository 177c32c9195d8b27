//! Stanza grammar parser.
//!
//! The document is line oriented. Each stanza is a verb line, a path line,
//! request directives (`>`), response directives (`<`) and a lone `.`:
//!
//! ```text
//! > GET, POST
//! > /login
//! > header Content-Type: application/json
//! > param user is alice
//! > param_maybe token like /^tk-/
//! < status 201
//! < header X-Session: abc
//! < delay 20
//! < body <<<{"ok": true}<<<
//! .
//! ```
//!
//! Lines are recognised with nom. A stanza builder collects the
//! directives of one stanza and is flushed into the table at the terminator.

use crate::error::ParseError;
use crate::stanza::{
    normalize_header_key, ParamMatcher, RequestPredicate, ResponseBody, ResponseTemplate, Rule,
    StanzaTable, Verb,
};
use crate::status::StatusLine;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_till1, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest, value},
    error::{Error, ErrorKind},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use regex::Regex;
use std::collections::BTreeMap;
use std::str::{FromStr, Lines};
use tracing::debug;

/// Opening and closing delimiter of a multi-line body.
const BLOCK_QUOTE: &str = "<<<";

/// Parse stanza text into a table.
pub fn parse(text: &str) -> Result<StanzaTable, ParseError> {
    let mut cursor = Cursor::new(text);
    let mut table = StanzaTable::default();
    let mut stanzas = 0usize;

    while let Some(first) = cursor.next_significant() {
        let builder = parse_stanza(&mut cursor, first, &mut table)?;
        builder.finish(&mut table);
        stanzas += 1;
    }

    if stanzas == 0 {
        return Err(ParseError::Empty);
    }

    debug!(
        stanzas,
        routes = table.route_count(),
        rules = table.rule_count(),
        "Stanza text parsed"
    );
    Ok(table)
}

impl FromStr for StanzaTable {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

fn parse_stanza<'a>(
    cursor: &mut Cursor<'a>,
    first: Line<'a>,
    table: &mut StanzaTable,
) -> Result<StanzaBuilder, ParseError> {
    let unterminated = || ParseError::UnterminatedStanza { line: first.number };

    let verbs = parse_line(&first, "verb line such as '> GET, POST'", verb_line)?;
    let path_line = cursor.next_significant().ok_or_else(unterminated)?;
    let path = parse_line(&path_line, "path line such as '> /hello'", path_line_token)?;

    let mut builder = StanzaBuilder::new(verbs, path, first.number);
    for verb in &builder.verbs {
        table.register(*verb, path);
    }

    loop {
        let line = cursor.next_significant().ok_or_else(unterminated)?;
        if line.is_terminator() {
            return Ok(builder);
        }

        if line.content.starts_with('>') {
            let directive = parse_line(
                &line,
                "request directive ('> header ...' or '> param ...')",
                request_line,
            )?;
            builder.request(directive, &line)?;
        } else if line.content.starts_with('<') {
            let directive = parse_line(
                &line,
                "response directive (delay, status, header, body or echo)",
                response_line,
            )?;
            builder.response(directive, &line, cursor)?;
        } else {
            return Err(line.syntax_error("'>' or '<' directive or '.' terminator", line.content));
        }
    }
}

/// Run a line production over the whole line.
fn parse_line<'a, O, P>(line: &Line<'a>, expected: &'static str, parser: P) -> Result<O, ParseError>
where
    P: FnMut(&'a str) -> IResult<&'a str, O>,
{
    match all_consuming(terminated(parser, space0))(line.content) {
        Ok((_, output)) => Ok(output),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(line.syntax_error(expected, e.input))
        }
        Err(nom::Err::Incomplete(_)) => Err(line.syntax_error(expected, "")),
    }
}

// ============================================================================
// Lines
// ============================================================================

/// One source line with its 1-based number.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    raw: &'a str,
    content: &'a str,
}

impl<'a> Line<'a> {
    fn new(number: usize, raw: &'a str) -> Self {
        Self {
            number,
            raw,
            content: raw.trim(),
        }
    }

    fn is_skippable(&self) -> bool {
        self.content.is_empty() || self.content.starts_with('#')
    }

    fn is_terminator(&self) -> bool {
        self.content == "."
    }

    /// Build a syntax error; `remaining` must be a suffix of `content`.
    fn syntax_error(&self, expected: &'static str, remaining: &str) -> ParseError {
        let indent = self.raw.len() - self.raw.trim_start().len();
        let offset = indent + self.content.len().saturating_sub(remaining.len());
        let column = self
            .raw
            .get(..offset)
            .map_or(1, |prefix| prefix.chars().count() + 1);

        ParseError::Syntax {
            line: self.number,
            column,
            expected,
            found: self.content.to_string(),
        }
    }
}

struct Cursor<'a> {
    lines: std::iter::Enumerate<Lines<'a>>,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
        }
    }

    /// Next line, blank and comment lines included.
    fn next_raw(&mut self) -> Option<Line<'a>> {
        self.lines.next().map(|(i, raw)| Line::new(i + 1, raw))
    }

    /// Next line that is neither blank nor a comment.
    fn next_significant(&mut self) -> Option<Line<'a>> {
        while let Some(line) = self.next_raw() {
            if !line.is_skippable() {
                return Some(line);
            }
        }
        None
    }
}

// ============================================================================
// Line productions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamSpec<'a> {
    Is(&'a str),
    Like(&'a str),
}

#[derive(Debug, Clone, PartialEq)]
enum RequestDirective<'a> {
    Header { name: &'a str, value: &'a str },
    Param { name: &'a str, spec: ParamSpec<'a> },
}

#[derive(Debug, Clone, PartialEq)]
enum ResponseDirective<'a> {
    Delay(u64),
    Status(u16),
    Header { name: &'a str, value: &'a str },
    Body(&'a str),
    Echo,
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "$-_@.&+!*\"'(),%/".contains(c)
}

/// Path, parameter name and parameter value token.
fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn request_marker(input: &str) -> IResult<&str, char> {
    terminated(char('>'), space0)(input)
}

fn response_marker(input: &str) -> IResult<&str, char> {
    terminated(char('<'), space0)(input)
}

fn verb(input: &str) -> IResult<&str, Verb> {
    alt((
        value(Verb::Get, tag("GET")),
        value(Verb::Post, tag("POST")),
        value(Verb::Put, tag("PUT")),
        value(Verb::Delete, tag("DELETE")),
        value(Verb::Head, tag("HEAD")),
    ))(input)
}

fn verb_separator(input: &str) -> IResult<&str, &str> {
    alt((recognize(tuple((space0, char(','), space0))), space1))(input)
}

/// `# note` after the last token of a line. Header and body text keep `#`.
fn trailing_comment(input: &str) -> IResult<&str, Option<&str>> {
    opt(preceded(pair(space0, char('#')), rest))(input)
}

/// Verbs, optionally followed by a dangling `,`.
fn verb_line(input: &str) -> IResult<&str, Vec<Verb>> {
    delimited(
        request_marker,
        separated_list1(verb_separator, verb),
        tuple((opt(pair(space0, char(','))), trailing_comment)),
    )(input)
}

fn path_line_token(input: &str) -> IResult<&str, &str> {
    delimited(request_marker, token, trailing_comment)(input)
}

/// `header Name: value`, shared by request and response lines.
fn header_directive(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, _) = pair(tag("header"), space1)(input)?;
    let (input, name) = take_till1(|c: char| c == ':')(input)?;
    let (input, _) = char(':')(input)?;
    let (input, value) = rest(input)?;
    Ok((input, (name.trim(), value.trim())))
}

/// `body text`; the text may open a `<<<` block.
fn body_directive(input: &str) -> IResult<&str, &str> {
    let (input, _) = pair(tag("body"), space1)(input)?;
    let (input, text) = rest(input)?;
    Ok((input, text.trim()))
}

fn param_keyword(input: &str) -> IResult<&str, &str> {
    alt((tag_no_case("param_maybe"), tag_no_case("param")))(input)
}

/// `/regex/`, closed by the first `/` followed only by blanks or a comment.
fn regex_literal(input: &str) -> IResult<&str, &str> {
    let (body, _) = char('/')(input)?;
    body.match_indices('/')
        .map(|(end, _)| (&body[end + 1..], &body[..end]))
        .find(|(after, _)| {
            let after = after.trim_start();
            after.is_empty() || after.starts_with('#')
        })
        .ok_or(nom::Err::Error(Error::new(body, ErrorKind::Char)))
}

fn param_directive(input: &str) -> IResult<&str, (&str, ParamSpec<'_>)> {
    let (input, _) = pair(param_keyword, space1)(input)?;
    let (input, name) = terminated(token, space1)(input)?;
    let (input, spec) = terminated(
        alt((
            map(preceded(pair(tag_no_case("is"), space1), token), ParamSpec::Is),
            map(
                preceded(pair(tag_no_case("like"), space1), regex_literal),
                ParamSpec::Like,
            ),
        )),
        trailing_comment,
    )(input)?;
    Ok((input, (name, spec)))
}

fn request_line(input: &str) -> IResult<&str, RequestDirective<'_>> {
    preceded(
        request_marker,
        alt((
            map(header_directive, |(name, value)| RequestDirective::Header {
                name,
                value,
            }),
            map(param_directive, |(name, spec)| RequestDirective::Param {
                name,
                spec,
            }),
        )),
    )(input)
}

fn response_line(input: &str) -> IResult<&str, ResponseDirective<'_>> {
    preceded(
        response_marker,
        alt((
            map(
                delimited(
                    pair(tag("delay"), space1),
                    map_res(digit1, |s: &str| s.parse::<u64>()),
                    trailing_comment,
                ),
                ResponseDirective::Delay,
            ),
            map(
                delimited(
                    pair(tag("status"), space1),
                    map_res(digit1, |s: &str| s.parse::<u16>()),
                    trailing_comment,
                ),
                ResponseDirective::Status,
            ),
            map(header_directive, |(name, value)| ResponseDirective::Header {
                name,
                value,
            }),
            map(body_directive, ResponseDirective::Body),
            value(
                ResponseDirective::Echo,
                terminated(tag("echo"), trailing_comment),
            ),
        )),
    )(input)
}

// ============================================================================
// Stanza builder
// ============================================================================

/// Directive groups, in the order they must appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Headers,
    Params,
    Response,
}

/// Collects the directives of one stanza.
struct StanzaBuilder {
    verbs: Vec<Verb>,
    path: String,
    start_line: usize,
    phase: Phase,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, ParamMatcher>,
    response: ResponseTemplate,
}

impl StanzaBuilder {
    fn new(verbs: Vec<Verb>, path: &str, start_line: usize) -> Self {
        let mut unique = Vec::with_capacity(verbs.len());
        for verb in verbs {
            if !unique.contains(&verb) {
                unique.push(verb);
            }
        }

        Self {
            verbs: unique,
            path: path.to_string(),
            start_line,
            phase: Phase::Headers,
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            response: ResponseTemplate::default(),
        }
    }

    fn enter(&mut self, phase: Phase, line: &Line<'_>, directive: &'static str) -> Result<(), ParseError> {
        if phase < self.phase {
            return Err(ParseError::OutOfOrder {
                line: line.number,
                directive,
            });
        }
        self.phase = phase;
        Ok(())
    }

    fn request(&mut self, directive: RequestDirective<'_>, line: &Line<'_>) -> Result<(), ParseError> {
        match directive {
            RequestDirective::Header { name, value } => {
                self.enter(Phase::Headers, line, "request header")?;
                self.headers
                    .insert(normalize_header_key(name), value.to_string());
            }
            RequestDirective::Param { name, spec } => {
                self.enter(Phase::Params, line, "param")?;
                let matcher = match spec {
                    ParamSpec::Is(value) => ParamMatcher::Exact {
                        value: value.to_string(),
                    },
                    ParamSpec::Like(pattern) => ParamMatcher::Pattern {
                        regex: Regex::new(pattern).map_err(|source| {
                            ParseError::InvalidPattern {
                                line: line.number,
                                pattern: pattern.to_string(),
                                source,
                            }
                        })?,
                    },
                };
                // A repeated name replaces the earlier matcher
                self.params.insert(name.to_string(), matcher);
            }
        }
        Ok(())
    }

    fn response<'a>(
        &mut self,
        directive: ResponseDirective<'a>,
        line: &Line<'a>,
        cursor: &mut Cursor<'a>,
    ) -> Result<(), ParseError> {
        self.phase = Phase::Response;
        match directive {
            ResponseDirective::Delay(ms) => self.response.delay_ms = Some(ms),
            ResponseDirective::Status(code) => {
                self.response.status =
                    StatusLine::lookup(code).map_err(|source| ParseError::UnknownStatus {
                        line: line.number,
                        source,
                    })?;
            }
            ResponseDirective::Header { name, value } => self.response.set_header(name, value),
            ResponseDirective::Body(text) => {
                let text = match text.strip_prefix(BLOCK_QUOTE) {
                    Some(opening) => read_block(cursor, line, opening)?,
                    None => text.to_string(),
                };
                self.response.body = ResponseBody::Literal { text };
            }
            ResponseDirective::Echo => self.response.body = ResponseBody::Echo,
        }
        Ok(())
    }

    /// Append the stanza's rule under every verb of its verb line.
    fn finish(self, table: &mut StanzaTable) {
        let rule = Rule {
            request: RequestPredicate {
                headers: (!self.headers.is_empty()).then_some(self.headers),
                params: (!self.params.is_empty()).then_some(self.params),
            },
            response: self.response,
        };

        debug!(
            verbs = ?self.verbs,
            path = %self.path,
            line = self.start_line,
            catch_all = rule.is_catch_all(),
            "Stanza recorded"
        );

        for verb in &self.verbs {
            table.push(*verb, &self.path, rule.clone());
        }
    }
}

/// Read a `<<<` delimited body that may continue over following lines.
fn read_block<'a>(
    cursor: &mut Cursor<'a>,
    opening: &Line<'a>,
    first: &'a str,
) -> Result<String, ParseError> {
    let mut text = String::new();
    let mut current = *opening;
    let mut segment = first;

    loop {
        if let Some(end) = scan_block(segment, &mut text) {
            let trailing = segment[end..].trim();
            if !trailing.is_empty() && !trailing.starts_with('#') {
                return Err(current.syntax_error("end of line or comment after closing '<<<'", trailing));
            }
            return Ok(text.trim().to_string());
        }

        current = cursor
            .next_raw()
            .ok_or(ParseError::UnterminatedBody {
                line: opening.number,
            })?;
        text.push('\n');
        segment = current.raw;
    }
}

/// Copy block text into `out` up to the closing delimiter.
///
/// Returns the offset just past the closing delimiter, or `None` when the
/// block continues on the next line. `<<<<<<` is an escaped `<<<`.
fn scan_block(segment: &str, out: &mut String) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = segment[offset..].find(BLOCK_QUOTE) {
        let start = offset + pos;
        out.push_str(&segment[offset..start]);
        let after = start + BLOCK_QUOTE.len();
        if segment[after..].starts_with(BLOCK_QUOTE) {
            out.push_str(BLOCK_QUOTE);
            offset = after + BLOCK_QUOTE.len();
        } else {
            return Some(after);
        }
    }
    out.push_str(&segment[offset..]);
    None
}
