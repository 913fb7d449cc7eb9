//! Minimal RDF term and statement model.
//!
//! The client does not understand RDF beyond what the wire protocol needs:
//! terms are encoded in their N-Triples form for request parameters, and
//! statement bodies are negotiated as N-Triples/N-Quads. Full syntax stacks
//! (Turtle, RDF/XML, ...) belong to the layers above this crate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{QuadraError, QuadraResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    Iri(String),
    BlankNode(String),
    Literal {
        value: String,
        /// Datatype IRI, absent for plain literals.
        datatype: Option<String>,
        language: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri(value.into())
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Term::BlankNode(id.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }

    pub fn is_resource(&self) -> bool {
        !matches!(self, Term::Literal { .. })
    }
}

impl fmt::Display for Term {
    /// N-Triples encoding, as sent in `subj`/`pred`/`obj` request params.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::BlankNode(id) => write!(f, "_:{id}"),
            Term::Literal {
                value,
                datatype,
                language,
            } => {
                write!(f, "\"{}\"", escape_literal(value))?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")?;
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")?;
                }
                Ok(())
            }
        }
    }
}

/// Wire encoding of a context (named graph) parameter. The default graph is
/// addressed by the literal string `null`.
pub fn encode_context(ctx: Option<&Term>) -> String {
    match ctx {
        Some(term) => term.to_string(),
        None => "null".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    /// Named graph; `None` is the default graph.
    pub context: Option<Term>,
}

impl Statement {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Statement {
            subject,
            predicate,
            object,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Term) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(ctx) = &self.context {
            write!(f, " {ctx}")?;
        }
        write!(f, " .")
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_literal(value: &str) -> QuadraResult<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| QuadraError::Decode(format!("bad \\u escape: {hex}")))?;
                out.push(
                    char::from_u32(code)
                        .ok_or_else(|| QuadraError::Decode(format!("bad code point: {code}")))?,
                );
            }
            other => {
                return Err(QuadraError::Decode(format!(
                    "bad escape sequence in literal: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// Parse one N-Triples/N-Quads line into a statement. Empty and comment
/// lines yield `None`.
pub(crate) fn parse_statement_line(line: &str) -> QuadraResult<Option<Statement>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut rest = line;
    let subject = take_term(&mut rest)?;
    let predicate = take_term(&mut rest)?;
    let object = take_term(&mut rest)?;
    let rest_trimmed = rest.trim_start();
    let context = if rest_trimmed.starts_with('.') {
        None
    } else {
        Some(take_term(&mut rest)?)
    };
    let tail = rest.trim();
    if tail != "." {
        return Err(QuadraError::Decode(format!(
            "statement line not terminated by '.': {line}"
        )));
    }
    Ok(Some(Statement {
        subject,
        predicate,
        object,
        context,
    }))
}

fn take_term(input: &mut &str) -> QuadraResult<Term> {
    let s = input.trim_start();
    let bad = |s: &str| QuadraError::Decode(format!("malformed term at: {s}"));
    match s.as_bytes().first() {
        Some(b'<') => {
            let end = s.find('>').ok_or_else(|| bad(s))?;
            let term = Term::Iri(s[1..end].to_string());
            *input = &s[end + 1..];
            Ok(term)
        }
        Some(b'_') => {
            if !s.starts_with("_:") {
                return Err(bad(s));
            }
            let end = s[2..]
                .find(|c: char| c.is_whitespace())
                .map(|i| i + 2)
                .unwrap_or(s.len());
            let term = Term::BlankNode(s[2..end].to_string());
            *input = &s[end..];
            Ok(term)
        }
        Some(b'"') => {
            // Find the closing quote, skipping escaped ones.
            let bytes = s.as_bytes();
            let mut i = 1;
            loop {
                match bytes.get(i) {
                    None => return Err(bad(s)),
                    Some(b'\\') => i += 2,
                    Some(b'"') => break,
                    Some(_) => i += 1,
                }
            }
            let value = unescape_literal(&s[1..i])?;
            let mut rest = &s[i + 1..];
            let term = if let Some(stripped) = rest.strip_prefix("@") {
                let end = stripped
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(stripped.len());
                let lang = stripped[..end].to_string();
                rest = &stripped[end..];
                Term::Literal {
                    value,
                    datatype: None,
                    language: Some(lang),
                }
            } else if let Some(stripped) = rest.strip_prefix("^^<") {
                let end = stripped.find('>').ok_or_else(|| bad(s))?;
                let dt = stripped[..end].to_string();
                rest = &stripped[end + 1..];
                Term::Literal {
                    value,
                    datatype: Some(dt),
                    language: None,
                }
            } else {
                Term::Literal {
                    value,
                    datatype: None,
                    language: None,
                }
            };
            *input = rest;
            Ok(term)
        }
        _ => Err(bad(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_display_is_ntriples() {
        assert_eq!(Term::iri("http://ex.org/a").to_string(), "<http://ex.org/a>");
        assert_eq!(Term::blank("b0").to_string(), "_:b0");
        assert_eq!(Term::literal("hi \"there\"").to_string(), r#""hi \"there\"""#);
        assert_eq!(
            Term::typed_literal("5", "http://www.w3.org/2001/XMLSchema#int").to_string(),
            "\"5\"^^<http://www.w3.org/2001/XMLSchema#int>"
        );
        assert_eq!(Term::lang_literal("hallo", "de").to_string(), "\"hallo\"@de");
    }

    #[test]
    fn default_graph_context_encodes_as_null() {
        assert_eq!(encode_context(None), "null");
        assert_eq!(
            encode_context(Some(&Term::iri("http://ex.org/g"))),
            "<http://ex.org/g>"
        );
    }

    #[test]
    fn parses_triple_and_quad_lines() {
        let triple = parse_statement_line(
            "<http://ex.org/s> <http://ex.org/p> \"v\\n1\"@en .",
        )
        .unwrap()
        .unwrap();
        assert_eq!(triple.subject, Term::iri("http://ex.org/s"));
        assert_eq!(triple.object, Term::lang_literal("v\n1", "en"));
        assert_eq!(triple.context, None);

        let quad = parse_statement_line(
            "_:b1 <http://ex.org/p> <http://ex.org/o> <http://ex.org/g> .",
        )
        .unwrap()
        .unwrap();
        assert_eq!(quad.subject, Term::blank("b1"));
        assert_eq!(quad.context, Some(Term::iri("http://ex.org/g")));
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(parse_statement_line("").unwrap(), None);
        assert_eq!(parse_statement_line("# header").unwrap(), None);
    }

    #[test]
    fn rejects_unterminated_lines() {
        assert!(parse_statement_line("<a> <b> <c>").is_err());
    }

    #[test]
    fn statement_display_round_trips_through_parser() {
        let st = Statement::new(
            Term::iri("http://ex.org/s"),
            Term::iri("http://ex.org/p"),
            Term::literal("x \"y\""),
        )
        .with_context(Term::iri("http://ex.org/g"));
        let parsed = parse_statement_line(&st.to_string()).unwrap().unwrap();
        assert_eq!(parsed, st);
    }
}
