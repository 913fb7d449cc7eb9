//! Response handlers: one strategy per response shape.
//!
//! The caller picks the handler before the request goes out; the handler
//! both declares the `Accept` header to negotiate and decodes the 2xx body.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use reqwest::Response;
use serde_json::Value;

use crate::error::{QuadraError, QuadraResult};
use crate::term::{parse_statement_line, Statement, Term};

/// RDF serializations the transport can negotiate for statement bodies.
///
/// Anything richer (Turtle, RDF/XML, ...) is the business of the layers
/// above this crate; the wire only ever carries line-oriented formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RdfFormat {
    NTriples,
    NQuads,
}

impl RdfFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            RdfFormat::NTriples => "text/plain",
            RdfFormat::NQuads => "text/x-nquads",
        }
    }

    fn from_content_type(value: &str) -> Option<Self> {
        let mime = value.split(';').next().unwrap_or(value).trim();
        match mime {
            "text/plain" | "application/n-triples" => Some(RdfFormat::NTriples),
            "text/x-nquads" | "application/n-quads" => Some(RdfFormat::NQuads),
            _ => None,
        }
    }
}

/// Receives statements as the RDF handler decodes them off the wire.
pub trait StatementSink {
    fn handle_statement(&mut self, statement: Statement) -> QuadraResult<()>;
}

impl StatementSink for Vec<Statement> {
    fn handle_statement(&mut self, statement: Statement) -> QuadraResult<()> {
        self.push(statement);
        Ok(())
    }
}

/// One row of a tuple result: variable name to bound term.
pub type TupleRow = BTreeMap<String, Term>;

/// Receives rows as the tuple handler decodes them.
pub trait RowSink {
    fn handle_row(&mut self, row: TupleRow) -> QuadraResult<()>;
}

impl RowSink for Vec<TupleRow> {
    fn handle_row(&mut self, row: TupleRow) -> QuadraResult<()> {
        self.push(row);
        Ok(())
    }
}

/// Strategy for decoding a successful response body.
///
/// Implementations fully consume the body (streaming ones drain it
/// incrementally), so the underlying connection always returns to the
/// keep-alive pool.
pub trait ResponseHandler {
    type Output;

    /// The `Accept` header to send, when this shape negotiates one.
    fn accept(&self) -> Option<&'static str> {
        None
    }

    fn handle(self, response: Response) -> impl std::future::Future<Output = QuadraResult<Self::Output>> + Send;
}

/// Discards the body; for calls where only the status matters.
pub struct IgnoreHandler;

impl ResponseHandler for IgnoreHandler {
    type Output = ();

    async fn handle(self, response: Response) -> QuadraResult<()> {
        // Drain so the connection can be reused.
        let _ = response.bytes().await;
        Ok(())
    }
}

/// Returns the raw decoded body.
pub struct StringHandler;

impl ResponseHandler for StringHandler {
    type Output = String;

    fn accept(&self) -> Option<&'static str> {
        Some("text/plain")
    }

    async fn handle(self, response: Response) -> QuadraResult<String> {
        response
            .text()
            .await
            .map_err(|e| QuadraError::Decode(format!("could not read response body: {e}")))
    }
}

/// Parses the body as a base-10 integer.
pub struct LongHandler;

impl ResponseHandler for LongHandler {
    type Output = i64;

    fn accept(&self) -> Option<&'static str> {
        Some("text/integer")
    }

    async fn handle(self, response: Response) -> QuadraResult<i64> {
        let body = StringHandler.handle(response).await?;
        body.trim()
            .parse()
            .map_err(|_| QuadraError::Decode(format!("expected an integer body, got {body:?}")))
    }
}

/// Parses the body as a single boolean token.
pub struct BooleanHandler;

impl ResponseHandler for BooleanHandler {
    type Output = bool;

    fn accept(&self) -> Option<&'static str> {
        Some("text/boolean")
    }

    async fn handle(self, response: Response) -> QuadraResult<bool> {
        let body = StringHandler.handle(response).await?;
        match body.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(QuadraError::Decode(format!(
                "expected a boolean body, got {other:?}"
            ))),
        }
    }
}

/// Parses the body into a generic JSON value.
pub struct JsonHandler;

impl ResponseHandler for JsonHandler {
    type Output = Value;

    fn accept(&self) -> Option<&'static str> {
        Some("application/json")
    }

    async fn handle(self, response: Response) -> QuadraResult<Value> {
        response
            .json()
            .await
            .map_err(|e| QuadraError::Decode(format!("malformed JSON body: {e}")))
    }
}

/// Streams an RDF body into a statement sink, choosing the serialization
/// by the response `Content-Type`. Returns the number of statements fed.
pub struct RdfHandler<'a, S: StatementSink> {
    sink: &'a mut S,
    format: RdfFormat,
}

impl<'a, S: StatementSink> RdfHandler<'a, S> {
    pub fn new(format: RdfFormat, sink: &'a mut S) -> Self {
        Self { sink, format }
    }
}

impl<S: StatementSink + Send> ResponseHandler for RdfHandler<'_, S> {
    type Output = usize;

    fn accept(&self) -> Option<&'static str> {
        Some(self.format.mime_type())
    }

    async fn handle(self, response: Response) -> QuadraResult<usize> {
        // The negotiated format is a request; trust what the server says
        // it actually sent.
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.is_empty() && RdfFormat::from_content_type(&content_type).is_none() {
            // Drain before erroring so the connection is reusable.
            let _ = response.bytes().await;
            return Err(QuadraError::Decode(format!(
                "unsupported RDF serialization in response: {content_type}"
            )));
        }

        let mut count = 0usize;
        let mut pending = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| QuadraError::Decode(format!("body stream failed: {e}")))?;
            pending.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                if let Some(statement) = parse_statement_line(&line)? {
                    self.sink.handle_statement(statement)?;
                    count += 1;
                }
            }
        }
        if let Some(statement) = parse_statement_line(&pending)? {
            self.sink.handle_statement(statement)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Decodes a SPARQL-JSON tuple result into a row sink. Returns the number
/// of rows fed.
pub struct TupleHandler<'a, S: RowSink> {
    sink: &'a mut S,
}

impl<'a, S: RowSink> TupleHandler<'a, S> {
    pub fn new(sink: &'a mut S) -> Self {
        Self { sink }
    }
}

impl<S: RowSink + Send> ResponseHandler for TupleHandler<'_, S> {
    type Output = usize;

    fn accept(&self) -> Option<&'static str> {
        Some("application/sparql-results+json")
    }

    async fn handle(self, response: Response) -> QuadraResult<usize> {
        let body: Value = JsonHandler.handle(response).await?;
        let bindings = body
            .get("results")
            .and_then(|r| r.get("bindings"))
            .and_then(|b| b.as_array())
            .ok_or_else(|| {
                QuadraError::Decode("tuple result body has no results/bindings".to_string())
            })?;

        let mut count = 0usize;
        for binding in bindings {
            let object = binding.as_object().ok_or_else(|| {
                QuadraError::Decode("tuple result binding is not an object".to_string())
            })?;
            let mut row = TupleRow::new();
            for (name, value) in object {
                row.insert(name.clone(), decode_sparql_json_term(value)?);
            }
            self.sink.handle_row(row)?;
            count += 1;
        }
        Ok(count)
    }
}

fn decode_sparql_json_term(value: &Value) -> QuadraResult<Term> {
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| QuadraError::Decode(format!("binding without a type: {value}")))?;
    let lexical = value
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or_else(|| QuadraError::Decode(format!("binding without a value: {value}")))?;
    match kind {
        "uri" => Ok(Term::iri(lexical)),
        "bnode" => Ok(Term::blank(lexical)),
        "literal" | "typed-literal" => {
            if let Some(lang) = value.get("xml:lang").and_then(|l| l.as_str()) {
                Ok(Term::lang_literal(lexical, lang))
            } else if let Some(dt) = value.get("datatype").and_then(|d| d.as_str()) {
                Ok(Term::typed_literal(lexical, dt))
            } else {
                Ok(Term::literal(lexical))
            }
        }
        other => Err(QuadraError::Decode(format!(
            "unknown binding type {other:?}"
        ))),
    }
}
