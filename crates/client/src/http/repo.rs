//! Repository-level client bound to one backend session.

use tracing::{debug, instrument};

use crate::error::{QuadraError, QuadraResult};
use crate::http::client::{QuadraHttpClient, RequestBody};
use crate::http::handler::{
    BooleanHandler, IgnoreHandler, LongHandler, RdfFormat, RdfHandler, ResponseHandler,
    StatementSink, StringHandler, TupleHandler, TupleRow,
};
use crate::http::query::{query_params, statement_params, Binding, Dataset, QueryLanguage, QueryOptions};
use crate::spec::RepoSpec;
use crate::storedproc::{self, SerialValue};
use crate::term::{encode_context, Term};

pub const DEFAULT_SESSION_LIFETIME: u64 = 3600;

#[derive(Clone, Debug)]
struct Backend {
    id: String,
    dedicated: bool,
}

/// Client for one repository, carrying at most one backend session.
///
/// One instance serves one logical caller at a time: session state lives in
/// `&mut self` methods, so the borrow checker enforces what the protocol
/// requires anyway. Draw one client per unit of work from the pool instead
/// of sharing an instance.
#[derive(Debug)]
pub struct QuadraRepoClient {
    transport: QuadraHttpClient,
    spec: RepoSpec,
    root: String,
    backend: Option<Backend>,
    autocommit: bool,
    session_lifetime: u64,
    load_init_file: bool,
    scripts: Vec<String>,
    preferred_rdf_format: RdfFormat,
    writable: bool,
}

impl QuadraRepoClient {
    pub fn new(transport: QuadraHttpClient, spec: RepoSpec) -> Self {
        let root = transport.build_url().repository(&spec).build();
        Self {
            transport,
            spec,
            root,
            backend: None,
            autocommit: true,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            load_init_file: false,
            scripts: Vec::new(),
            preferred_rdf_format: RdfFormat::NQuads,
            writable: true,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn spec(&self) -> &RepoSpec {
        &self.spec
    }

    pub fn transport(&self) -> &QuadraHttpClient {
        &self.transport
    }

    /// Seconds of idleness the server grants a backend before reclaiming
    /// it. Only affects sessions opened after the call.
    pub fn set_session_lifetime(&mut self, seconds: u64) {
        self.session_lifetime = seconds;
    }

    pub fn session_lifetime(&self) -> u64 {
        self.session_lifetime
    }

    pub fn set_session_load_init_file(&mut self, load: bool) {
        self.load_init_file = load;
    }

    /// Queue a server-side script to load into sessions opened later.
    pub fn add_session_load_script(&mut self, script: impl Into<String>) {
        self.scripts.push(script.into());
    }

    pub fn set_preferred_rdf_format(&mut self, format: RdfFormat) {
        self.preferred_rdf_format = format;
    }

    pub fn preferred_rdf_format(&self) -> RdfFormat {
        self.preferred_rdf_format
    }

    pub fn set_writable(&mut self, writable: bool) {
        self.writable = writable;
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn is_dedicated_session(&self) -> bool {
        self.backend.as_ref().is_some_and(|b| b.dedicated)
    }

    fn backend_id(&self) -> Option<&str> {
        self.backend.as_ref().map(|b| b.id.as_str())
    }

    /*----------*
     * Sessions *
     *----------*/

    /// Open a backend session if this client does not have one yet. The
    /// returned token is attached as a header to every subsequent call.
    #[instrument(name = "quadra.session.open", skip(self), fields(repo = %self.spec.store_spec()))]
    pub async fn ensure_backend(&mut self, autocommit: bool) -> QuadraResult<String> {
        if let Some(backend) = &self.backend {
            return Ok(backend.id.clone());
        }
        let url = format!("{}/session", self.root);
        let mut params = vec![
            ("lifetime".to_string(), self.session_lifetime.to_string()),
            ("autoCommit".to_string(), autocommit.to_string()),
            ("loadInitFile".to_string(), self.load_init_file.to_string()),
        ];
        for script in &self.scripts {
            params.push(("script".to_string(), script.clone()));
        }
        let token = self
            .transport
            .post(&url, &[], &params, None, None, StringHandler)
            .await?;
        let id = token.trim().to_string();
        debug!("opened backend {id}");
        self.backend = Some(Backend {
            id: id.clone(),
            dedicated: true,
        });
        self.autocommit = autocommit;
        Ok(id)
    }

    /// Toggle autocommit. Forces a dedicated backend: a shared connection
    /// that turns autocommit off is dedicated from then on.
    #[instrument(name = "quadra.session.autocommit", skip(self))]
    pub async fn set_autocommit(&mut self, autocommit: bool) -> QuadraResult<()> {
        self.ensure_backend(autocommit).await?;
        let url = format!("{}/session/autocommit", self.root);
        let params = vec![("on".to_string(), autocommit.to_string())];
        self.transport
            .post(&url, &[], &params, None, self.backend_id(), IgnoreHandler)
            .await?;
        self.autocommit = autocommit;
        Ok(())
    }

    /// Cheap keep-alive so the backend's idle lifetime does not elapse.
    /// Sessions are never renewed implicitly; call this (or accept expiry).
    pub async fn ping(&self) -> QuadraResult<()> {
        if let Some(backend) = self.backend_id() {
            let url = format!("{}/session/ping", self.root);
            self.transport
                .get(&url, &[], &[], Some(backend), IgnoreHandler)
                .await?;
        }
        Ok(())
    }

    /// Release the backend on the server. Idempotent: closing an already
    /// closed client does nothing, and a backend that died on its own
    /// (expired lifetime) is treated as already closed.
    #[instrument(name = "quadra.session.close", skip(self))]
    pub async fn close(&mut self) -> QuadraResult<()> {
        if let Some(backend) = self.backend.take() {
            let url = format!("{}/session/close", self.root);
            match self
                .transport
                .post(&url, &[], &[], None, Some(&backend.id), IgnoreHandler)
                .await
            {
                Ok(()) => debug!("closed backend {}", backend.id),
                Err(err) => {
                    // Assume the session was already gone.
                    debug!("ignoring close error for backend {}: {err}", backend.id);
                }
            }
        }
        Ok(())
    }

    /// A self-contained future that releases this client's backend without
    /// borrowing the client. Pool shutdown uses this to close sessions of
    /// connections it no longer owns; close errors are ignored there for
    /// the same reason they are in [`close`](Self::close).
    pub fn detached_session_closer(
        &self,
    ) -> Option<impl std::future::Future<Output = ()> + Send + 'static> {
        let backend = self.backend.as_ref()?.id.clone();
        let transport = self.transport.clone();
        let url = format!("{}/session/close", self.root);
        Some(async move {
            if let Err(err) = transport
                .post(&url, &[], &[], None, Some(&backend), IgnoreHandler)
                .await
            {
                debug!("ignoring detached close error for backend {backend}: {err}");
            }
        })
    }

    /*------------*
     * Statements *
     *------------*/

    /// Stream statements matching the pattern into `sink`; absent pattern
    /// components act as wildcards. Returns the number of statements.
    pub async fn get_statements<S: StatementSink + Send>(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        include_inferred: bool,
        contexts: &[Option<Term>],
        sink: &mut S,
    ) -> QuadraResult<usize> {
        let url = format!("{}/statements", self.root);
        let mut params = statement_params(subject, predicate, object, contexts);
        params.push(("infer".to_string(), include_inferred.to_string()));
        self.transport
            .get(
                &url,
                &[],
                &params,
                self.backend_id(),
                RdfHandler::new(self.preferred_rdf_format, sink),
            )
            .await
    }

    /// Fetch statements by statement id. Ids come from query results that
    /// expose them; this is a point lookup, not a pattern match.
    pub async fn get_statements_by_id<S: StatementSink + Send>(
        &self,
        ids: &[String],
        sink: &mut S,
    ) -> QuadraResult<usize> {
        let url = format!("{}/statements/id", self.root);
        let params: Vec<(String, String)> = ids
            .iter()
            .map(|id| ("id".to_string(), id.clone()))
            .collect();
        self.transport
            .get(
                &url,
                &[],
                &params,
                self.backend_id(),
                RdfHandler::new(self.preferred_rdf_format, sink),
            )
            .await
    }

    /// Add one statement, optionally into specific graphs.
    pub async fn add_statement(
        &self,
        subject: &Term,
        predicate: &Term,
        object: &Term,
        contexts: &[Option<Term>],
    ) -> QuadraResult<()> {
        let url = format!("{}/statements", self.root);
        let params = statement_params(Some(subject), Some(predicate), Some(object), contexts);
        self.transport
            .post(&url, &[], &params, None, self.backend_id(), IgnoreHandler)
            .await
    }

    /// Upload a statement document as the request body.
    ///
    /// `overwrite = true` (replace the repository content) is not supported
    /// by the protocol and fails fast instead of silently appending.
    #[instrument(name = "quadra.statements.upload", skip(self, content), fields(repo = %self.spec.store_spec()))]
    pub async fn upload(
        &self,
        content: Vec<u8>,
        base_uri: Option<&str>,
        format: RdfFormat,
        overwrite: bool,
        contexts: &[Option<Term>],
    ) -> QuadraResult<()> {
        if overwrite {
            return Err(QuadraError::Misuse(
                "overwrite=true uploads are not supported; delete the statements first".to_string(),
            ));
        }
        let url = format!("{}/statements", self.root);
        let mut params: Vec<(String, String)> = contexts
            .iter()
            .map(|ctx| ("context".to_string(), encode_context(ctx.as_ref())))
            .collect();
        if let Some(base_uri) = base_uri {
            if !base_uri.trim().is_empty() {
                params.push(("baseURI".to_string(), format!("<{base_uri}>")));
            }
        }
        let body = RequestBody::bytes(format.mime_type().to_string(), content);
        self.transport
            .post(&url, &[], &params, Some(body), self.backend_id(), IgnoreHandler)
            .await
    }

    /// Delete all statements matching the pattern; absent components act
    /// as wildcards, so an empty pattern clears the listed graphs (or the
    /// whole repository).
    pub async fn delete_statements(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        contexts: &[Option<Term>],
    ) -> QuadraResult<()> {
        let url = format!("{}/statements", self.root);
        let params = statement_params(subject, predicate, object, contexts);
        self.transport
            .delete(&url, &[], &params, self.backend_id(), IgnoreHandler)
            .await
    }

    /// Number of statements, optionally restricted to specific graphs.
    pub async fn size(&self, contexts: &[Option<Term>]) -> QuadraResult<i64> {
        let url = format!("{}/size", self.root);
        let params: Vec<(String, String)> = contexts
            .iter()
            .map(|ctx| ("context".to_string(), encode_context(ctx.as_ref())))
            .collect();
        self.transport
            .get(&url, &[], &params, self.backend_id(), LongHandler)
            .await
    }

    /// The graph names present in the repository.
    pub async fn get_context_ids(&self) -> QuadraResult<Vec<Term>> {
        let url = format!("{}/contexts", self.root);
        let mut rows: Vec<TupleRow> = Vec::new();
        self.transport
            .get(&url, &[], &[], self.backend_id(), TupleHandler::new(&mut rows))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.remove("contextID"))
            .collect())
    }

    /*--------------*
     * Transactions *
     *--------------*/

    /// The server defines what committing outside a transaction means;
    /// nothing is special-cased here.
    pub async fn commit(&self) -> QuadraResult<()> {
        let url = format!("{}/commit", self.root);
        self.transport
            .post(&url, &[], &[], None, self.backend_id(), IgnoreHandler)
            .await
    }

    pub async fn rollback(&self) -> QuadraResult<()> {
        let url = format!("{}/rollback", self.root);
        self.transport
            .post(&url, &[], &[], None, self.backend_id(), IgnoreHandler)
            .await
    }

    /*------------*
     * Namespaces *
     *------------*/

    /// Prefix/namespace pairs registered in the repository.
    pub async fn get_namespaces(&self) -> QuadraResult<Vec<(String, String)>> {
        let url = format!("{}/namespaces", self.root);
        let mut rows: Vec<TupleRow> = Vec::new();
        self.transport
            .get(&url, &[], &[], self.backend_id(), TupleHandler::new(&mut rows))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let prefix = row.get("prefix")?;
                let namespace = row.get("namespace")?;
                Some((lexical(prefix), lexical(namespace)))
            })
            .collect())
    }

    pub async fn get_namespace(&self, prefix: &str) -> QuadraResult<String> {
        let url = format!("{}/namespaces/{}", self.root, urlencoding::encode(prefix));
        self.transport
            .get(&url, &[], &[], self.backend_id(), StringHandler)
            .await
    }

    pub async fn set_namespace_prefix(&self, prefix: &str, name: &str) -> QuadraResult<()> {
        let url = format!("{}/namespaces/{}", self.root, urlencoding::encode(prefix));
        let body = RequestBody::text("text/plain; charset=UTF-8", name);
        self.transport
            .put(&url, &[], &[], Some(body), self.backend_id(), IgnoreHandler)
            .await
    }

    pub async fn remove_namespace_prefix(&self, prefix: &str) -> QuadraResult<()> {
        let url = format!("{}/namespaces/{}", self.root, urlencoding::encode(prefix));
        self.transport
            .delete(&url, &[], &[], self.backend_id(), IgnoreHandler)
            .await
    }

    pub async fn clear_namespaces(&self) -> QuadraResult<()> {
        let url = format!("{}/namespaces", self.root);
        self.transport
            .delete(&url, &[], &[], self.backend_id(), IgnoreHandler)
            .await
    }

    /*---------*
     * Queries *
     *---------*/

    /// Run a query, decoding the result with the handler the caller picked
    /// for the expected shape (boolean/tuple/graph/...).
    #[instrument(name = "quadra.query", skip(self, handler, query), fields(lang = language.as_param()))]
    pub async fn query<H: ResponseHandler>(
        &self,
        handler: H,
        language: QueryLanguage,
        query: &str,
        dataset: Option<&Dataset>,
        include_inferred: bool,
        bindings: &[Binding],
        options: &QueryOptions,
    ) -> QuadraResult<H::Output> {
        let params = query_params(language, query, include_inferred, dataset, bindings, options);
        self.transport
            .post(&self.root, &[], &params, None, self.backend_id(), handler)
            .await
    }

    /// Convenience: run a boolean (ASK-shaped) query.
    pub async fn boolean_query(
        &self,
        language: QueryLanguage,
        query: &str,
    ) -> QuadraResult<bool> {
        self.query(
            BooleanHandler,
            language,
            query,
            None,
            false,
            &[],
            &QueryOptions::default(),
        )
        .await
    }

    /*---------------*
     * Id allocation *
     *---------------*/

    /// Ask the server to mint `amount` fresh blank-node ids.
    pub async fn get_blank_nodes(&self, amount: usize) -> QuadraResult<Vec<String>> {
        let url = format!("{}/blankNodes", self.root);
        let params = vec![("amount".to_string(), amount.to_string())];
        let body = self
            .transport
            .post(&url, &[], &params, None, self.backend_id(), StringHandler)
            .await?;
        Ok(body.lines().map(str::to_string).collect())
    }

    /// Ask the server to mint `amount` encoded URIs under `prefix`.
    pub async fn generate_uris(&self, prefix: &str, amount: usize) -> QuadraResult<Vec<String>> {
        let url = format!("{}/encodedIds", self.root);
        let params = vec![
            ("prefix".to_string(), prefix.to_string()),
            ("amount".to_string(), amount.to_string()),
        ];
        let body = self
            .transport
            .post(&url, &[], &params, None, self.backend_id(), StringHandler)
            .await?;
        Ok(body.lines().map(str::to_string).collect())
    }

    /*-------------------*
     * Stored procedures *
     *-------------------*/

    /// Call a server-side procedure, marshaling arguments and result
    /// through the wire codec.
    #[instrument(name = "quadra.storedproc", skip(self, args))]
    pub async fn call_stored_proc(
        &self,
        function: &str,
        module: &str,
        args: &SerialValue,
    ) -> QuadraResult<SerialValue> {
        let url = format!("{}/custom/{}", self.root, function);
        let headers = [("x-scripts", module.to_string())];
        let params = vec![(
            "spargstr".to_string(),
            storedproc::serialize_and_encode(args)?,
        )];
        let body = self
            .transport
            .post(&url, &headers, &params, None, self.backend_id(), StringHandler)
            .await?;
        storedproc::decode_and_deserialize(body.trim())
    }
}

fn lexical(term: &Term) -> String {
    match term {
        Term::Literal { value, .. } => value.clone(),
        other => other.to_string(),
    }
}
