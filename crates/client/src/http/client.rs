//! Core HTTP transport and the server-level services built directly on it.

use std::time::Duration;

use reqwest::{header, Client, Method, Response};
use tracing::{debug, instrument, trace};
use url::Url;

use crate::error::{QuadraError, QuadraResult};
use crate::http::handler::{IgnoreHandler, ResponseHandler, StringHandler, TupleHandler, TupleRow};
use crate::http::url_builder::UrlBuilder;
use crate::spec::RepoSpec;

/// Header carrying the backend session token on every call bound to a
/// session.
pub const BACKEND_HEADER: &str = "X-Backend-Id";

/// A request body plus the content type it travels under.
#[derive(Debug)]
pub struct RequestBody {
    pub content_type: String,
    pub content: Vec<u8>,
}

impl RequestBody {
    pub fn text(content_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            content: content.into().into_bytes(),
        }
    }

    pub fn bytes(content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            content,
        }
    }
}

/// HTTP transport bound to one server endpoint.
///
/// Safe for concurrent use: the underlying reqwest client keeps an
/// unbounded keep-alive pool per host, so parallel callers do not
/// serialize on the connection manager. Cloning shares that pool.
#[derive(Clone, Debug)]
pub struct QuadraHttpClient {
    endpoint: Url,
    /// user auth for this server, password alongside
    username: Option<String>,
    password: Option<String>,
    http: Client,
}

impl QuadraHttpClient {
    /// Build a transport for the given server endpoint.
    ///
    /// `socket_timeout` bounds each socket-level operation (there is no
    /// per-logical-request deadline); `use_gzip` controls response
    /// compression negotiation and defaults to on in the factory path.
    pub fn new(
        endpoint: Url,
        username: Option<&str>,
        password: Option<&str>,
        socket_timeout: Option<Duration>,
        use_gzip: bool,
    ) -> QuadraResult<Self> {
        let mut builder = Client::builder()
            .gzip(use_gzip)
            // Pooled connections issuing requests in parallel must not
            // contend for per-host slots.
            .pool_max_idle_per_host(usize::MAX);
        if let Some(timeout) = socket_timeout {
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        let http = builder.build().map_err(|e| QuadraError::Network {
            message: format!("could not build the HTTP client: {e}"),
            source: Some(e),
        })?;

        debug!("connect: {endpoint}");

        Ok(Self {
            endpoint,
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            http,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn build_url(&self) -> UrlBuilder<'_> {
        UrlBuilder::new(&self.endpoint)
    }

    pub(crate) async fn get<H: ResponseHandler>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        params: &[(String, String)],
        backend: Option<&str>,
        handler: H,
    ) -> QuadraResult<H::Output> {
        let request = self
            .prepare(Method::GET, url, headers, backend, &handler)
            .query(params);
        self.execute(request, handler, backend.is_some()).await
    }

    /// POST; without a body the parameters travel as a form body (they can
    /// be arbitrarily large query texts), with a body they move to the
    /// query string.
    pub(crate) async fn post<H: ResponseHandler>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        params: &[(String, String)],
        body: Option<RequestBody>,
        backend: Option<&str>,
        handler: H,
    ) -> QuadraResult<H::Output> {
        let mut request = self.prepare(Method::POST, url, headers, backend, &handler);
        request = match body {
            None => request.form(params),
            Some(body) => request
                .query(params)
                .header(header::CONTENT_TYPE, body.content_type)
                .body(body.content),
        };
        self.execute(request, handler, backend.is_some()).await
    }

    pub(crate) async fn put<H: ResponseHandler>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        params: &[(String, String)],
        body: Option<RequestBody>,
        backend: Option<&str>,
        handler: H,
    ) -> QuadraResult<H::Output> {
        let mut request = self
            .prepare(Method::PUT, url, headers, backend, &handler)
            .query(params);
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, body.content_type)
                .body(body.content);
        }
        self.execute(request, handler, backend.is_some()).await
    }

    pub(crate) async fn delete<H: ResponseHandler>(
        &self,
        url: &str,
        headers: &[(&str, String)],
        params: &[(String, String)],
        backend: Option<&str>,
        handler: H,
    ) -> QuadraResult<H::Output> {
        let request = self
            .prepare(Method::DELETE, url, headers, backend, &handler)
            .query(params);
        self.execute(request, handler, backend.is_some()).await
    }

    fn prepare<H: ResponseHandler>(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, String)],
        backend: Option<&str>,
        handler: &H,
    ) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method, url)
            .header(header::CONNECTION, "keep-alive");
        if let Some(username) = &self.username {
            // Preemptive: the credentials ride along instead of waiting
            // for a challenge.
            request = request.basic_auth(username, self.password.as_deref());
        }
        if let Some(accept) = handler.accept() {
            request = request.header(header::ACCEPT, accept);
        }
        if let Some(backend) = backend {
            request = request.header(BACKEND_HEADER, backend);
        }
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        request
    }

    /// Send and classify. 2xx hands the body to the handler; 401 raises
    /// unauthorized; everything else parses the `"<LABEL>: <message>"`
    /// error body. All paths consume the body so the connection returns to
    /// the keep-alive pool.
    async fn execute<H: ResponseHandler>(
        &self,
        request: reqwest::RequestBuilder,
        handler: H,
        session_active: bool,
    ) -> QuadraResult<H::Output> {
        let response = request
            .send()
            .await
            .map_err(|e| QuadraError::from_transport(e, session_active))?;

        trace!("response status: {}", response.status());

        let status = response.status();
        if status.is_success() {
            handler.handle(response).await
        } else if status == reqwest::StatusCode::UNAUTHORIZED {
            drain(response).await;
            Err(QuadraError::Unauthorized)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(QuadraError::from_error_body(&body))
        }
    }

    /*-----------*
     * Services  *
     *-----------*/

    /// Create a repository. Never overwrites an existing one: the server is
    /// told `override=false` and re-creating is a no-op there.
    #[instrument(name = "quadra.repository.create", skip(self), fields(repo = %spec.store_spec()))]
    pub async fn put_repository(&self, spec: &RepoSpec) -> QuadraResult<()> {
        let url = self.build_url().repository(spec).build();
        debug!("put_repository: {url}");
        let params = vec![("override".to_string(), "false".to_string())];
        self.put(&url, &[], &params, None, None, IgnoreHandler)
            .await
    }

    #[instrument(name = "quadra.repository.delete", skip(self), fields(repo = %spec.store_spec()))]
    pub async fn delete_repository(&self, spec: &RepoSpec) -> QuadraResult<()> {
        let url = self.build_url().repository(spec).build();
        self.delete(&url, &[], &[], None, IgnoreHandler).await
    }

    /// Names of the repositories in a catalog (the root catalog when
    /// `catalog` is absent).
    pub async fn list_repositories(&self, catalog: Option<&str>) -> QuadraResult<Vec<String>> {
        let url = self
            .build_url()
            .catalog(catalog)
            .service("repositories")
            .build();
        let mut rows: Vec<TupleRow> = Vec::new();
        self.get(&url, &[], &[], None, TupleHandler::new(&mut rows))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get("id") {
                Some(crate::term::Term::Literal { value, .. }) => Some(value.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .collect())
    }

    pub async fn has_repository(&self, spec: &RepoSpec) -> QuadraResult<bool> {
        let names = self.list_repositories(spec.catalog.as_deref()).await?;
        Ok(names.iter().any(|name| name == &spec.repository))
    }

    /// Names of the catalogs on the server (the root catalog is implicit
    /// and not listed).
    pub async fn list_catalogs(&self) -> QuadraResult<Vec<String>> {
        let url = self.build_url().service("catalogs").build();
        let mut rows: Vec<TupleRow> = Vec::new();
        self.get(&url, &[], &[], None, TupleHandler::new(&mut rows))
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.get("id") {
                Some(crate::term::Term::Literal { value, .. }) => Some(value.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .collect())
    }

    /// Fetch a raw string body.
    pub async fn get_string(&self, url: &str) -> QuadraResult<String> {
        self.get(url, &[], &[], None, StringHandler).await
    }

    /// Fetch a newline-separated string array; an empty body is an empty
    /// array.
    pub async fn get_string_array(&self, url: &str) -> QuadraResult<Vec<String>> {
        let body = self.get_string(url).await?;
        if body.is_empty() {
            return Ok(Vec::new());
        }
        Ok(body.lines().map(str::to_string).collect())
    }
}

async fn drain(response: Response) {
    // Read the entire response body so the connection can be reused.
    let _ = response.bytes().await;
}
