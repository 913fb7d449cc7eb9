//! URL building utilities for Quadra API endpoints

use url::Url;

use crate::spec::RepoSpec;

/// Centralized URL builder for server endpoints.
/// Eliminates duplication and provides consistent URL construction.
#[derive(Debug)]
pub struct UrlBuilder<'a> {
    endpoint: &'a Url,
    parts: Vec<String>,
    query_params: Vec<(String, String)>,
}

impl<'a> UrlBuilder<'a> {
    pub fn new(endpoint: &'a Url) -> Self {
        Self {
            endpoint,
            parts: Vec::new(),
            query_params: Vec::new(),
        }
    }

    /// Add a fixed path segment (catalogs, repositories, session, ...).
    pub fn service(mut self, service: &str) -> Self {
        self.parts.push(service.to_string());
        self
    }

    /// Add the path of a repository, routing through its catalog when the
    /// spec names one.
    pub fn repository(mut self, spec: &RepoSpec) -> Self {
        if let Some(catalog) = &spec.catalog {
            self.parts.push(format!(
                "catalogs/{}/repositories/{}",
                catalog, spec.repository
            ));
        } else {
            self.parts
                .push(format!("repositories/{}", spec.repository));
        }
        self
    }

    /// Add the path of a catalog, or of the root catalog when absent.
    pub fn catalog(mut self, catalog: Option<&str>) -> Self {
        if let Some(catalog) = catalog {
            self.parts.push(format!("catalogs/{catalog}"));
        }
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query_params.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter with URL encoding.
    pub fn query_encoded(mut self, key: &str, value: &str) -> Self {
        self.query_params
            .push((key.to_string(), urlencoding::encode(value).to_string()));
        self
    }

    /// Build the final URL string.
    pub fn build(self) -> String {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = if self.parts.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, self.parts.join("/"))
        };

        if !self.query_params.is_empty() {
            let query_string = self
                .query_params
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query_string);
        }

        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://localhost:10035").unwrap()
    }

    #[test]
    fn builds_root_catalog_repository_urls() {
        let url = base();
        assert_eq!(
            UrlBuilder::new(&url)
                .repository(&RepoSpec::new("scratch"))
                .service("statements")
                .build(),
            "http://localhost:10035/repositories/scratch/statements"
        );
    }

    #[test]
    fn builds_named_catalog_repository_urls() {
        let url = base();
        assert_eq!(
            UrlBuilder::new(&url)
                .repository(&RepoSpec::in_catalog("tests", "scratch"))
                .service("size")
                .build(),
            "http://localhost:10035/catalogs/tests/repositories/scratch/size"
        );
    }

    #[test]
    fn appends_query_parameters() {
        let url = base();
        assert_eq!(
            UrlBuilder::new(&url)
                .service("session")
                .query("lifetime", "3600")
                .query_encoded("store", "<a b>")
                .build(),
            "http://localhost:10035/session?lifetime=3600&store=%3Ca%20b%3E"
        );
    }
}
