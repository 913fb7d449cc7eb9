use serde::{Deserialize, Serialize};

/// Addresses a repository on the server: an optional catalog (absent means
/// the root catalog) plus the repository name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSpec {
    pub catalog: Option<String>,
    pub repository: String,
}

impl RepoSpec {
    /// Repository in the root catalog.
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            catalog: None,
            repository: repository.into(),
        }
    }

    pub fn in_catalog(catalog: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            catalog: Some(catalog.into()),
            repository: repository.into(),
        }
    }

    /// The store spec string understood by the session service, e.g.
    /// `<mycat:myrepo>` or `<myrepo>` for the root catalog.
    pub fn store_spec(&self) -> String {
        match &self.catalog {
            Some(cat) => format!("<{}:{}>", cat, self.repository),
            None => format!("<{}>", self.repository),
        }
    }
}

impl<S: AsRef<str>> From<S> for RepoSpec {
    /// `"catalog:repo"` or plain `"repo"`.
    fn from(value: S) -> Self {
        match value.as_ref().split_once(':') {
            Some((cat, repo)) => Self::in_catalog(cat, repo),
            None => Self::new(value.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_spec_includes_catalog_when_present() {
        assert_eq!(RepoSpec::new("scratch").store_spec(), "<scratch>");
        assert_eq!(
            RepoSpec::in_catalog("tests", "scratch").store_spec(),
            "<tests:scratch>"
        );
    }

    #[test]
    fn parses_colon_form() {
        let spec: RepoSpec = "tests:scratch".into();
        assert_eq!(spec.catalog.as_deref(), Some("tests"));
        assert_eq!(spec.repository, "scratch");
    }
}
