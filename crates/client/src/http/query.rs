//! Query parameter assembly.
//!
//! The query text itself is an opaque payload; this module only knows how
//! to put a query, its dataset and its variable bindings on the wire.

use crate::term::{encode_context, Term};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryLanguage {
    Sparql,
    Prolog,
}

impl QueryLanguage {
    pub fn as_param(&self) -> &'static str {
        match self {
            QueryLanguage::Sparql => "SPARQL",
            QueryLanguage::Prolog => "PROLOG",
        }
    }
}

/// Graphs a query runs against. `default_graphs` entries of `None` address
/// the store's default graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dataset {
    pub default_graphs: Vec<Option<String>>,
    pub named_graphs: Vec<String>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.default_graphs.is_empty() && self.named_graphs.is_empty()
    }
}

/// A pre-bound query variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub value: Term,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: Term) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Knobs that are optional on every query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub base_uri: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Assemble the parameter list for a query POST. Bound variables use the
/// `$<name>` convention; dataset graphs become repeated graph params.
pub(crate) fn query_params(
    language: QueryLanguage,
    query: &str,
    include_inferred: bool,
    dataset: Option<&Dataset>,
    bindings: &[Binding],
    options: &QueryOptions,
) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(bindings.len() + 8);
    params.push(("queryLn".to_string(), language.as_param().to_string()));
    params.push(("query".to_string(), query.to_string()));
    if let Some(base_uri) = &options.base_uri {
        params.push(("baseURI".to_string(), base_uri.clone()));
    }
    params.push(("infer".to_string(), include_inferred.to_string()));
    if let Some(limit) = options.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = options.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }

    if let Some(dataset) = dataset {
        for graph in &dataset.default_graphs {
            match graph {
                // The default graph is addressed through the context
                // parameter, named graphs through the dataset ones.
                None => params.push(("context".to_string(), "null".to_string())),
                Some(iri) => params.push(("default-graph-uri".to_string(), iri.clone())),
            }
        }
        for iri in &dataset.named_graphs {
            params.push(("named-graph-uri".to_string(), iri.clone()));
        }
    }

    for binding in bindings {
        params.push((format!("${}", binding.name), binding.value.to_string()));
    }

    params
}

/// Parameter list for statement-level filters: optional subject, predicate
/// and object patterns plus repeated context params.
pub(crate) fn statement_params(
    subject: Option<&Term>,
    predicate: Option<&Term>,
    object: Option<&Term>,
    contexts: &[Option<Term>],
) -> Vec<(String, String)> {
    let mut params = Vec::with_capacity(contexts.len() + 3);
    if let Some(subject) = subject {
        params.push(("subj".to_string(), subject.to_string()));
    }
    if let Some(predicate) = predicate {
        params.push(("pred".to_string(), predicate.to_string()));
    }
    if let Some(object) = object {
        params.push(("obj".to_string(), object.to_string()));
    }
    for context in contexts {
        params.push(("context".to_string(), encode_context(context.as_ref())));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_variables_with_dollar_prefix() {
        let params = query_params(
            QueryLanguage::Sparql,
            "SELECT ?n WHERE { ?s <http://ex.org/name> ?n }",
            false,
            None,
            &[Binding::new("s", Term::iri("http://ex.org/alice"))],
            &QueryOptions::default(),
        );
        assert!(params.contains(&("$s".to_string(), "<http://ex.org/alice>".to_string())));
        assert!(params.contains(&("queryLn".to_string(), "SPARQL".to_string())));
        assert!(params.contains(&("infer".to_string(), "false".to_string())));
    }

    #[test]
    fn dataset_graphs_become_repeated_params() {
        let dataset = Dataset {
            default_graphs: vec![None, Some("http://ex.org/g1".to_string())],
            named_graphs: vec!["http://ex.org/g2".to_string()],
        };
        let params = query_params(
            QueryLanguage::Sparql,
            "ASK { ?s ?p ?o }",
            true,
            Some(&dataset),
            &[],
            &QueryOptions::default(),
        );
        assert!(params.contains(&("context".to_string(), "null".to_string())));
        assert!(params.contains(&(
            "default-graph-uri".to_string(),
            "http://ex.org/g1".to_string()
        )));
        assert!(params.contains(&("named-graph-uri".to_string(), "http://ex.org/g2".to_string())));
    }

    #[test]
    fn absent_statement_patterns_are_wildcards() {
        let params = statement_params(None, None, None, &[]);
        assert!(params.is_empty());

        let params = statement_params(
            Some(&Term::iri("http://ex.org/s")),
            None,
            None,
            &[None, Some(Term::iri("http://ex.org/g"))],
        );
        assert_eq!(
            params,
            vec![
                ("subj".to_string(), "<http://ex.org/s>".to_string()),
                ("context".to_string(), "null".to_string()),
                ("context".to_string(), "<http://ex.org/g>".to_string()),
            ]
        );
    }
}
