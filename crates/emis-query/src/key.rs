//! Hierarchical cache keys: `[namespace, scope, selector]`.

use std::fmt;

use emis_services::Filters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    List,
    Detail,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::List => "list",
            Scope::Detail => "detail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Selector {
    Filters(Filters),
    Id(String),
}

/// Deterministic identifier of one cached read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    namespace: String,
    scope: Scope,
    selector: Selector,
}

impl CacheKey {
    pub fn list(namespace: &str, filters: &Filters) -> Self {
        Self {
            namespace: namespace.to_string(),
            scope: Scope::List,
            selector: Selector::Filters(filters.clone()),
        }
    }

    pub fn detail(namespace: &str, id: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            scope: Scope::Detail,
            selector: Selector::Id(id.to_string()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// True for every key of `[namespace, scope, *]`.
    pub fn in_family(&self, namespace: &str, scope: Scope) -> bool {
        self.namespace == namespace && self.scope == scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let selector = match &self.selector {
            Selector::Filters(filters) => {
                serde_json::to_string(filters).unwrap_or_else(|_| "{}".to_string())
            }
            Selector::Id(id) => serde_json::Value::String(id.clone()).to_string(),
        };
        write!(
            f,
            "[\"{}\",\"{}\",{}]",
            self.namespace,
            self.scope.as_str(),
            selector
        )
    }
}
