//! # Request Classifier
//!
//! Maps a work item onto the replication scenario it requests, by comparing
//! its namespace and name with the master secret identity.

use std::fmt;

/// A pending reconcile, identified by `(namespace, name)`.
///
/// Namespace creation is delivered with an empty namespace and the namespace
/// name in `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkItem {
    pub namespace: String,
    pub name: String,
}

impl WorkItem {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Identity of the master secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterSecretRef {
    pub namespace: String,
    pub name: String,
}

impl MasterSecretRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// The master secret changed: mark every copy outdated
    MasterUpdated,
    /// A copy in `namespace` was touched: pull the master payload into it
    NamespaceUpdated { namespace: String },
    /// Namespace `namespace` appeared: create its copy
    NamespaceCreated { namespace: String },
    Unhandled,
}

impl Scenario {
    /// Label used in logs and metrics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Scenario::MasterUpdated => "master-updated",
            Scenario::NamespaceUpdated { .. } => "namespace-updated",
            Scenario::NamespaceCreated { .. } => "namespace-created",
            Scenario::Unhandled => "unhandled",
        }
    }
}

/// Classify `item`. Conditions are checked in order; the first match wins.
#[must_use]
pub fn classify(item: &WorkItem, master: &MasterSecretRef) -> Scenario {
    if item.namespace == master.namespace && item.name == master.name {
        return Scenario::MasterUpdated;
    }
    if !item.namespace.is_empty() && item.name == master.name {
        return Scenario::NamespaceUpdated {
            namespace: item.namespace.clone(),
        };
    }
    if item.namespace.is_empty() {
        return Scenario::NamespaceCreated {
            namespace: item.name.clone(),
        };
    }
    Scenario::Unhandled
}
