//! # Event Predicates
//!
//! Filters applied to change events before they become work items.
//!
//! - [`NamespaceCreatedPredicate`]: admits creation of any namespace except the
//!   master secret namespace
//! - [`MasterSecretPredicate`]: admits creation of the master secret and
//!   payload changes of secrets carrying its name
//!
//! Predicates are pure: they only log and count their decision.

use crate::constants::DOCKER_CONFIG_JSON_KEY;
use crate::controller::events::{ChangeEvent, WatchedObject};
use crate::observability::metrics;
use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, Span};

/// Decision table over the four kinds of change event.
pub trait EventPredicate: Send + Sync {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    fn create(&self, object: &WatchedObject) -> bool;

    fn update(&self, old: &WatchedObject, new: &WatchedObject) -> bool;

    fn delete(&self, object: &WatchedObject) -> bool;

    fn generic(&self, object: &WatchedObject) -> bool;

    /// Dispatch `event` to the matching decision and record the verdict.
    fn admits(&self, event: &ChangeEvent) -> bool {
        let accept = match event {
            ChangeEvent::Create { object } => self.create(object),
            ChangeEvent::Update { old, new } => self.update(old, new),
            ChangeEvent::Delete { object } => self.delete(object),
            ChangeEvent::Generic { object } => self.generic(object),
        };
        metrics::record_predicate_decision(self.name(), accept);
        accept
    }
}

/// Admits `Create` events of namespaces other than the master secret namespace.
#[derive(Debug, Clone)]
pub struct NamespaceCreatedPredicate {
    span: Span,
    master_namespace: String,
}

impl NamespaceCreatedPredicate {
    pub fn new(span: Span, master_namespace: impl Into<String>) -> Self {
        Self {
            span,
            master_namespace: master_namespace.into(),
        }
    }
}

impl EventPredicate for NamespaceCreatedPredicate {
    fn name(&self) -> &'static str {
        "namespace-created"
    }

    fn create(&self, object: &WatchedObject) -> bool {
        let name = object.name();
        let accept = object.is_namespace() && name != self.master_namespace;
        self.span.in_scope(|| {
            debug!(name = %name, kind = object.kind(), accept, "incoming create namespace event");
        });
        accept
    }

    fn update(&self, _old: &WatchedObject, _new: &WatchedObject) -> bool {
        false
    }

    fn delete(&self, _object: &WatchedObject) -> bool {
        false
    }

    fn generic(&self, _object: &WatchedObject) -> bool {
        false
    }
}

/// Admits creation of the master secret and credential payload changes of any
/// secret named like it.
#[derive(Debug, Clone)]
pub struct MasterSecretPredicate {
    span: Span,
    name: String,
    namespace: String,
}

impl MasterSecretPredicate {
    pub fn new(span: Span, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            span,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

fn docker_config(secret: &Secret) -> Option<&[u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(DOCKER_CONFIG_JSON_KEY))
        .map(|bytes| bytes.0.as_slice())
}

impl EventPredicate for MasterSecretPredicate {
    fn name(&self) -> &'static str {
        "master-secret"
    }

    fn create(&self, object: &WatchedObject) -> bool {
        let (name, namespace) = (object.name(), object.namespace());
        let accept = name == self.name && namespace == self.namespace;
        self.span.in_scope(|| {
            debug!(secret_name = %name, secret_namespace = %namespace, accept, "incoming create secret event");
        });
        accept
    }

    fn update(&self, old: &WatchedObject, new: &WatchedObject) -> bool {
        let (Some(old_secret), Some(new_secret)) = (old.as_secret(), new.as_secret()) else {
            self.span.in_scope(|| {
                debug!(kind = new.kind(), name = %new.name(), accept = false, "update event is not about a secret");
            });
            return false;
        };

        let accept =
            new.name() == self.name && docker_config(old_secret) != docker_config(new_secret);
        self.span.in_scope(|| {
            debug!(
                secret_name = %new.name(),
                secret_namespace = %new.namespace(),
                accept,
                "incoming update secret event"
            );
        });
        accept
    }

    fn delete(&self, _object: &WatchedObject) -> bool {
        false
    }

    fn generic(&self, _object: &WatchedObject) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    const MASTER_NAMESPACE: &str = "master-secret-namespace";
    const MASTER_NAME: &str = "master-secret";

    fn namespace(name: &str) -> WatchedObject {
        WatchedObject::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        })
    }

    fn secret(name: &str, namespace: &str, payload: Option<&str>) -> WatchedObject {
        WatchedObject::Secret(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            data: payload.map(|p| {
                BTreeMap::from([(
                    DOCKER_CONFIG_JSON_KEY.to_string(),
                    ByteString(p.as_bytes().to_vec()),
                )])
            }),
            ..Secret::default()
        })
    }

    fn namespace_predicate() -> NamespaceCreatedPredicate {
        NamespaceCreatedPredicate::new(Span::none(), MASTER_NAMESPACE)
    }

    fn master_predicate() -> MasterSecretPredicate {
        MasterSecretPredicate::new(Span::none(), MASTER_NAME, MASTER_NAMESPACE)
    }

    #[test]
    fn test_namespace_created_accepts_new_namespace() {
        assert!(namespace_predicate().create(&namespace("test")));
    }

    #[test]
    fn test_namespace_created_rejects_master_namespace() {
        assert!(!namespace_predicate().create(&namespace(MASTER_NAMESPACE)));
    }

    #[test]
    fn test_namespace_created_rejects_other_kinds() {
        assert!(!namespace_predicate().create(&secret("test", "test", None)));
    }

    #[test]
    fn test_namespace_created_rejects_non_create_events() {
        let p = namespace_predicate();
        let ns = namespace("test");
        assert!(!p.admits(&ChangeEvent::Update {
            old: ns.clone(),
            new: ns.clone()
        }));
        assert!(!p.admits(&ChangeEvent::Delete { object: ns.clone() }));
        assert!(!p.admits(&ChangeEvent::Generic { object: ns }));
    }

    #[test]
    fn test_master_secret_create() {
        let cases = [
            ("master secret in master namespace", MASTER_NAME, MASTER_NAMESPACE, true),
            ("other secret in other namespace", "test", "test-namespace", false),
            ("other secret in master namespace", "test", MASTER_NAMESPACE, false),
            ("master name in other namespace", MASTER_NAME, "test-namespace", false),
        ];

        let p = master_predicate();
        for (case, name, namespace, expected) in cases {
            assert_eq!(p.create(&secret(name, namespace, None)), expected, "{case}");
        }
    }

    #[test]
    fn test_master_secret_update() {
        let cases = [
            ("payload changed", MASTER_NAME, Some("old"), Some("new"), true),
            ("payload unchanged", MASTER_NAME, Some("same"), Some("same"), false),
            ("payload added", MASTER_NAME, None, Some("new"), true),
            ("payload removed", MASTER_NAME, Some("old"), None, true),
            ("other secret changed", "test", Some("old"), Some("new"), false),
        ];

        let p = master_predicate();
        for (case, name, old, new, expected) in cases {
            let accept = p.update(
                &secret(name, "test-namespace", old),
                &secret(name, "test-namespace", new),
            );
            assert_eq!(accept, expected, "{case}");
        }
    }

    #[test]
    fn test_master_secret_update_ignores_metadata_churn() {
        let old = secret(MASTER_NAME, MASTER_NAMESPACE, Some("payload"));
        let mut new = old.clone();
        if let WatchedObject::Secret(s) = &mut new {
            s.metadata.labels = Some(BTreeMap::from([("a".to_string(), "b".to_string())]));
        }
        assert!(!master_predicate().update(&old, &new));
    }

    #[test]
    fn test_master_secret_update_of_namespace_is_rejected() {
        assert!(!master_predicate().update(&namespace(MASTER_NAME), &namespace(MASTER_NAME)));
    }

    #[test]
    fn test_master_secret_rejects_delete_and_generic() {
        let p = master_predicate();
        let s = secret(MASTER_NAME, MASTER_NAMESPACE, Some("payload"));
        assert!(!p.admits(&ChangeEvent::Delete { object: s.clone() }));
        assert!(!p.admits(&ChangeEvent::Generic { object: s }));
    }

    #[test]
    fn test_admits_dispatches_by_event_kind() {
        let p = master_predicate();
        assert!(p.admits(&ChangeEvent::Create {
            object: secret(MASTER_NAME, MASTER_NAMESPACE, Some("payload")),
        }));
        assert!(p.admits(&ChangeEvent::Update {
            old: secret(MASTER_NAME, "a", Some("P0")),
            new: secret(MASTER_NAME, "a", Some("P1")),
        }));
    }
}
