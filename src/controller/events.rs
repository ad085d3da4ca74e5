//! # Change Events
//!
//! Typed change notifications for the two watched kinds, and the adapter that
//! derives them from raw `kube_runtime::watcher` events.
//!
//! The watcher only reports the latest state of an object. [`EventAdapter`]
//! remembers the last snapshot of every object it has seen so that an
//! update carries both the old and the new version.

use crate::controller::classify::WorkItem;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};

/// An object delivered by one of the watchers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchedObject {
    Namespace(Namespace),
    Secret(Secret),
}

impl WatchedObject {
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            WatchedObject::Namespace(ns) => ns.name_any(),
            WatchedObject::Secret(secret) => secret.name_any(),
        }
    }

    /// Namespace of the object; empty for cluster-scoped objects.
    #[must_use]
    pub fn namespace(&self) -> String {
        match self {
            WatchedObject::Namespace(_) => String::new(),
            WatchedObject::Secret(secret) => secret.namespace().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            WatchedObject::Namespace(_) => "Namespace",
            WatchedObject::Secret(_) => "Secret",
        }
    }

    #[must_use]
    pub fn as_secret(&self) -> Option<&Secret> {
        match self {
            WatchedObject::Secret(secret) => Some(secret),
            WatchedObject::Namespace(_) => None,
        }
    }

    #[must_use]
    pub fn is_namespace(&self) -> bool {
        matches!(self, WatchedObject::Namespace(_))
    }

    fn key(&self) -> ObjectKey {
        (self.kind(), self.namespace(), self.name())
    }
}

impl From<Namespace> for WatchedObject {
    fn from(ns: Namespace) -> Self {
        WatchedObject::Namespace(ns)
    }
}

impl From<Secret> for WatchedObject {
    fn from(secret: Secret) -> Self {
        WatchedObject::Secret(secret)
    }
}

/// A change notification, tagged by kind of change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Create { object: WatchedObject },
    Update { old: WatchedObject, new: WatchedObject },
    Delete { object: WatchedObject },
    /// Externally triggered event without a state change
    Generic { object: WatchedObject },
}

impl ChangeEvent {
    /// The most recent version of the object the event refers to.
    #[must_use]
    pub fn object(&self) -> &WatchedObject {
        match self {
            ChangeEvent::Create { object }
            | ChangeEvent::Delete { object }
            | ChangeEvent::Generic { object } => object,
            ChangeEvent::Update { new, .. } => new,
        }
    }

    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            ChangeEvent::Create { .. } => "create",
            ChangeEvent::Update { .. } => "update",
            ChangeEvent::Delete { .. } => "delete",
            ChangeEvent::Generic { .. } => "generic",
        }
    }

    /// Work item identifying the object: `(namespace, name)`, with an empty
    /// namespace for namespaces themselves.
    #[must_use]
    pub fn work_item(&self) -> WorkItem {
        let object = self.object();
        WorkItem::new(object.namespace(), object.name())
    }
}

type ObjectKey = (&'static str, String, String);

/// Turns watcher events into [`ChangeEvent`]s.
///
/// - first sighting of an object (including during the initial list): `Create`
/// - later sightings: `Update` with the previous snapshot as `old`
/// - deletion, or absence from a relist: `Delete`
#[derive(Debug, Default)]
pub struct EventAdapter {
    known: HashMap<ObjectKey, WatchedObject>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl EventAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest<K>(&mut self, event: watcher::Event<K>) -> Vec<ChangeEvent>
    where
        K: Into<WatchedObject>,
    {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                let object = object.into();
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(object.key());
                }
                self.observe(object).into_iter().collect()
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self
                    .known
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|key| self.known.remove(&key))
                    .map(|object| ChangeEvent::Delete { object })
                    .collect()
            }
            watcher::Event::Apply(object) => self.observe(object.into()).into_iter().collect(),
            watcher::Event::Delete(object) => {
                let object = object.into();
                self.known.remove(&object.key());
                vec![ChangeEvent::Delete { object }]
            }
        }
    }

    fn observe(&mut self, object: WatchedObject) -> Option<ChangeEvent> {
        match self.known.insert(object.key(), object.clone()) {
            None => Some(ChangeEvent::Create { object }),
            // Relists and resyncs redeliver unchanged objects
            Some(old) if old == object => None,
            Some(old) => Some(ChangeEvent::Update { old, new: object }),
        }
    }

    /// Number of objects currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        }
    }

    fn secret(namespace: &str, name: &str, payload: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                ByteString(payload.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        }
    }

    #[test]
    fn test_first_sighting_is_create() {
        let mut adapter = EventAdapter::new();
        let events = adapter.ingest(watcher::Event::Apply(namespace("a")));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChangeEvent::Create { object } if object.name() == "a"));
        assert_eq!(events[0].work_item(), WorkItem::new("", "a"));
    }

    #[test]
    fn test_later_sighting_is_update_with_old_snapshot() {
        let mut adapter = EventAdapter::new();
        adapter.ingest(watcher::Event::Apply(secret("master", "creds", "P0")));
        let events = adapter.ingest(watcher::Event::Apply(secret("master", "creds", "P1")));

        assert_eq!(events.len(), 1);
        match &events[0] {
            ChangeEvent::Update { old, new } => {
                assert_eq!(old, &WatchedObject::Secret(secret("master", "creds", "P0")));
                assert_eq!(new, &WatchedObject::Secret(secret("master", "creds", "P1")));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_identical_redelivery_is_dropped() {
        let mut adapter = EventAdapter::new();
        adapter.ingest(watcher::Event::Apply(namespace("a")));
        assert!(adapter.ingest(watcher::Event::Apply(namespace("a"))).is_empty());
    }

    #[test]
    fn test_delete_forgets_object() {
        let mut adapter = EventAdapter::new();
        adapter.ingest(watcher::Event::Apply(namespace("a")));
        let events = adapter.ingest(watcher::Event::Delete(namespace("a")));
        assert!(matches!(&events[0], ChangeEvent::Delete { .. }));
        assert!(adapter.is_empty());

        // Recreated namespace is a fresh create
        let events = adapter.ingest(watcher::Event::Apply(namespace("a")));
        assert!(matches!(&events[0], ChangeEvent::Create { .. }));
    }

    #[test]
    fn test_initial_list_yields_creates() {
        let mut adapter = EventAdapter::new();
        let mut events = adapter.ingest::<Namespace>(watcher::Event::Init);
        events.extend(adapter.ingest(watcher::Event::InitApply(namespace("a"))));
        events.extend(adapter.ingest(watcher::Event::InitApply(namespace("b"))));
        events.extend(adapter.ingest::<Namespace>(watcher::Event::InitDone));

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ChangeEvent::Create { .. })));
        assert_eq!(adapter.len(), 2);
    }

    #[test]
    fn test_relist_reports_vanished_objects_as_deleted() {
        let mut adapter = EventAdapter::new();
        adapter.ingest(watcher::Event::Apply(namespace("a")));
        adapter.ingest(watcher::Event::Apply(namespace("b")));

        adapter.ingest::<Namespace>(watcher::Event::Init);
        let relisted = adapter.ingest(watcher::Event::InitApply(namespace("a")));
        assert!(relisted.is_empty());
        let events = adapter.ingest::<Namespace>(watcher::Event::InitDone);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ChangeEvent::Delete { object } if object.name() == "b"));
    }

    #[test]
    fn test_work_item_of_secret_event() {
        let event = ChangeEvent::Create {
            object: secret("a", "creds", "P0").into(),
        };
        assert_eq!(event.work_item(), WorkItem::new("a", "creds"));
        assert_eq!(event.verb(), "create");
    }
}
