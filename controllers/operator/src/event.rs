//! Watch events and the keys used to deduplicate them.
//!
//! Only `Added` and `Modified` carry work. `Deleted` and `Bookmark` are
//! dropped by handlers, `Error` ends the subscription that produced it.

use crds::{ApplicationProfile, ContainerProfile, OperatorCommand, SBOMSyft, SBOMSyftFiltered};
use k8s_openapi::api::core::v1::Pod;
use chrono::{DateTime, Utc};
use kube::api::{DynamicObject, ObjectMeta};
use kube::Resource;
use std::borrow::Cow;
use std::fmt;

/// Event observed on a resource stream or synthesised by a polling watch
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    Bookmark { resource_version: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Bookmark => "BOOKMARK",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<K> WatchEvent<K> {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Added(_) => EventType::Added,
            Self::Modified(_) => EventType::Modified,
            Self::Deleted(_) => EventType::Deleted,
            Self::Bookmark { .. } => EventType::Bookmark,
            Self::Error(_) => EventType::Error,
        }
    }

    /// The object carried by the event, if any
    pub fn object(&self) -> Option<&K> {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => Some(obj),
            Self::Bookmark { .. } | Self::Error(_) => None,
        }
    }

    /// Owned object of an `Added` or `Modified` event
    pub fn into_actionable(self) -> Option<K> {
        match self {
            Self::Added(obj) | Self::Modified(obj) => Some(obj),
            _ => None,
        }
    }
}

/// Identity of an object as far as event deduplication is concerned
pub trait KeyedObject {
    fn kind(&self) -> Cow<'_, str>;
    fn uid(&self) -> Option<&str>;
}

macro_rules! keyed_static_kind {
    ($($ty:ty),* $(,)?) => {
        $(
            impl KeyedObject for $ty {
                fn kind(&self) -> Cow<'_, str> {
                    <$ty as Resource>::kind(&())
                }

                fn uid(&self) -> Option<&str> {
                    self.meta().uid.as_deref()
                }
            }
        )*
    };
}

keyed_static_kind!(
    Pod,
    OperatorCommand,
    SBOMSyft,
    SBOMSyftFiltered,
    ApplicationProfile,
    ContainerProfile,
);

impl KeyedObject for DynamicObject {
    fn kind(&self) -> Cow<'_, str> {
        self.types
            .as_ref()
            .map_or(Cow::Borrowed(""), |t| Cow::Borrowed(t.kind.as_str()))
    }

    fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref()
    }
}

/// Cooldown key of an event: `<type>-<kind>-<uid>`
///
/// `None` for events without an object or objects without a UID. Such events
/// are never remembered and always pass the cooldown.
pub fn event_key<K: KeyedObject>(event: &WatchEvent<K>) -> Option<String> {
    let obj = event.object()?;
    let uid = obj.uid().filter(|uid| !uid.is_empty())?;
    Some(format!("{}-{}-{}", event.event_type(), obj.kind(), uid))
}

/// Creation time of an object, read through its RFC 3339 wire form
pub fn created_at(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let ts = serde_json::to_value(meta.creation_timestamp.as_ref()?).ok()?;
    ts.as_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn pod(uid: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("nginx".to_string()),
                uid: uid.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_event_key_includes_type_kind_and_uid() {
        let added = WatchEvent::Added(pod(Some("1234")));
        let modified = WatchEvent::Modified(pod(Some("1234")));

        assert_eq!(event_key(&added).as_deref(), Some("ADDED-Pod-1234"));
        assert_eq!(event_key(&modified).as_deref(), Some("MODIFIED-Pod-1234"));
    }

    #[test]
    fn test_event_key_without_uid() {
        assert_eq!(event_key(&WatchEvent::Added(pod(None))), None);
        assert_eq!(event_key(&WatchEvent::Added(pod(Some("")))), None);
        assert_eq!(
            event_key::<Pod>(&WatchEvent::Bookmark {
                resource_version: "42".to_string()
            }),
            None
        );
    }

    #[test]
    fn test_created_at() {
        let meta: ObjectMeta = serde_json::from_value(serde_json::json!({
            "name": "nginx",
            "creationTimestamp": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        let ts = created_at(&meta).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(created_at(&ObjectMeta::default()).is_none());
    }

    #[test]
    fn test_actionable() {
        assert!(WatchEvent::Added(pod(None)).into_actionable().is_some());
        assert!(WatchEvent::Modified(pod(None)).into_actionable().is_some());
        assert!(WatchEvent::Deleted(pod(None)).into_actionable().is_none());
        assert!(WatchEvent::<Pod>::Error("gone".to_string()).into_actionable().is_none());
    }
}
