//! StreamId - identifier of one capture stream (one physical device)
//!
//! Backed by `Arc<str>`: ids are fixed at startup and cloned into every edge,
//! incident and metric label afterwards.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

/// Stream identifier, cloned by reference count.
///
/// # Examples
/// ```
/// use contracts::StreamId;
///
/// let id: StreamId = "prophesee".into();
/// let other = id.clone();
/// assert_eq!(id, other);
/// assert_eq!(id.as_str(), "prophesee");
/// ```
#[derive(Clone, Default)]
pub struct StreamId(Arc<str>);

impl StreamId {
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    /// Get the underlying string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for StreamId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for StreamId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StreamId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for StreamId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<Arc<str>> for StreamId {
    #[inline]
    fn from(s: Arc<str>) -> Self {
        Self(s)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({:?})", self.0)
    }
}

impl PartialEq for StreamId {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for StreamId {}

impl PartialEq<str> for StreamId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for StreamId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl PartialEq<String> for StreamId {
    #[inline]
    fn eq(&self, other: &String) -> bool {
        self.0.as_ref() == other
    }
}

impl Hash for StreamId {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl PartialOrd for StreamId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Serialize for StreamId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_clone_shares_storage() {
        let a: StreamId = "orbbec".into();
        let b = a.clone();
        assert_eq!(a.as_str().as_ptr(), b.as_str().as_ptr());
    }

    #[test]
    fn test_compare_with_strings() {
        let id: StreamId = "prophesee".into();
        assert_eq!(id, "prophesee");
        assert_eq!(id, String::from("prophesee"));
        assert_ne!(id, StreamId::from("orbbec"));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id: StreamId = "orbbec".into();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"orbbec\"");
        let back: StreamId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_ordered_map_key() {
        let mut map = BTreeMap::new();
        map.insert(StreamId::from("b"), 2);
        map.insert(StreamId::from("a"), 1);
        assert_eq!(map.keys().next().map(|k| k.as_str()), Some("a"));
    }
}
