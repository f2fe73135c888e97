use std::collections::HashMap;
use std::sync::Arc;

use crate::config::QoS;

/// A subscription's dispatch target (§3). `Simple` callbacks only see the
/// payload; `Extended` callbacks also see the topic the message actually
/// arrived on (useful when the filter contains wildcards). The spec's
/// "client handle" parameter on `Extended` is left to the closure's own
/// captures — idiomatic Rust passes an `Arc<Client>` that way rather than
/// threading it through every callback signature.
///
/// Held behind `Arc` rather than `Box` so the event loop can clone the
/// callback out of the registry and hand it to the background work pool
/// without holding the registry's lock for the callback's duration (§5).
#[derive(Clone)]
pub enum Dispatch {
    Simple(Arc<dyn Fn(&[u8]) + Send + Sync>),
    Extended(Arc<dyn Fn(&str, &[u8]) + Send + Sync>),
}

pub struct SubscriptionEntry {
    pub filter: String,
    pub qos: QoS,
    pub dispatch: Dispatch,
}

/// Keyed by topic filter; one entry per filter, insertion order irrelevant
/// (§3). Guarded externally by the lifecycle controller's mutex since both
/// event-loop code and user-facing `subscribe`/`unsubscribe` touch it (§5).
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace (or insert) the entry for `filter`.
    pub fn put(&mut self, filter: &str, qos: QoS, dispatch: Dispatch) {
        self.entries.insert(
            filter.to_string(),
            SubscriptionEntry {
                filter: filter.to_string(),
                qos,
                dispatch,
            },
        );
    }

    pub fn remove(&mut self, filter: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(filter)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All `(filter, qos)` pairs, for resubscription after reconnect (§4.3).
    pub fn filters_and_qos(&self) -> Vec<(String, QoS)> {
        self.entries
            .values()
            .map(|e| (e.filter.clone(), e.qos))
            .collect()
    }

    /// Entries whose filter matches `topic` under the positional matcher
    /// (§4.4). Preserves the one-way prefix-match quirk documented in §9:
    /// deliberately not "fixed" to strict MQTT semantics.
    pub fn matching(&self, topic: &str) -> impl Iterator<Item = &SubscriptionEntry> {
        let topic = topic.to_string();
        self.entries
            .values()
            .filter(move |entry| topic_matches(&topic, &entry.filter))
    }
}

/// The positional topic matcher described in §4.4. Deliberately *not*
/// strict MQTT 3.1.1 filter matching (see §9's preserved open question):
/// - A filter segment matches unconditionally if it contains `+` or `#`
///   *anywhere* in the segment string, regardless of position.
/// - If the filter has fewer segments than the topic, the match still
///   succeeds — only the filter's own segments are examined (prefix match).
/// - If the topic is shorter than the filter at any position, the match
///   fails.
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    let topic_segments: Vec<&str> = topic.split('/').collect();
    let filter_segments: Vec<&str> = filter.split('/').collect();

    if filter_segments.len() > topic_segments.len() {
        return false;
    }

    filter_segments
        .iter()
        .zip(topic_segments.iter())
        .all(|(filter_seg, topic_seg)| {
            filter_seg.contains('#') || filter_seg.contains('+') || filter_seg == topic_seg
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/c"));
    }

    #[test]
    fn plus_wildcard_matches_single_level_and_more_due_to_prefix_rule() {
        assert!(topic_matches("sensors/room1/temp", "sensors/+/temp"));
        // Prefix behavior (§9): filter shorter than topic still matches.
        assert!(topic_matches("sensors/room1/temp/x", "sensors/+/temp"));
        assert!(!topic_matches("sensors/room1", "sensors/+/temp"));
    }

    #[test]
    fn hash_wildcard_matches_anything_as_long_as_topic_is_at_least_as_long() {
        assert!(topic_matches("any/topic/at/all", "#"));
        assert!(topic_matches("any", "#"));
    }

    #[test]
    fn filter_longer_than_topic_never_matches() {
        assert!(!topic_matches("a", "a/b"));
    }

    #[test]
    fn wildcard_anywhere_in_segment_counts() {
        // Matches the observed (non-strict) behavior: '+' need not be the
        // entire segment.
        assert!(topic_matches("a/bc/d", "a/b+/d"));
    }

    #[test]
    fn registry_put_replaces_existing_entry_for_same_filter() {
        let mut registry = SubscriptionRegistry::new();
        registry.put(
            "a/b",
            QoS::AtMostOnce,
            Dispatch::Simple(Arc::new(|_| {})),
        );
        registry.put(
            "a/b",
            QoS::AtLeastOnce,
            Dispatch::Simple(Arc::new(|_| {})),
        );
        let all = registry.filters_and_qos();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1, QoS::AtLeastOnce);
    }

    #[test]
    fn subscribe_then_unsubscribe_leaves_no_entry() {
        let mut registry = SubscriptionRegistry::new();
        registry.put(
            "a/b",
            QoS::AtMostOnce,
            Dispatch::Simple(Arc::new(|_| {})),
        );
        registry.remove("a/b");
        assert!(registry.is_empty());
    }
}
