// Process-wide view of live write sessions.
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: String,
    pub topic: Option<String>,
    pub source_id: Option<String>,
    pub partition: Option<u32>,
    pub preferred_cluster: Option<String>,
    pub started_at: Instant,
}

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: DashMap<u64, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.sessions.insert(
            id,
            SessionInfo {
                peer: peer.into(),
                topic: None,
                source_id: None,
                partition: None,
                preferred_cluster: None,
                started_at: Instant::now(),
            },
        );
        id
    }

    pub fn set_source(&self, id: u64, topic: &str, source_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.topic = Some(topic.to_string());
            entry.source_id = Some(source_id.to_string());
        }
    }

    pub fn set_partition(&self, id: u64, partition: u32) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.partition = Some(partition);
        }
    }

    pub fn set_preferred_cluster(&self, id: u64, cluster: &str) {
        if let Some(mut entry) = self.sessions.get_mut(&id) {
            entry.preferred_cluster = Some(cluster.to_string());
        }
    }

    /// Drops a finished session; returns its last known state.
    pub fn remove(&self, id: u64) -> Option<SessionInfo> {
        self.sessions.remove(&id).map(|(_, info)| info)
    }

    pub fn get(&self, id: u64) -> Option<SessionInfo> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live sessions currently writing to `topic`.
    pub fn sessions_for_topic(&self, topic: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.topic.as_deref() == Some(topic))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_updates_and_removal() {
        let registry = SessionRegistry::new();
        let a = registry.register("10.0.0.1:5000");
        let b = registry.register("10.0.0.2:5000");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.set_source(a, "orders", "p1");
        registry.set_partition(a, 3);
        registry.set_preferred_cluster(a, "dc2");
        let info = registry.get(a).expect("session");
        assert_eq!(info.topic.as_deref(), Some("orders"));
        assert_eq!(info.partition, Some(3));
        assert_eq!(info.preferred_cluster.as_deref(), Some("dc2"));
        assert_eq!(registry.sessions_for_topic("orders"), 1);

        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        registry.set_partition(a, 1);
        assert!(registry.get(a).is_none());
        assert_eq!(registry.len(), 1);
    }
}
