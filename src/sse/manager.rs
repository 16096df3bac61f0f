//! Topic registry and broadcast fan-out for SSE connections.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use super::connection::SseConnection;
use super::event::SseEvent;

/// Default per-IP connection cap.
pub const DEFAULT_MAX_PER_IP: usize = 10;

/// Default per-topic connection cap.
pub const DEFAULT_MAX_PER_TOPIC: usize = 1000;

static GLOBAL: LazyLock<SseManager> =
    LazyLock::new(|| SseManager::new(DEFAULT_MAX_PER_IP, DEFAULT_MAX_PER_TOPIC));

/// Point-in-time registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseStatistics {
    pub total_connections: usize,
    pub topics: usize,
    pub connections_per_topic: HashMap<String, usize>,
    pub unique_ips: usize,
}

/// Tracks which connection listens on which topic and enforces
/// admission limits.
///
/// Locking: the topic map, the per-connection topic index and the IP
/// counters each have their own lock, and at most one is held at a
/// time. Limits stay exact because the IP count is taken optimistically
/// and rolled back when topic admission fails.
pub struct SseManager {
    topics: Mutex<HashMap<String, Vec<Arc<SseConnection>>>>,
    topic_by_conn: Mutex<HashMap<u64, String>>,
    ip_counts: Mutex<HashMap<IpAddr, usize>>,
    max_per_ip: usize,
    max_per_topic: usize,
}

impl SseManager {
    #[must_use]
    pub fn new(max_per_ip: usize, max_per_topic: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            topic_by_conn: Mutex::new(HashMap::new()),
            ip_counts: Mutex::new(HashMap::new()),
            max_per_ip,
            max_per_topic,
        }
    }

    /// The process-wide instance used by the server.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Admit a connection to a topic.
    ///
    /// Returns `false` (never an error) when the client IP or the topic
    /// is at capacity; the caller is expected to close the connection.
    pub fn register_connection(&self, topic: &str, conn: &Arc<SseConnection>) -> bool {
        let ip = conn.client_ip();

        {
            let mut counts = self.ip_counts.lock();
            let count = counts.entry(ip).or_insert(0);
            if *count >= self.max_per_ip {
                tracing::debug!(%ip, limit = self.max_per_ip, "per-ip limit reached");
                return false;
            }
            *count += 1;
        }

        {
            let mut topics = self.topics.lock();
            let listeners = topics.entry(topic.to_owned()).or_default();
            if listeners.len() >= self.max_per_topic {
                drop(topics);
                tracing::debug!(topic, limit = self.max_per_topic, "per-topic limit reached");
                self.decrement_ip(ip);
                return false;
            }
            listeners.push(conn.clone());
        }

        self.topic_by_conn.lock().insert(conn.id(), topic.to_owned());
        tracing::debug!(topic, id = conn.id(), %ip, "sse connection registered");
        true
    }

    /// Remove a connection. Effective exactly once per connection
    /// identity; repeated calls are no-ops.
    pub fn unregister_connection(&self, conn: &SseConnection) {
        let Some(topic) = self.topic_by_conn.lock().remove(&conn.id()) else {
            return;
        };

        {
            let mut topics = self.topics.lock();
            if let Some(listeners) = topics.get_mut(&topic) {
                listeners.retain(|candidate| candidate.id() != conn.id());
                if listeners.is_empty() {
                    topics.remove(&topic);
                }
            }
        }

        self.decrement_ip(conn.client_ip());
        tracing::debug!(topic, id = conn.id(), "sse connection unregistered");
    }

    /// Send an event to every open connection on a topic. The return
    /// value counts attempted deliveries; per-connection queue drops do
    /// not subtract from it.
    pub async fn broadcast(&self, topic: &str, event: &SseEvent) -> usize {
        let listeners = self.connections(topic);
        let mut attempted = 0;
        for conn in listeners {
            if conn.is_open() {
                attempted += 1;
                let _ = conn.send_event(event.clone()).await;
            }
        }
        attempted
    }

    /// Broadcast to several topics; returns the summed attempt count.
    pub async fn broadcast_to_topics(&self, topics: &[&str], event: &SseEvent) -> usize {
        let mut total = 0;
        for topic in topics {
            total += self.broadcast(topic, event).await;
        }
        total
    }

    /// Snapshot of a topic's connections.
    #[must_use]
    pub fn connections(&self, topic: &str) -> Vec<Arc<SseConnection>> {
        self.topics.lock().get(topic).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn statistics(&self) -> SseStatistics {
        let connections_per_topic: HashMap<String, usize> = {
            let topics = self.topics.lock();
            topics
                .iter()
                .map(|(topic, listeners)| (topic.clone(), listeners.len()))
                .collect()
        };
        let unique_ips = self.ip_counts.lock().len();

        SseStatistics {
            total_connections: connections_per_topic.values().sum(),
            topics: connections_per_topic.len(),
            connections_per_topic,
            unique_ips,
        }
    }

    /// Close and unregister every connection.
    pub fn close_all_connections(&self) {
        let all: Vec<Arc<SseConnection>> = {
            let topics = self.topics.lock();
            topics.values().flatten().cloned().collect()
        };
        for conn in all {
            conn.close();
            self.unregister_connection(&conn);
        }
    }

    /// Test hook: drop every registration and counter.
    pub fn reset(&self) {
        self.close_all_connections();
        self.topics.lock().clear();
        self.topic_by_conn.lock().clear();
        self.ip_counts.lock().clear();
    }

    fn decrement_ip(&self, ip: IpAddr) {
        let mut counts = self.ip_counts.lock();
        if let Some(count) = counts.get_mut(&ip) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }
}

impl std::fmt::Debug for SseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.statistics();
        f.debug_struct("SseManager")
            .field("max_per_ip", &self.max_per_ip)
            .field("max_per_topic", &self.max_per_topic)
            .field("total_connections", &stats.total_connections)
            .field("topics", &stats.topics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::sse::connection::SseConfig;
    use std::net::Ipv4Addr;

    fn conn(id: u64, ip: [u8; 4]) -> Arc<SseConnection> {
        let (_client, server) = tokio::io::duplex(1024);
        SseConnection::new(
            id,
            IpAddr::V4(Ipv4Addr::from(ip)),
            None,
            server,
            SseConfig::default(),
            Arc::new(Metrics::new()),
            Arc::new(()),
        )
    }

    #[tokio::test]
    async fn admission_enforces_the_per_ip_limit() {
        let manager = SseManager::new(10, 1000);
        let ip = [192, 168, 1, 100];

        for i in 0..10 {
            let conn = conn(i, ip);
            assert!(
                manager.register_connection(&format!("topic-{i}"), &conn),
                "connection {i} should be admitted"
            );
        }

        let eleventh = conn(10, ip);
        assert!(!manager.register_connection("topic-extra", &eleventh));

        // A different IP is unaffected.
        let other = conn(11, [10, 0, 0, 1]);
        assert!(manager.register_connection("topic-extra", &other));
    }

    #[tokio::test]
    async fn admission_enforces_the_per_topic_limit() {
        let manager = SseManager::new(100, 2);
        for i in 0..2 {
            assert!(manager.register_connection("hot", &conn(i, [10, 0, 0, i as u8])));
        }
        let extra = conn(9, [10, 0, 0, 9]);
        assert!(!manager.register_connection("hot", &extra));

        // The rejected connection did not leak an IP slot.
        assert_eq!(manager.statistics().unique_ips, 2);
    }

    #[tokio::test]
    async fn unregister_releases_both_counters() {
        let manager = SseManager::new(1, 1);
        let first = conn(1, [127, 0, 0, 1]);
        assert!(manager.register_connection("a", &first));
        assert!(!manager.register_connection("a", &conn(2, [127, 0, 0, 1])));

        manager.unregister_connection(&first);
        manager.unregister_connection(&first);

        assert!(manager.register_connection("a", &conn(3, [127, 0, 0, 1])));
        assert_eq!(manager.statistics().total_connections, 1);
    }

    #[tokio::test]
    async fn broadcast_counts_open_connections_only() {
        let manager = SseManager::new(100, 100);
        let open = conn(1, [10, 0, 0, 1]);
        open.open().unwrap();
        let connecting = conn(2, [10, 0, 0, 2]);
        let closed = conn(3, [10, 0, 0, 3]);
        closed.close();

        for c in [&open, &connecting, &closed] {
            assert!(manager.register_connection("news", c));
        }

        let delivered = manager.broadcast("news", &SseEvent::new("hello")).await;
        assert_eq!(delivered, 1);
        assert_eq!(manager.broadcast("nobody-listens", &SseEvent::new("x")).await, 0);

        open.close();
    }

    #[tokio::test]
    async fn broadcast_to_topics_sums_attempts() {
        let manager = SseManager::new(100, 100);
        for (id, topic) in [(1u64, "a"), (2, "a"), (3, "b")] {
            let c = conn(id, [10, 0, 0, id as u8]);
            c.open().unwrap();
            assert!(manager.register_connection(topic, &c));
        }

        let total = manager
            .broadcast_to_topics(&["a", "b", "missing"], &SseEvent::new("fanout"))
            .await;
        assert_eq!(total, 3);
        manager.close_all_connections();
    }

    #[tokio::test]
    async fn statistics_reflect_registrations() {
        let manager = SseManager::new(100, 100);
        assert!(manager.register_connection("a", &conn(1, [10, 0, 0, 1])));
        assert!(manager.register_connection("a", &conn(2, [10, 0, 0, 1])));
        assert!(manager.register_connection("b", &conn(3, [10, 0, 0, 2])));

        let stats = manager.statistics();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.connections_per_topic["a"], 2);
        assert_eq!(stats.unique_ips, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn limits_hold_under_concurrent_registration() {
        let manager = Arc::new(SseManager::new(10, 1000));
        let mut tasks = Vec::new();

        // 40 tasks fight for 10 per-IP slots on the same address.
        for i in 0..40u64 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let c = conn(i, [172, 16, 0, 1]);
                let admitted = manager.register_connection("contended", &c);
                if admitted && i % 2 == 0 {
                    manager.unregister_connection(&c);
                    false
                } else {
                    admitted
                }
            }));
        }

        let mut still_registered = 0;
        for task in tasks {
            if task.await.unwrap() {
                still_registered += 1;
            }
        }

        assert!(still_registered <= 10);
        assert_eq!(manager.statistics().total_connections, still_registered);
    }

    #[tokio::test]
    async fn close_all_closes_and_clears() {
        let manager = SseManager::new(100, 100);
        let a = conn(1, [10, 0, 0, 1]);
        a.open().unwrap();
        assert!(manager.register_connection("a", &a));

        manager.close_all_connections();
        assert!(!a.is_open());
        assert_eq!(manager.statistics().total_connections, 0);

        manager.reset();
        assert_eq!(manager.statistics(), SseStatistics::default());
    }
}
