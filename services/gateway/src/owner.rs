//! Channel to the process that hands out round-robin partitions for a topic.
//!
//! A session opens the channel only when it has neither a stored binding nor a
//! client hint. Replies and channel lifecycle arrive as [`OwnerEvent`]s on the
//! sender passed to [`OwnerConnector::connect`]. Dropping the returned handle
//! releases the channel.
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerEvent {
    Connected,
    NextPartition(u32),
    // The owner lost an optimistic-concurrency race; resolution should restart.
    Aborted,
    ConnectFailed(String),
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct OwnerTarget {
    pub topic: String,
    pub balancer: String,
    pub partition_count: u32,
}

pub trait OwnerChannel: Send {
    fn request_next_partition(&mut self);
}

pub trait OwnerConnector: Send + Sync {
    fn connect(
        &self,
        target: OwnerTarget,
        events: mpsc::UnboundedSender<OwnerEvent>,
    ) -> Box<dyn OwnerChannel>;
}

/// In-process owner keeping one round-robin cursor per topic.
#[derive(Default)]
pub struct RoundRobinOwner {
    cursors: Arc<DashMap<String, u32>>,
    open_channels: Arc<AtomicUsize>,
}

impl RoundRobinOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels handed out and not yet dropped.
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }
}

impl OwnerConnector for RoundRobinOwner {
    fn connect(
        &self,
        target: OwnerTarget,
        events: mpsc::UnboundedSender<OwnerEvent>,
    ) -> Box<dyn OwnerChannel> {
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(OwnerEvent::Connected);
        Box::new(RoundRobinChannel {
            target,
            cursors: Arc::clone(&self.cursors),
            open_channels: Arc::clone(&self.open_channels),
            events,
        })
    }
}

struct RoundRobinChannel {
    target: OwnerTarget,
    cursors: Arc<DashMap<String, u32>>,
    open_channels: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<OwnerEvent>,
}

impl OwnerChannel for RoundRobinChannel {
    fn request_next_partition(&mut self) {
        if self.target.partition_count == 0 {
            let _ = self.events.send(OwnerEvent::ConnectFailed(format!(
                "balancer {} has no partitions",
                self.target.balancer
            )));
            return;
        }
        let partition = {
            let mut cursor = self.cursors.entry(self.target.topic.clone()).or_insert(0);
            let partition = *cursor % self.target.partition_count;
            *cursor = cursor.wrapping_add(1);
            partition
        };
        let _ = self.events.send(OwnerEvent::NextPartition(partition));
    }
}

impl Drop for RoundRobinChannel {
    fn drop(&mut self) {
        self.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}
