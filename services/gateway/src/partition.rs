//! Partition writer contract and an in-process partition log.
//!
//! A writer is bound to one partition for one source. Every batch it receives is
//! answered twice, in submission order: an `Accepted` permit once the batch is
//! queued, then an `Ack` carrying one [`WriteResult`] per record once it is
//! persisted. Dropping the writer handle releases it.
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use sluice_wire::{Codec, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct WriterTarget {
    pub topic: String,
    pub partition: u32,
    pub owner: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterInit {
    pub owner_cookie: String,
    pub last_sequence_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub sequence_number: i64,
    pub created_at_ms: i64,
    pub sent_at_ms: i64,
    pub size: u64,
    pub block_offset: u64,
    pub part_number: u32,
    pub uncompressed_size: u64,
    pub codec: Codec,
    pub payload: Bytes,
}

#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub cookie: u64,
    pub records: Vec<Record>,
    pub meta: Arc<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub sequence_number: i64,
    pub offset: u64,
    pub already_written: bool,
    pub persist_ms: u64,
    pub queued_in_partition_ms: u64,
    pub throttled_on_partition_ms: u64,
    pub throttled_on_topic_ms: u64,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WriterError {
    // Status to surface to the producer; `None` maps to an internal error.
    pub code: Option<StatusCode>,
    pub message: String,
}

impl WriterError {
    pub fn new(code: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WriterEvent {
    Init(Result<WriterInit, WriterError>),
    Accepted { cookie: u64 },
    Ack { cookie: u64, results: Vec<WriteResult> },
    Failed(WriterError),
    Disconnected,
}

pub trait PartitionWriter: Send {
    fn write(&mut self, batch: WriteBatch);
}

pub trait PartitionWriterFactory: Send + Sync {
    fn bind(
        &self,
        target: WriterTarget,
        events: mpsc::UnboundedSender<WriterEvent>,
    ) -> Box<dyn PartitionWriter>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub offset: u64,
    pub source_id: String,
    pub sequence_number: i64,
    pub codec: Codec,
    pub payload: Bytes,
    pub meta: Arc<BTreeMap<String, String>>,
}

#[derive(Default)]
struct PartitionLog {
    records: Vec<StoredRecord>,
    // Highest sequence number persisted per source.
    last_sequence: HashMap<String, i64>,
}

impl PartitionLog {
    fn append(&mut self, source_id: &str, batch: &WriteBatch) -> Vec<WriteResult> {
        batch
            .records
            .iter()
            .map(|record| {
                let last = self.last_sequence.get(source_id).copied().unwrap_or(0);
                if record.sequence_number <= last {
                    // Duplicates are acknowledged without being stored again.
                    return WriteResult {
                        sequence_number: record.sequence_number,
                        offset: self.records.len() as u64,
                        already_written: true,
                        ..WriteResult::default()
                    };
                }
                let offset = self.records.len() as u64;
                self.records.push(StoredRecord {
                    offset,
                    source_id: source_id.to_string(),
                    sequence_number: record.sequence_number,
                    codec: record.codec,
                    payload: record.payload.clone(),
                    meta: Arc::clone(&batch.meta),
                });
                self.last_sequence
                    .insert(source_id.to_string(), record.sequence_number);
                WriteResult {
                    sequence_number: record.sequence_number,
                    offset,
                    already_written: false,
                    ..WriteResult::default()
                }
            })
            .collect()
    }
}

type PartitionKey = (String, u32);

/// Partition logs kept in process memory, shared by every session.
#[derive(Default)]
pub struct InMemoryPartitions {
    logs: DashMap<PartitionKey, Arc<Mutex<PartitionLog>>>,
    sessions: AtomicU64,
    bound_writers: Arc<AtomicUsize>,
    init_error: Mutex<Option<WriterError>>,
}

impl InMemoryPartitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writers handed out and not yet dropped.
    pub fn bound_writers(&self) -> usize {
        self.bound_writers.load(Ordering::SeqCst)
    }

    /// Make the next binds fail with `error`; `None` restores normal binds.
    pub fn set_init_error(&self, error: Option<WriterError>) {
        *self.init_error.lock() = error;
    }

    pub fn records(&self, topic: &str, partition: u32) -> Vec<StoredRecord> {
        self.logs
            .get(&(topic.to_string(), partition))
            .map(|log| log.lock().records.clone())
            .unwrap_or_default()
    }

    fn log(&self, topic: &str, partition: u32) -> Arc<Mutex<PartitionLog>> {
        Arc::clone(
            self.logs
                .entry((topic.to_string(), partition))
                .or_default()
                .value(),
        )
    }
}

impl PartitionWriterFactory for InMemoryPartitions {
    fn bind(
        &self,
        target: WriterTarget,
        events: mpsc::UnboundedSender<WriterEvent>,
    ) -> Box<dyn PartitionWriter> {
        let log = self.log(&target.topic, target.partition);
        let init = match self.init_error.lock().clone() {
            Some(error) => Err(error),
            None => {
                let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
                let last_sequence_number = log
                    .lock()
                    .last_sequence
                    .get(&target.source_id)
                    .copied()
                    .unwrap_or(0);
                Ok(WriterInit {
                    owner_cookie: format!("{}|{}-{}", target.source_id, target.partition, session),
                    last_sequence_number,
                })
            }
        };
        let _ = events.send(WriterEvent::Init(init));
        self.bound_writers.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryWriter {
            log,
            source_id: target.source_id,
            events,
            bound_writers: Arc::clone(&self.bound_writers),
        })
    }
}

struct InMemoryWriter {
    log: Arc<Mutex<PartitionLog>>,
    source_id: String,
    events: mpsc::UnboundedSender<WriterEvent>,
    bound_writers: Arc<AtomicUsize>,
}

impl PartitionWriter for InMemoryWriter {
    fn write(&mut self, batch: WriteBatch) {
        let _ = self.events.send(WriterEvent::Accepted {
            cookie: batch.cookie,
        });
        let results = self.log.lock().append(&self.source_id, &batch);
        let _ = self.events.send(WriterEvent::Ack {
            cookie: batch.cookie,
            results,
        });
    }
}

impl Drop for InMemoryWriter {
    fn drop(&mut self) {
        self.bound_writers.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(source: &str) -> WriterTarget {
        WriterTarget {
            topic: "orders".to_string(),
            partition: 1,
            owner: "orders/partition-1".to_string(),
            source_id: source.to_string(),
        }
    }

    fn record(seq: i64, payload: &'static [u8]) -> Record {
        Record {
            sequence_number: seq,
            created_at_ms: 0,
            sent_at_ms: 0,
            size: payload.len() as u64,
            block_offset: 0,
            part_number: 0,
            uncompressed_size: payload.len() as u64,
            codec: Codec::Raw,
            payload: Bytes::from_static(payload),
        }
    }

    fn batch(cookie: u64, records: Vec<Record>) -> WriteBatch {
        WriteBatch {
            cookie,
            records,
            meta: Arc::new(BTreeMap::new()),
        }
    }

    #[test]
    fn accepts_then_acks_with_offsets() {
        let partitions = InMemoryPartitions::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = partitions.bind(target("p1"), tx);
        match rx.try_recv() {
            Ok(WriterEvent::Init(Ok(init))) => assert_eq!(init.last_sequence_number, 0),
            other => panic!("unexpected {other:?}"),
        }

        writer.write(batch(1, vec![record(1, b"a"), record(2, b"b")]));
        assert!(matches!(
            rx.try_recv(),
            Ok(WriterEvent::Accepted { cookie: 1 })
        ));
        match rx.try_recv() {
            Ok(WriterEvent::Ack { cookie, results }) => {
                assert_eq!(cookie, 1);
                let offsets: Vec<u64> = results.iter().map(|r| r.offset).collect();
                assert_eq!(offsets, vec![0, 1]);
                assert!(results.iter().all(|r| !r.already_written));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(partitions.records("orders", 1).len(), 2);
    }

    #[test]
    fn duplicate_sequence_numbers_are_already_written() {
        let partitions = InMemoryPartitions::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut writer = partitions.bind(target("p1"), tx.clone());
        writer.write(batch(1, vec![record(5, b"a")]));
        drop(writer);

        let mut again = partitions.bind(target("p1"), tx);
        again.write(batch(1, vec![record(5, b"a"), record(6, b"b")]));
        let mut acks = Vec::new();
        let mut inits = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                WriterEvent::Ack { results, .. } => acks.push(results),
                WriterEvent::Init(init) => inits.push(init.expect("init")),
                _ => {}
            }
        }
        assert_eq!(inits[1].last_sequence_number, 5);
        assert_ne!(inits[0].owner_cookie, inits[1].owner_cookie);
        assert!(acks[1][0].already_written);
        assert!(!acks[1][1].already_written);
        assert_eq!(partitions.records("orders", 1).len(), 2);
    }

    #[test]
    fn bound_writers_track_handles_and_init_errors() {
        let partitions = InMemoryPartitions::new();
        partitions.set_init_error(Some(WriterError::new(
            Some(StatusCode::Overload),
            "partition is read-only",
        )));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let writer = partitions.bind(target("p1"), tx);
        assert_eq!(partitions.bound_writers(), 1);
        match rx.try_recv() {
            Ok(WriterEvent::Init(Err(err))) => assert_eq!(err.code, Some(StatusCode::Overload)),
            other => panic!("unexpected {other:?}"),
        }
        drop(writer);
        assert_eq!(partitions.bound_writers(), 0);
    }
}
