//! Batching and backpressure between client reads and partition writes.
//!
//! Client writes wait in `pending` until a reservation slot is free; they are then
//! coalesced into one batch that sits in `formed` until the writer's acceptance
//! permit moves it to `sent`, where it waits for the durability ack. Both hops are
//! strictly FIFO and matched by cookie.
use crate::partition::{Record, WriteResult};
use sluice_wire::{RecordAck, WriteStatistics};
use std::collections::VecDeque;
use thiserror::Error;

/// One validated client write request.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub records: Vec<Record>,
    pub byte_size: u64,
}

#[derive(Debug)]
struct InflightBatch {
    cookie: u64,
    requests: Vec<PendingWrite>,
    byte_size: u64,
}

impl InflightBatch {
    fn record_count(&self) -> usize {
        self.requests.iter().map(|request| request.records.len()).sum()
    }
}

/// Batch handed to the partition writer.
#[derive(Debug)]
pub struct FormedBatch {
    pub cookie: u64,
    pub records: Vec<Record>,
}

/// Acknowledgment for one client write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAck {
    pub records: Vec<RecordAck>,
    pub stats: WriteStatistics,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("accepted cookie {got} while {expected:?} was expected")]
    AcceptedOutOfOrder { got: u64, expected: Option<u64> },
    #[error("write ack for cookie {got} with no batch awaiting acknowledgment")]
    UnexpectedAck { got: u64 },
    #[error("write ack cookie {got} does not match expected {expected}")]
    AckOutOfOrder { got: u64, expected: u64 },
    #[error("write ack carries {got} results for {expected} records")]
    ResultCountMismatch { got: usize, expected: usize },
    #[error("write ack result {index} has sequence number {got}, expected {expected}")]
    SequenceMismatch { index: usize, got: i64, expected: i64 },
}

#[derive(Debug)]
pub struct FlowControl {
    max_bytes_inflight: u64,
    max_reserve_requests: usize,
    pending: VecDeque<PendingWrite>,
    formed: VecDeque<InflightBatch>,
    sent: VecDeque<InflightBatch>,
    bytes_inflight: u64,
    bytes_inflight_total: u64,
    reserve_requests: usize,
    next_cookie: u64,
}

impl FlowControl {
    pub fn new(max_bytes_inflight: u64, max_reserve_requests: usize) -> Self {
        Self {
            max_bytes_inflight,
            max_reserve_requests,
            pending: VecDeque::new(),
            formed: VecDeque::new(),
            sent: VecDeque::new(),
            bytes_inflight: 0,
            bytes_inflight_total: 0,
            reserve_requests: 0,
            next_cookie: 1,
        }
    }

    pub fn enqueue(&mut self, write: PendingWrite) {
        self.bytes_inflight += write.byte_size;
        self.bytes_inflight_total += write.byte_size;
        self.pending.push_back(write);
    }

    /// True while more client reads may be issued.
    pub fn below_byte_ceiling(&self) -> bool {
        self.bytes_inflight < self.max_bytes_inflight
    }

    /// Coalesces every pending write into one batch if a reservation slot is free.
    pub fn form_batch(&mut self) -> Option<FormedBatch> {
        if self.pending.is_empty() || self.reserve_requests >= self.max_reserve_requests {
            return None;
        }
        let requests: Vec<PendingWrite> = self.pending.drain(..).collect();
        let byte_size = requests.iter().map(|request| request.byte_size).sum();
        let records = requests
            .iter()
            .flat_map(|request| request.records.iter().cloned())
            .collect();
        let cookie = self.next_cookie;
        self.next_cookie += 1;
        self.reserve_requests += 1;
        self.formed.push_back(InflightBatch {
            cookie,
            requests,
            byte_size,
        });
        Some(FormedBatch { cookie, records })
    }

    /// Handles the acceptance permit; returns the bytes released from `bytes_inflight`.
    pub fn on_accepted(&mut self, cookie: u64) -> Result<u64, FlowError> {
        let expected = self.formed.front().map(|batch| batch.cookie);
        if expected != Some(cookie) {
            return Err(FlowError::AcceptedOutOfOrder {
                got: cookie,
                expected,
            });
        }
        let Some(batch) = self.formed.pop_front() else {
            return Err(FlowError::AcceptedOutOfOrder {
                got: cookie,
                expected,
            });
        };
        let released = batch.byte_size;
        self.bytes_inflight -= released;
        self.reserve_requests -= 1;
        self.sent.push_back(batch);
        Ok(released)
    }

    /// Handles the durability ack, splitting results back into per-request acks.
    ///
    /// Returns the acks in submission order and the bytes released from
    /// `bytes_inflight_total`.
    pub fn on_ack(
        &mut self,
        cookie: u64,
        results: &[WriteResult],
    ) -> Result<(Vec<RequestAck>, u64), FlowError> {
        let batch = match self.sent.front() {
            None => return Err(FlowError::UnexpectedAck { got: cookie }),
            Some(batch) if batch.cookie != cookie => {
                return Err(FlowError::AckOutOfOrder {
                    got: cookie,
                    expected: batch.cookie,
                });
            }
            Some(batch) => batch,
        };
        if results.len() != batch.record_count() {
            return Err(FlowError::ResultCountMismatch {
                got: results.len(),
                expected: batch.record_count(),
            });
        }

        let mut acks = Vec::with_capacity(batch.requests.len());
        let mut results = results.iter().enumerate();
        for request in &batch.requests {
            let mut records = Vec::with_capacity(request.records.len());
            let mut stats = WriteStatistics::default();
            for (record, (index, result)) in request.records.iter().zip(results.by_ref()) {
                if result.sequence_number != record.sequence_number {
                    return Err(FlowError::SequenceMismatch {
                        index,
                        got: result.sequence_number,
                        expected: record.sequence_number,
                    });
                }
                records.push(RecordAck {
                    sequence_number: result.sequence_number,
                    offset: result.offset,
                    already_written: result.already_written,
                });
                stats.persist_duration_ms = stats.persist_duration_ms.max(result.persist_ms);
                stats.queued_in_partition_duration_ms = stats
                    .queued_in_partition_duration_ms
                    .max(result.queued_in_partition_ms);
                stats.throttled_on_partition_duration_ms = stats
                    .throttled_on_partition_duration_ms
                    .max(result.throttled_on_partition_ms);
                stats.throttled_on_topic_duration_ms = stats
                    .throttled_on_topic_duration_ms
                    .max(result.throttled_on_topic_ms);
            }
            acks.push(RequestAck { records, stats });
        }

        let released = batch.byte_size;
        self.sent.pop_front();
        self.bytes_inflight_total -= released;
        Ok((acks, released))
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.formed.is_empty() && self.sent.is_empty()
    }

    pub fn bytes_inflight(&self) -> u64 {
        self.bytes_inflight
    }

    pub fn bytes_inflight_total(&self) -> u64 {
        self.bytes_inflight_total
    }

    pub fn reserve_requests(&self) -> usize {
        self.reserve_requests
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn formed_len(&self) -> usize {
        self.formed.len()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }
}
