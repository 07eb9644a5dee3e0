// Shape and codec checks applied to a write request before anything is queued.
use super::flow::PendingWrite;
use crate::directory::TopicDescription;
use crate::partition::Record;
use bytes::Bytes;
use sluice_wire::{Codec, WriteRequest};

fn same_len(lengths: &[usize]) -> bool {
    lengths.windows(2).all(|pair| pair[0] == pair[1])
}

/// Turns `request` into queued records, or explains why it is malformed.
///
/// Nothing from a rejected request is admitted.
pub fn validate_write(
    request: &WriteRequest,
    topic: &TopicDescription,
) -> Result<PendingWrite, String> {
    let messages = request.sequence_numbers.len();
    if !same_len(&[
        messages,
        request.created_at_ms.len(),
        request.sent_at_ms.len(),
        request.message_sizes.len(),
    ]) {
        return Err("messages group fields have different lengths".to_string());
    }
    let blocks = request.blocks_offsets.len();
    if !same_len(&[
        blocks,
        request.blocks_part_numbers.len(),
        request.blocks_message_counts.len(),
        request.blocks_uncompressed_sizes.len(),
        request.blocks_headers.len(),
        request.blocks_data.len(),
    ]) {
        return Err("blocks group fields have different lengths".to_string());
    }
    if messages == 0 {
        return Err("write request contains no messages".to_string());
    }
    if messages != blocks {
        return Err(format!(
            "{messages} messages in {blocks} blocks, only one message per block is supported"
        ));
    }

    let mut records = Vec::with_capacity(messages);
    let mut byte_size = 0u64;
    let mut previous = 0i64;
    for idx in 0..messages {
        let sequence_number = request.sequence_numbers[idx];
        if sequence_number <= 0 {
            return Err(format!(
                "sequence number {sequence_number} at position {idx} is not positive"
            ));
        }
        if sequence_number <= previous {
            return Err(format!(
                "sequence numbers are not increasing: {sequence_number} follows {previous}"
            ));
        }
        previous = sequence_number;

        let header = &request.blocks_headers[idx];
        if header.len() != 1 {
            return Err(format!(
                "block header at position {idx} is {} bytes, expected 1",
                header.len()
            ));
        }
        let codec = Codec::from_id(header[0])
            .ok_or_else(|| format!("unknown codec id {} at position {idx}", header[0]))?;
        if !topic.accepts_codec(codec) {
            return Err(format!(
                "codec {codec} is not supported by topic '{}'",
                topic.name
            ));
        }
        if request.blocks_message_counts[idx] != 1 {
            return Err(format!(
                "block at position {idx} holds {} messages, expected 1",
                request.blocks_message_counts[idx]
            ));
        }

        let payload = Bytes::copy_from_slice(&request.blocks_data[idx]);
        byte_size += payload.len() as u64;
        records.push(Record {
            sequence_number,
            created_at_ms: request.created_at_ms[idx],
            sent_at_ms: request.sent_at_ms[idx],
            size: request.message_sizes[idx],
            block_offset: request.blocks_offsets[idx],
            part_number: request.blocks_part_numbers[idx],
            uncompressed_size: request.blocks_uncompressed_sizes[idx],
            codec,
            payload,
        });
    }
    Ok(PendingWrite { records, byte_size })
}
