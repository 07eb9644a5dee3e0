//! Source-id encoding and default partition assignment.

pub const PARTITION_HASH_SEED: u32 = 0x9747_b28c;
pub const MAX_SOURCE_ID_LEN: usize = 2048;
// Marks the encoded form as a plain client-supplied id.
const SOURCE_ID_MARKER: u8 = 0x00;

/// Producer identity as supplied by the client, plus its stable encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceId {
    raw: String,
    encoded: Vec<u8>,
}

impl SourceId {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if raw.is_empty() {
            return Err("source id is empty".to_string());
        }
        if raw.len() > MAX_SOURCE_ID_LEN {
            return Err(format!(
                "source id is {} bytes long, at most {MAX_SOURCE_ID_LEN} allowed",
                raw.len()
            ));
        }
        if raw.chars().any(|c| c.is_ascii_control()) {
            return Err("source id contains control characters".to_string());
        }
        let mut encoded = Vec::with_capacity(raw.len() + 1);
        encoded.push(SOURCE_ID_MARKER);
        encoded.extend_from_slice(raw.as_bytes());
        Ok(Self {
            raw: raw.to_string(),
            encoded,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    /// Upper-case hex of the encoded form, the key used in the binding table.
    pub fn escaped(&self) -> String {
        self.encoded.iter().map(|byte| format!("{byte:02X}")).collect()
    }
}

pub fn canonical_topic(name: &str) -> &str {
    name.trim_matches('/')
}

/// MurmurHash2 (32-bit) of the topic name followed by the encoded source id.
pub fn partition_hash(topic: &str, source: &SourceId) -> u32 {
    let mut key = Vec::with_capacity(topic.len() + source.encoded().len());
    key.extend_from_slice(topic.as_bytes());
    key.extend_from_slice(source.encoded());
    murmur2(&key, PARTITION_HASH_SEED)
}

fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if let Some(&first) = tail.first() {
        h ^= u32::from(first);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

pub fn default_partition(hash: u32, partition_count: u32) -> u32 {
    hash % partition_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_and_escaping() {
        let source = SourceId::parse("p1").expect("source");
        assert_eq!(source.as_str(), "p1");
        assert_eq!(source.encoded(), b"\x00p1");
        assert_eq!(source.escaped(), "007031");
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(SourceId::parse("").is_err());
        assert!(SourceId::parse("tab\there").is_err());
        assert!(SourceId::parse(&"x".repeat(MAX_SOURCE_ID_LEN + 1)).is_err());
        assert!(SourceId::parse(&"x".repeat(MAX_SOURCE_ID_LEN)).is_ok());
    }

    #[test]
    fn murmur2_matches_reference_vectors() {
        // Kafka's default partitioner uses the same seed.
        assert_eq!(murmur2(b"21", PARTITION_HASH_SEED), 3_321_034_988);
        assert_eq!(murmur2(b"", PARTITION_HASH_SEED), 275_646_681);
    }

    #[test]
    fn hash_is_pinned_for_known_inputs() {
        let s1 = SourceId::parse("s1").expect("source");
        let s4 = SourceId::parse("s4").expect("source");
        assert_eq!(partition_hash("t", &s1), 1_947_377_487);
        assert_eq!(partition_hash("t", &s4), 1_762_343_110);
        assert_eq!(default_partition(partition_hash("t", &s1), 4), 3);
        assert_eq!(default_partition(partition_hash("t", &s4), 4), 2);

        let producer = SourceId::parse("producer-1").expect("source");
        assert_eq!(partition_hash("orders", &producer), 2_340_823_790);
        assert_eq!(default_partition(partition_hash("orders", &producer), 4), 2);
    }

    #[test]
    fn hash_depends_on_topic() {
        let source = SourceId::parse("s1").expect("source");
        assert_ne!(partition_hash("t", &source), partition_hash("u", &source));
    }

    #[test]
    fn canonical_topic_strips_slashes() {
        assert_eq!(canonical_topic("/orders/"), "orders");
        assert_eq!(canonical_topic("dc1/orders"), "dc1/orders");
        assert_eq!(canonical_topic("///"), "");
    }
}
