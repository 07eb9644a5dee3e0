// Framed wire protocol spoken between producers and the write gateway.
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAGIC: u32 = 0x534C4331;
pub const VERSION: u16 = 1;
// Block layout version advertised in the init acknowledgment.
pub const BLOCK_FORMAT_VERSION: u32 = 0;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("frame too large")]
    FrameTooLarge,
    #[error("incomplete frame")]
    Incomplete,
    #[error("failed to serialize message")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize message")]
    Deserialize(serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub length: u32,
}

impl FrameHeader {
    pub const LEN: usize = 12;

    pub fn new(flags: u16, length: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            length,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.magic.to_be_bytes());
        buf.extend_from_slice(&self.version.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.length.to_be_bytes());
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        // The length field is only trusted once magic and version check out.
        if buf.remaining() < Self::LEN {
            return Err(Error::Incomplete);
        }
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = buf.get_u16();
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = buf.get_u16();
        let length = buf.get_u32();
        Ok(Self {
            magic,
            version,
            flags,
            length,
        })
    }
}

/// Frame containing a header and payload.
///
/// ```
/// use bytes::Bytes;
/// use sluice_wire::Frame;
///
/// let frame = Frame::new(0, Bytes::from_static(b"hello")).expect("frame");
/// let decoded = Frame::decode(frame.encode()).expect("decode");
/// assert_eq!(decoded.payload, Bytes::from_static(b"hello"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: u16, payload: Bytes) -> Result<Self> {
        if payload.len() > u32::MAX as usize {
            return Err(Error::FrameTooLarge);
        }
        Ok(Self {
            header: FrameHeader::new(flags, payload.len() as u32),
            payload,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FrameHeader::LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(input: Bytes) -> Result<Self> {
        if input.len() < FrameHeader::LEN {
            return Err(Error::Incomplete);
        }
        let header = FrameHeader::decode(input.slice(0..FrameHeader::LEN))?;
        let length = header.length as usize;
        if input.len() < FrameHeader::LEN + length {
            return Err(Error::Incomplete);
        }
        let payload = input.slice(FrameHeader::LEN..FrameHeader::LEN + length);
        Ok(Self { header, payload })
    }
}

/// Block codecs a topic can be configured with.
///
/// The numeric id is what producers place in the single-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Codec {
    Raw,
    Gzip,
    Lzop,
    Zstd,
}

impl Codec {
    pub const ALL: [Codec; 4] = [Codec::Raw, Codec::Gzip, Codec::Lzop, Codec::Zstd];

    pub fn id(self) -> u8 {
        match self {
            Codec::Raw => 0,
            Codec::Gzip => 1,
            Codec::Lzop => 2,
            Codec::Zstd => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|codec| codec.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::Raw => "raw",
            Codec::Gzip => "gzip",
            Codec::Lzop => "lzop",
            Codec::Zstd => "zstd",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Codec {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.as_str().eq_ignore_ascii_case(value))
            .ok_or(())
    }
}

/// Terminal status carried by a `Close` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Ok,
    BadRequest,
    Unauthenticated,
    AccessDenied,
    UnknownTopic,
    Overload,
    InternalError,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::BadRequest => "bad_request",
            StatusCode::Unauthenticated => "unauthenticated",
            StatusCode::AccessDenied => "access_denied",
            StatusCode::UnknownTopic => "unknown_topic",
            StatusCode::Overload => "overload",
            StatusCode::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One client write request: per-record metadata plus one block per record.
///
/// The two repeated-field groups are kept as parallel arrays, exactly as
/// producers submit them; the gateway validates their shapes before use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub sequence_numbers: Vec<i64>,
    #[serde(default)]
    pub created_at_ms: Vec<i64>,
    #[serde(default)]
    pub sent_at_ms: Vec<i64>,
    #[serde(default)]
    pub message_sizes: Vec<u64>,
    #[serde(default)]
    pub blocks_offsets: Vec<u64>,
    #[serde(default)]
    pub blocks_part_numbers: Vec<u32>,
    #[serde(default)]
    pub blocks_message_counts: Vec<u32>,
    #[serde(default)]
    pub blocks_uncompressed_sizes: Vec<u64>,
    #[serde(default, with = "base64_vec")]
    pub blocks_headers: Vec<Vec<u8>>,
    #[serde(default, with = "base64_vec")]
    pub blocks_data: Vec<Vec<u8>>,
}

impl WriteRequest {
    /// Build a well-formed request with one single-record block per payload.
    pub fn single_records(first_seq: i64, codec: Codec, payloads: &[&[u8]], now_ms: i64) -> Self {
        let mut request = Self::default();
        for (idx, payload) in payloads.iter().enumerate() {
            request.sequence_numbers.push(first_seq + idx as i64);
            request.created_at_ms.push(now_ms);
            request.sent_at_ms.push(now_ms);
            request.message_sizes.push(payload.len() as u64);
            request.blocks_offsets.push(0);
            request.blocks_part_numbers.push(0);
            request.blocks_message_counts.push(1);
            request.blocks_uncompressed_sizes.push(payload.len() as u64);
            request.blocks_headers.push(vec![codec.id()]);
            request.blocks_data.push(payload.to_vec());
        }
        request
    }
}

/// Per-record outcome reported back to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAck {
    pub sequence_number: i64,
    pub offset: u64,
    pub already_written: bool,
}

/// Latency breakdown for one acknowledged client request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStatistics {
    pub persist_duration_ms: u64,
    pub queued_in_partition_duration_ms: u64,
    pub throttled_on_partition_duration_ms: u64,
    pub throttled_on_topic_duration_ms: u64,
}

/// Messages sent by producers.
///
/// ```
/// use sluice_wire::ClientMessage;
///
/// let message = ClientMessage::UpdateToken {
///     token: "abc".to_string(),
/// };
/// let frame = message.encode().expect("encode");
/// assert_eq!(ClientMessage::decode(frame).expect("decode"), message);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // Opens the session; must be the first message on the stream.
    Init {
        topic: String,
        source_id: String,
        // 1-based partition hint; 0 means no preference.
        #[serde(default)]
        partition_group_id: u32,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        session_meta: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preferred_cluster: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    Write(WriteRequest),
    UpdateToken {
        token: String,
    },
    // Explicit end-of-writes for transports that cannot half-close.
    WritesDone,
}

/// Messages sent by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InitAck {
        session_id: String,
        last_sequence_number: i64,
        partition_id: u32,
        topic: String,
        cluster: String,
        block_format_version: u32,
        supported_codecs: Vec<Codec>,
    },
    // One per client write request, in submission order.
    BatchAck {
        partition_id: u32,
        records: Vec<RecordAck>,
        stats: WriteStatistics,
    },
    UpdateTokenAck,
    // Last message of every session.
    Close {
        code: StatusCode,
        message: String,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<Frame> {
        encode_json(self)
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        serde_json::from_slice(&frame.payload).map_err(Error::Deserialize)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Init { .. } => "init",
            ClientMessage::Write(_) => "write",
            ClientMessage::UpdateToken { .. } => "update_token",
            ClientMessage::WritesDone => "writes_done",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Frame> {
        encode_json(self)
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        serde_json::from_slice(&frame.payload).map_err(Error::Deserialize)
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<Frame> {
    let payload = serde_json::to_vec(value).map_err(Error::Serialize)?;
    Frame::new(0, Bytes::from(payload))
}

mod base64_vec {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S>(values: &[Vec<u8>], serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded: Vec<String> = values
            .iter()
            .map(|value| base64::engine::general_purpose::STANDARD.encode(value))
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<Vec<u8>>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|value| {
                base64::engine::general_purpose::STANDARD
                    .decode(value.as_bytes())
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}
