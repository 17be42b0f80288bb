use bytes::BufMut;
use bytes::BytesMut;
use thiserror::Error;

/// Schema identifier for the cluster replication message set.
pub const SCHEMA_ID: u16 = 20;
/// Wire schema version encoded into every frame header.
pub const SCHEMA_VERSION: u16 = 0;
/// Encoded length of the fixed frame header.
pub const HEADER_LENGTH: usize = 8;

/// Fixed header preceding every replication frame. All integers are
/// little-endian.
///
/// Layout: `schemaId: u16, templateId: u16, blockLength: u16, version: u16`.
/// The template id is authoritative for the message kind; no message
/// identifies itself by size alone.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub schema_id: u16,
    pub template_id: u16,
    pub block_length: u16,
    pub version: u16,
}

impl FrameHeader {
    pub fn for_template(template_id: u16, block_length: u16) -> Self {
        FrameHeader {
            schema_id: SCHEMA_ID,
            template_id,
            block_length,
            version: SCHEMA_VERSION,
        }
    }

    pub fn encode_into(&self, out: &mut BytesMut) {
        out.put_u16_le(self.schema_id);
        out.put_u16_le(self.template_id);
        out.put_u16_le(self.block_length);
        out.put_u16_le(self.version);
    }

    pub fn decode(buf: &[u8]) -> Result<FrameHeader, FramingError> {
        if buf.len() < HEADER_LENGTH {
            return Err(FramingError::Truncated {
                needed: HEADER_LENGTH,
                available: buf.len(),
            });
        }
        let header = FrameHeader {
            schema_id: u16::from_le_bytes([buf[0], buf[1]]),
            template_id: u16::from_le_bytes([buf[2], buf[3]]),
            block_length: u16::from_le_bytes([buf[4], buf[5]]),
            version: u16::from_le_bytes([buf[6], buf[7]]),
        };
        if header.schema_id != SCHEMA_ID {
            return Err(FramingError::WrongSchema {
                schema_id: header.schema_id,
            });
        }
        Ok(header)
    }
}

/// Malformed or truncated inbound frame. Never fatal: the frame is dropped,
/// logged, and polling continues.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("frame truncated: needed {needed} bytes, only {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("declared body length {declared} overruns buffer of {available} bytes")]
    BodyOverrun { declared: usize, available: usize },

    #[error("unrecognized schema id {schema_id}")]
    WrongSchema { schema_id: u16 },

    #[error("template {template_id} declares block length {block_length}, below its fixed fields")]
    BlockTooShort { template_id: u16, block_length: u16 },

    #[error("illegal wire value {value} for {field}")]
    BadEnumValue { field: &'static str, value: u8 },
}
