// Columnar block layout, whole-block decode, and the decoder seam used by columnar readers.
use crate::core::error::{Error, ErrorKind};
use crate::core::unit::{Column, ColumnarBatch};

pub const BLOCK_MAGIC: [u8; 4] = *b"COL1";
pub const BLOCK_VERSION: u32 = 1;
pub const BLOCK_HEADER_LEN: usize = 32;
pub const MAX_PAYLOAD_ABS: usize = 256 * 1024 * 1024;

/// Decodes one complete self-describing block.
///
/// Any failure on an incomplete buffer is expected: the columnar reader keeps the
/// bytes and retries once more arrive.
pub trait ColumnarDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Result<ColumnarBatch, Error>;
}

impl<F> ColumnarDecoder for F
where
    F: FnMut(&[u8]) -> Result<ColumnarBatch, Error>,
{
    fn decode(&mut self, bytes: &[u8]) -> Result<ColumnarBatch, Error> {
        self(bytes)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub version: u32,
    pub header_len: u32,
    pub column_count: u32,
    pub row_count: u32,
    pub payload_len: u32,
    pub payload_len_xor: u32,
    pub flags: u32,
}

impl BlockHeader {
    pub fn new(column_count: u32, row_count: u32, payload_len: u32) -> Self {
        Self {
            version: BLOCK_VERSION,
            header_len: BLOCK_HEADER_LEN as u32,
            column_count,
            row_count,
            payload_len,
            payload_len_xor: payload_len ^ 0xFFFF_FFFF,
            flags: 0,
        }
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut buf = [0u8; BLOCK_HEADER_LEN];
        buf[0..4].copy_from_slice(&BLOCK_MAGIC);
        write_u32(&mut buf, 4, self.version);
        write_u32(&mut buf, 8, self.header_len);
        write_u32(&mut buf, 12, self.column_count);
        write_u32(&mut buf, 16, self.row_count);
        write_u32(&mut buf, 20, self.payload_len);
        write_u32(&mut buf, 24, self.payload_len_xor);
        write_u32(&mut buf, 28, self.flags);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < BLOCK_HEADER_LEN {
            return Err(decode_error("block header incomplete").with_offset(buf.len() as u64));
        }
        if buf[0..4] != BLOCK_MAGIC {
            return Err(decode_error("bad block magic").with_offset(0));
        }
        Ok(Self {
            version: read_u32(buf, 4),
            header_len: read_u32(buf, 8),
            column_count: read_u32(buf, 12),
            row_count: read_u32(buf, 16),
            payload_len: read_u32(buf, 20),
            payload_len_xor: read_u32(buf, 24),
            flags: read_u32(buf, 28),
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.version != BLOCK_VERSION {
            return Err(decode_error(format!("unsupported block version {}", self.version)));
        }
        if self.header_len as usize != BLOCK_HEADER_LEN {
            return Err(decode_error("unexpected header length"));
        }
        if self.payload_len ^ self.payload_len_xor != 0xFFFF_FFFF {
            return Err(decode_error("payload length xor mismatch"));
        }
        if self.payload_len as usize > MAX_PAYLOAD_ABS {
            return Err(decode_error("payload length exceeds max"));
        }
        Ok(())
    }

    pub fn block_len(&self) -> usize {
        self.header_len as usize + self.payload_len as usize
    }
}

/// The built-in block format: a `BlockHeader` followed by a JSON column payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockCodec;

impl ColumnarDecoder for BlockCodec {
    fn decode(&mut self, bytes: &[u8]) -> Result<ColumnarBatch, Error> {
        decode_block(bytes)
    }
}

pub fn decode_block(buf: &[u8]) -> Result<ColumnarBatch, Error> {
    let header = BlockHeader::decode(buf)?;
    header.validate()?;
    let block_len = header.block_len();
    if buf.len() < block_len {
        return Err(decode_error(format!(
            "block incomplete: have {} of {} bytes",
            buf.len(),
            block_len
        ))
        .with_offset(buf.len() as u64));
    }
    if buf.len() > block_len {
        return Err(decode_error("trailing bytes after block").with_offset(block_len as u64));
    }

    let columns: Vec<Column> = serde_json::from_slice(&buf[BLOCK_HEADER_LEN..block_len])
        .map_err(|err| {
            decode_error("invalid column payload")
                .with_offset(BLOCK_HEADER_LEN as u64)
                .with_source(err)
        })?;
    if columns.len() != header.column_count as usize {
        return Err(decode_error(format!(
            "header declares {} columns, payload has {}",
            header.column_count,
            columns.len()
        )));
    }
    if let Some(column) = columns
        .iter()
        .find(|column| column.values.len() != header.row_count as usize)
    {
        return Err(decode_error(format!(
            "column `{}` has {} values, header declares {} rows",
            column.name,
            column.values.len(),
            header.row_count
        )));
    }
    ColumnarBatch::new(columns).map_err(|(name, _, _)| {
        decode_error(format!("column `{name}` length disagrees with the batch"))
    })
}

pub fn encode_block(batch: &ColumnarBatch) -> Result<Vec<u8>, Error> {
    let payload = serde_json::to_vec(batch.columns()).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode column payload")
            .with_source(err)
    })?;
    if payload.len() > MAX_PAYLOAD_ABS {
        return Err(Error::new(ErrorKind::Usage).with_message("column payload exceeds max"));
    }
    let header = BlockHeader::new(
        u32::try_from(batch.columns().len())
            .map_err(|_| Error::new(ErrorKind::Usage).with_message("too many columns"))?,
        u32::try_from(batch.num_rows())
            .map_err(|_| Error::new(ErrorKind::Usage).with_message("too many rows"))?,
        payload.len() as u32,
    );
    let mut out = Vec::with_capacity(BLOCK_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&payload);
    Ok(out)
}

fn decode_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Decode).with_message(message)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(out)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
