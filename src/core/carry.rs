// Carry-over buffer: bytes retained across chunks until a complete unit is available.
use bstr::ByteSlice;
use bytes::{Bytes, BytesMut};

pub const TERMINATOR: u8 = b'\n';

#[derive(Debug, Default)]
pub struct CarryOver {
    buf: BytesMut,
}

impl CarryOver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Splits off everything before the last terminator, dropping that terminator.
    ///
    /// Returns `None` and keeps every byte buffered when no terminator is present.
    pub fn take_terminated(&mut self) -> Option<Bytes> {
        let pos = self.buf.rfind_byte(TERMINATOR)?;
        let mut head = self.buf.split_to(pos + 1);
        head.truncate(pos);
        Some(head.freeze())
    }

    /// Splits off the first line, dropping its terminator.
    pub fn take_first_line(&mut self) -> Option<Bytes> {
        let pos = self.buf.find_byte(TERMINATOR)?;
        let mut head = self.buf.split_to(pos + 1);
        head.truncate(pos);
        Some(head.freeze())
    }

    /// Takes every buffered byte, terminated or not.
    pub fn take_all(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Drops buffered bytes, returning how many were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.buf.len();
        self.buf.clear();
        discarded
    }
}

/// Splits a terminated span into its lines as zero-copy views.
pub fn lines(span: &Bytes) -> Vec<Bytes> {
    span.split_str(&[TERMINATOR])
        .map(|line| span.slice_ref(line))
        .collect()
}
