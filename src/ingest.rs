//! Purpose: Drive a `Reader` from any `Read` source in fixed-size chunks.
//! Exports: `IngestConfig`, `IngestOutcome`, `ingest`.
//! Role: Stream lifecycle owner used by the CLI; reads, pulls to completion, then resets.
//! Invariants: Every chunk's outputs are pulled to completion before the next read.
//! Invariants: `on_stream_end` runs exactly once per call, including on error.
//! Invariants: Memory is bounded by the chunk size plus one unit of carry-over.
use std::io::{self, Read};

use bytes::Bytes;

use crate::api::{Error, ErrorKind, Output, Reader, Registry};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Copy, Clone, Debug)]
pub struct IngestConfig {
    pub chunk_size: usize,
    /// Process an unterminated final unit instead of discarding it.
    pub flush_on_end: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_on_end: false,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IngestOutcome {
    pub chunks: u64,
    pub bytes: u64,
    pub entities: u64,
    pub records: u64,
    pub discarded_bytes: u64,
}

fn io_error(err: io::Error, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_source(err)
}

pub fn ingest<S, T, R, F>(
    source: S,
    reader: &mut Reader<T, R>,
    config: IngestConfig,
    mut on_output: F,
) -> Result<IngestOutcome, Error>
where
    S: Read,
    R: Registry,
    F: FnMut(Output<R::Entity, T>) -> Result<(), Error>,
{
    if config.chunk_size == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("chunk size must be positive")
            .with_hint("Use --chunk-size with a value of at least 1."));
    }

    let mut outcome = IngestOutcome::default();
    let result = pump(source, reader, config, &mut outcome, &mut on_output);
    let end = reader.on_stream_end();
    outcome.discarded_bytes = end.discarded_bytes as u64;
    result.map(|()| outcome)
}

fn pump<S, T, R, F>(
    mut source: S,
    reader: &mut Reader<T, R>,
    config: IngestConfig,
    outcome: &mut IngestOutcome,
    on_output: &mut F,
) -> Result<(), Error>
where
    S: Read,
    R: Registry,
    F: FnMut(Output<R::Entity, T>) -> Result<(), Error>,
{
    let mut buf = vec![0u8; config.chunk_size];
    loop {
        let read = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(io_error(err, "failed to read input").with_offset(outcome.bytes));
            }
        };
        outcome.chunks += 1;
        outcome.bytes += read as u64;
        for output in reader.parse(Bytes::copy_from_slice(&buf[..read])) {
            accept(output?, outcome, on_output)?;
        }
    }
    if config.flush_on_end {
        for output in reader.flush() {
            accept(output?, outcome, on_output)?;
        }
    }
    Ok(())
}

fn accept<E, T, F>(
    output: Output<E, T>,
    outcome: &mut IngestOutcome,
    on_output: &mut F,
) -> Result<(), Error>
where
    F: FnMut(Output<E, T>) -> Result<(), Error>,
{
    match &output {
        Output::Entity(_) => outcome.entities += 1,
        Output::Record(_) => outcome.records += 1,
    }
    on_output(output)
}
