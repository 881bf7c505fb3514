//! Purpose: Turn ordered byte chunks into a pull-based sequence of entities and records.
//! Exports: `Reader`, `ReaderKind`, `ReaderOptions`, `CsvOptions`, `Granularity`, `Shape`,
//! `Output`, `Parse`, `StreamEnd`, `BlockParser`.
//! Role: Owns chunk-boundary bookkeeping for byte, text, csv and columnar streams; decoding
//! and record construction are delegated to supplied decoders and parsers.
//! Invariants: Every absorbed byte ends up in exactly one unit or stays in the carry-over buffer.
//! Invariants: Nothing happens on `parse`; buffering, hooks and parsers run as items are pulled.
//! Invariants: Entities discovered for a unit are yielded before that unit's records.
//! Invariants: Side-state is created and dropped within a single line.
use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::core::block::ColumnarDecoder;
use crate::core::carry::{self, CarryOver};
use crate::core::error::{Error, ErrorKind};
use crate::core::preprocess::{Passthrough, Preprocessor};
use crate::core::registry::{Discovery, DiscoveryHook, EntitySet, Registry};
use crate::core::tabular::{self, CsvDecoder, TabularDecoder};
use crate::core::unit::{ColumnarBatch, Row, TabularBatch, Unit};

/// One element of a parse sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Output<E, T> {
    Entity(E),
    Record(T),
}

impl<E, T> Output<E, T> {
    pub fn is_entity(&self) -> bool {
        matches!(self, Output::Entity(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, Output::Record(_))
    }

    pub fn into_entity(self) -> Option<E> {
        match self {
            Output::Entity(entity) => Some(entity),
            Output::Record(_) => None,
        }
    }

    pub fn into_record(self) -> Option<T> {
        match self {
            Output::Record(record) => Some(record),
            Output::Entity(_) => None,
        }
    }
}

/// Caller-supplied function turning one unit into zero or more records.
pub type BlockParser<T> = Box<dyn FnMut(&Unit<'_>) -> Result<Vec<T>, Error>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReaderKind {
    Byte,
    Text,
    Csv,
    Columnar,
}

/// Whether a csv reader hands over the whole processable span or one row at a time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Granularity {
    Chunked,
    RowWise,
}

/// Whether csv rows go through the tabular decoder or stay raw name/value mappings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shape {
    Decoded,
    Raw,
}

pub struct CsvOptions {
    pub granularity: Granularity,
    pub shape: Shape,
    decoder: Box<dyn TabularDecoder>,
}

impl CsvOptions {
    pub fn new() -> Self {
        Self {
            granularity: Granularity::Chunked,
            shape: Shape::Decoded,
            decoder: Box::new(CsvDecoder::new()),
        }
    }

    pub fn row_wise(mut self) -> Self {
        self.granularity = Granularity::RowWise;
        self
    }

    pub fn chunked(mut self) -> Self {
        self.granularity = Granularity::Chunked;
        self
    }

    pub fn raw(mut self) -> Self {
        self.shape = Shape::Raw;
        self
    }

    pub fn decoded(mut self) -> Self {
        self.shape = Shape::Decoded;
        self
    }

    pub fn with_decoder(mut self, decoder: impl TabularDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry, discovery hook and preprocessor shared by every reader kind.
pub struct ReaderOptions<T, R: Registry = EntitySet<String>> {
    registry: Option<R>,
    hook: Option<DiscoveryHook<R>>,
    preprocessor: Option<Box<dyn Preprocessor<T>>>,
}

impl<T> ReaderOptions<T> {
    /// Options without a registry.
    pub fn new() -> Self {
        Self {
            registry: None,
            hook: None,
            preprocessor: None,
        }
    }
}

impl<T> Default for ReaderOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, R: Registry> ReaderOptions<T, R> {
    pub fn with_registry(registry: R) -> Self {
        Self {
            registry: Some(registry),
            hook: None,
            preprocessor: None,
        }
    }

    pub fn hook(
        mut self,
        hook: impl FnMut(&mut R, &Unit<'_>) -> Result<(), Error> + 'static,
    ) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn preprocessor(mut self, preprocessor: impl Preprocessor<T> + 'static) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }
}

/// Summary of what `on_stream_end` reset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StreamEnd {
    /// Buffered bytes that never formed a complete unit.
    pub discarded_bytes: usize,
    /// Units processed over the stream's lifetime.
    pub units: u64,
}

struct CsvState {
    granularity: Granularity,
    shape: Shape,
    decoder: Box<dyn TabularDecoder>,
    header: Option<Vec<String>>,
}

struct ColumnarState {
    decoder: Box<dyn ColumnarDecoder>,
    deferred: u64,
}

enum Strategy {
    Byte,
    Text,
    Csv(CsvState),
    Columnar(ColumnarState),
}

enum Pending {
    Line(Bytes),
    Bytes(Bytes),
    Batch(TabularBatch),
    Row(Row),
    Columns(ColumnarBatch),
}

pub struct Reader<T, R: Registry = EntitySet<String>> {
    strategy: Strategy,
    carry: CarryOver,
    parser: BlockParser<T>,
    preprocessor: Box<dyn Preprocessor<T>>,
    discovery: Discovery<R>,
    units: u64,
}

impl<T: 'static, R: Registry> Reader<T, R> {
    /// Hands every chunk to `parser` as-is; no buffering across chunks.
    pub fn byte(
        parser: impl FnMut(&Unit<'_>) -> Result<Vec<T>, Error> + 'static,
        options: ReaderOptions<T, R>,
    ) -> Result<Self, Error> {
        Self::build(Strategy::Byte, Box::new(parser), options)
    }

    /// Reassembles `\n`-terminated lines and hands them to `parser` one at a time.
    pub fn text(
        parser: impl FnMut(&Unit<'_>) -> Result<Vec<T>, Error> + 'static,
        options: ReaderOptions<T, R>,
    ) -> Result<Self, Error> {
        Self::build(Strategy::Text, Box::new(parser), options)
    }

    pub fn csv(
        parser: impl FnMut(&Unit<'_>) -> Result<Vec<T>, Error> + 'static,
        csv: CsvOptions,
        options: ReaderOptions<T, R>,
    ) -> Result<Self, Error> {
        let state = CsvState {
            granularity: csv.granularity,
            shape: csv.shape,
            decoder: csv.decoder,
            header: None,
        };
        Self::build(Strategy::Csv(state), Box::new(parser), options)
    }

    /// Accumulates chunks until `decoder` accepts the whole buffer as one block.
    pub fn columnar(
        parser: impl FnMut(&Unit<'_>) -> Result<Vec<T>, Error> + 'static,
        decoder: impl ColumnarDecoder + 'static,
        options: ReaderOptions<T, R>,
    ) -> Result<Self, Error> {
        let state = ColumnarState {
            decoder: Box::new(decoder),
            deferred: 0,
        };
        Self::build(Strategy::Columnar(state), Box::new(parser), options)
    }

    fn build(
        strategy: Strategy,
        parser: BlockParser<T>,
        options: ReaderOptions<T, R>,
    ) -> Result<Self, Error> {
        if options.hook.is_some() && options.registry.is_none() {
            return Err(Error::new(ErrorKind::InvalidHookUsage)
                .with_message("discovery hook configured without a registry")
                .with_hint("Build the options with `ReaderOptions::with_registry`."));
        }
        if options.preprocessor.is_some() && !matches!(strategy, Strategy::Text) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("line preprocessors only apply to text readers"));
        }
        Ok(Self {
            strategy,
            carry: CarryOver::new(),
            parser,
            preprocessor: options
                .preprocessor
                .unwrap_or_else(|| Box::new(Passthrough)),
            discovery: Discovery::new(options.registry, options.hook),
            units: 0,
        })
    }
}

impl<T, R: Registry> Reader<T, R> {
    pub fn kind(&self) -> ReaderKind {
        match self.strategy {
            Strategy::Byte => ReaderKind::Byte,
            Strategy::Text => ReaderKind::Text,
            Strategy::Csv(_) => ReaderKind::Csv,
            Strategy::Columnar(_) => ReaderKind::Columnar,
        }
    }

    pub fn registry(&self) -> Option<&R> {
        self.discovery.registry()
    }

    pub fn registry_mut(&mut self) -> Option<&mut R> {
        self.discovery.registry_mut()
    }

    pub fn into_registry(self) -> Option<R> {
        self.discovery.into_registry()
    }

    pub fn buffered_len(&self) -> usize {
        self.carry.len()
    }

    /// The csv header, once captured.
    pub fn header(&self) -> Option<&[String]> {
        match &self.strategy {
            Strategy::Csv(state) => state.header.as_deref(),
            _ => None,
        }
    }

    /// Feeds one chunk; work happens as the returned sequence is pulled.
    pub fn parse(&mut self, chunk: impl Into<Bytes>) -> Parse<'_, T, R> {
        Parse::new(self, chunk.into(), false)
    }

    /// Processes whatever is still buffered as a final unit.
    ///
    /// Text and csv readers emit the unterminated last line; a columnar reader makes
    /// one last decode attempt and fails if the buffer is still not a block.
    pub fn flush(&mut self) -> Parse<'_, T, R> {
        Parse::new(self, Bytes::new(), true)
    }

    /// Resets the reader for the next stream, discarding any buffered bytes.
    pub fn on_stream_end(&mut self) -> StreamEnd {
        let discarded_bytes = self.carry.clear();
        match &mut self.strategy {
            Strategy::Csv(state) => state.header = None,
            Strategy::Columnar(state) => state.deferred = 0,
            Strategy::Byte | Strategy::Text => {}
        }
        if discarded_bytes > 0 {
            warn!(
                kind = ?self.kind(),
                discarded_bytes,
                "stream ended with buffered bytes that never formed a complete unit"
            );
        }
        let units = std::mem::take(&mut self.units);
        StreamEnd {
            discarded_bytes,
            units,
        }
    }

    fn absorb(&mut self, chunk: Bytes, flush: bool) -> Result<VecDeque<Pending>, Error> {
        let mut units = VecDeque::new();
        match &mut self.strategy {
            Strategy::Byte => {
                if !chunk.is_empty() {
                    units.push_back(Pending::Bytes(chunk));
                }
            }
            Strategy::Text => {
                self.carry.extend(&chunk);
                let span = if flush {
                    Some(self.carry.take_all())
                } else {
                    self.carry.take_terminated()
                };
                if let Some(span) = span.filter(|span| !span.is_empty()) {
                    units.extend(carry::lines(&span).into_iter().map(Pending::Line));
                }
            }
            Strategy::Csv(state) => {
                self.carry.extend(&chunk);
                absorb_csv(state, &mut self.carry, flush, &mut units)?;
            }
            Strategy::Columnar(state) => {
                self.carry.extend(&chunk);
                if let Some(batch) = absorb_columnar(state, &mut self.carry, flush)? {
                    units.push_back(Pending::Columns(batch));
                }
            }
        }
        Ok(units)
    }

    fn process(&mut self, pending: Pending) -> Result<Vec<Output<R::Entity, T>>, Error> {
        self.units += 1;
        let index = self.units;
        let result = match pending {
            Pending::Line(raw) => self.process_line(&raw),
            Pending::Bytes(bytes) => self.dispatch(&Unit::Bytes(&bytes)),
            Pending::Batch(batch) => self.dispatch(&Unit::Batch(&batch)),
            Pending::Row(row) => self.dispatch(&Unit::Row(&row)),
            Pending::Columns(batch) => self.dispatch(&Unit::Columns(&batch)),
        };
        result.map_err(|err| match err.unit() {
            Some(_) => err,
            None => err.with_unit(index),
        })
    }

    fn process_line(&mut self, raw: &Bytes) -> Result<Vec<Output<R::Entity, T>>, Error> {
        let prepared = self.preprocessor.pre_process(raw)?;
        if prepared.payload.contains(&carry::TERMINATOR) {
            return Err(Error::new(ErrorKind::ContractViolation)
                .with_message("pre-processed payload spans more than one line"));
        }
        if prepared.payload.is_empty() {
            return Ok(Vec::new());
        }
        let outputs = self.dispatch(&Unit::Bytes(&prepared.payload))?;
        outputs
            .into_iter()
            .map(|output| match output {
                Output::Record(record) => self
                    .preprocessor
                    .post_process(record, &prepared.state)
                    .map(Output::Record),
                entity => Ok(entity),
            })
            .collect()
    }

    /// Discovery, then parsing, for one unit.
    fn dispatch(&mut self, unit: &Unit<'_>) -> Result<Vec<Output<R::Entity, T>>, Error> {
        let entities = self.discovery.run(unit)?;
        let records = (self.parser)(unit)?;
        let mut outputs = Vec::with_capacity(entities.len() + records.len());
        outputs.extend(entities.into_iter().map(Output::Entity));
        outputs.extend(records.into_iter().map(Output::Record));
        Ok(outputs)
    }
}

fn absorb_csv(
    state: &mut CsvState,
    carry: &mut CarryOver,
    flush: bool,
    units: &mut VecDeque<Pending>,
) -> Result<(), Error> {
    if state.header.is_none() {
        let line = match carry.take_first_line() {
            Some(line) => line,
            None if flush && !carry.is_empty() => carry.take_all(),
            None => return Ok(()),
        };
        let header = state.decoder.decode_header(&line)?;
        debug!(columns = header.len(), "captured csv header");
        state.header = Some(header);
    }
    let Some(header) = state.header.as_deref() else {
        return Ok(());
    };

    let span = if flush {
        carry.take_all()
    } else {
        match carry.take_terminated() {
            Some(span) => span,
            None => return Ok(()),
        }
    };
    if span.is_empty() {
        return Ok(());
    }

    match (state.granularity, state.shape) {
        (Granularity::Chunked, Shape::Decoded) => {
            units.push_back(Pending::Batch(state.decoder.decode(header, &span)?));
        }
        (Granularity::RowWise, Shape::Decoded) => {
            let batch = state.decoder.decode(header, &span)?;
            units.extend(batch.into_rows().into_iter().map(Pending::Row));
        }
        (Granularity::Chunked, Shape::Raw) => units.push_back(Pending::Bytes(span)),
        (Granularity::RowWise, Shape::Raw) => {
            let delimiter = state.decoder.delimiter();
            units.extend(
                tabular::raw_rows(header, &span, delimiter)?
                    .into_iter()
                    .map(Pending::Row),
            );
        }
    }
    Ok(())
}

fn absorb_columnar(
    state: &mut ColumnarState,
    carry: &mut CarryOver,
    flush: bool,
) -> Result<Option<ColumnarBatch>, Error> {
    if carry.is_empty() {
        return Ok(None);
    }
    match state.decoder.decode(carry.as_slice()) {
        Ok(batch) => {
            carry.clear();
            state.deferred = 0;
            Ok(Some(batch))
        }
        Err(err) if flush => {
            let discarded = carry.clear();
            state.deferred = 0;
            Err(err.with_hint(format!(
                "{discarded} buffered bytes never formed a decodable block"
            )))
        }
        Err(err) => {
            state.deferred += 1;
            debug!(
                buffered = carry.len(),
                attempt = state.deferred,
                error = %err,
                "columnar block not decodable yet; waiting for more bytes"
            );
            Ok(None)
        }
    }
}

/// Pull-based sequence returned by [`Reader::parse`] and [`Reader::flush`].
///
/// Single pass; after an error or exhaustion it only returns `None`.
pub struct Parse<'r, T, R: Registry> {
    reader: &'r mut Reader<T, R>,
    chunk: Option<Bytes>,
    flush: bool,
    units: VecDeque<Pending>,
    ready: VecDeque<Output<R::Entity, T>>,
    done: bool,
}

impl<'r, T, R: Registry> Parse<'r, T, R> {
    fn new(reader: &'r mut Reader<T, R>, chunk: Bytes, flush: bool) -> Self {
        Self {
            reader,
            chunk: Some(chunk),
            flush,
            units: VecDeque::new(),
            ready: VecDeque::new(),
            done: false,
        }
    }
}

impl<T, R: Registry> Iterator for Parse<'_, T, R> {
    type Item = Result<Output<R::Entity, T>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(output) = self.ready.pop_front() {
                return Some(Ok(output));
            }
            if self.done {
                return None;
            }
            let step = if let Some(chunk) = self.chunk.take() {
                self.reader
                    .absorb(chunk, self.flush)
                    .map(|units| self.units = units)
            } else if let Some(pending) = self.units.pop_front() {
                self.reader
                    .process(pending)
                    .map(|outputs| self.ready.extend(outputs))
            } else {
                self.done = true;
                continue;
            };
            if let Err(err) = step {
                self.done = true;
                self.units.clear();
                return Some(Err(err));
            }
        }
    }
}
