// Two-phase per-line preprocessing: clean the payload before parsing, re-attach state after.
use bstr::ByteSlice;
use bytes::Bytes;
use serde_json::{Map, Value};
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::core::error::{Error, ErrorKind};

/// Metadata extracted from one line, handed back when that line's records are post-processed.
pub type SideState = Map<String, Value>;

/// Result of the pre-process phase for a single line.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preprocessed {
    pub payload: Bytes,
    pub state: SideState,
}

impl Preprocessed {
    pub fn new(payload: impl Into<Bytes>, state: SideState) -> Self {
        Self {
            payload: payload.into(),
            state,
        }
    }

    pub fn passthrough(raw: &Bytes) -> Self {
        Self {
            payload: raw.clone(),
            state: SideState::new(),
        }
    }
}

/// Hook run around the line parser of a text reader.
///
/// `pre_process` turns a raw line into the payload the parser sees plus side-state;
/// `post_process` receives every record parsed from that payload together with the
/// same side-state. The payload must stay a single line.
pub trait Preprocessor<T> {
    fn pre_process(&mut self, raw: &Bytes) -> Result<Preprocessed, Error> {
        Ok(Preprocessed::passthrough(raw))
    }

    fn post_process(&mut self, record: T, _state: &SideState) -> Result<T, Error> {
        Ok(record)
    }
}

/// Identity preprocessor: the raw line is the payload and side-state is empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl<T> Preprocessor<T> for Passthrough {}

pub const TS_INIT_KEY: &str = "ts_init";
pub const DEFAULT_LOG_SEPARATOR: &str = " - ";
const NAIVE_FRACTIONAL: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
const NAIVE_WHOLE: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

type Attach<T> = Box<dyn FnMut(T, i64) -> Result<T, Error>>;

/// Splits `"<timestamp><separator><payload>"` lines written by a logging shim.
///
/// The timestamp becomes `ts_init` (unix nanoseconds) in side-state and is applied
/// to each parsed record through the attach function.
pub struct LogLinePreprocessor<T> {
    separator: Vec<u8>,
    attach: Attach<T>,
}

impl<T> LogLinePreprocessor<T> {
    pub fn new(attach: impl FnMut(T, i64) -> Result<T, Error> + 'static) -> Self {
        Self {
            separator: DEFAULT_LOG_SEPARATOR.as_bytes().to_vec(),
            attach: Box::new(attach),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<Vec<u8>>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl<T> Preprocessor<T> for LogLinePreprocessor<T> {
    fn pre_process(&mut self, raw: &Bytes) -> Result<Preprocessed, Error> {
        if raw.trim().is_empty() {
            return Ok(Preprocessed::new(Bytes::new(), SideState::new()));
        }
        let Some(pos) = raw.find(&self.separator) else {
            return Err(Error::new(ErrorKind::ContractViolation)
                .with_message("log line has no timestamp separator")
                .with_hint(format!(
                    "Expected `<timestamp>{}<payload>`.",
                    self.separator.to_str_lossy()
                )));
        };
        let timestamp = raw[..pos].trim().to_str().map_err(|err| {
            Error::new(ErrorKind::ContractViolation)
                .with_message("log timestamp is not utf-8")
                .with_source(err)
        })?;
        let ts_init = parse_log_timestamp(timestamp)?;
        let payload = raw.slice_ref(raw[pos + self.separator.len()..].trim());

        let mut state = SideState::new();
        state.insert(TS_INIT_KEY.to_string(), Value::from(ts_init));
        Ok(Preprocessed::new(payload, state))
    }

    fn post_process(&mut self, record: T, state: &SideState) -> Result<T, Error> {
        let ts_init = state
            .get(TS_INIT_KEY)
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                Error::new(ErrorKind::ContractViolation).with_message("side-state is missing ts_init")
            })?;
        (self.attach)(record, ts_init)
    }
}

/// Parses an RFC 3339 timestamp, or a naive `YYYY-MM-DDTHH:MM:SS[.fff]` one taken as UTC,
/// into unix nanoseconds.
pub fn parse_log_timestamp(input: &str) -> Result<i64, Error> {
    let datetime = match OffsetDateTime::parse(input, &Rfc3339) {
        Ok(datetime) => datetime,
        Err(_) => PrimitiveDateTime::parse(input, NAIVE_FRACTIONAL)
            .or_else(|_| PrimitiveDateTime::parse(input, NAIVE_WHOLE))
            .map_err(|err| {
                Error::new(ErrorKind::ContractViolation)
                    .with_message(format!("invalid log timestamp `{input}`"))
                    .with_source(err)
            })?
            .assume_utc(),
    };
    i64::try_from(datetime.unix_timestamp_nanos()).map_err(|_| {
        Error::new(ErrorKind::ContractViolation)
            .with_message(format!("log timestamp `{input}` is out of range"))
    })
}
