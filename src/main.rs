//! Purpose: `chunkwise` CLI entry point; streams a file through one reader kind.
//! Role: Binary crate root; parses args, wires parsers/hooks, emits JSON lines on stdout.
//! Invariants: Each output is one JSON object per line: `{"entity": ..}` or `{"record": ..}`.
//! Invariants: The run summary and non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use chunkwise::api::{
    BlockCodec, Column, ColumnarBatch, CsvDecoder, CsvOptions, EntitySet, Error, ErrorKind,
    LogLinePreprocessor, Output, Reader, ReaderOptions, Registry, TabularBatch, Unit,
    encode_block, to_exit_code,
};
use chunkwise::ingest::{DEFAULT_CHUNK_SIZE, IngestConfig, IngestOutcome, ingest};

#[derive(Parser)]
#[command(
    name = "chunkwise",
    version,
    about = "Stream files through chunked readers and print the records they produce",
    long_about = None,
    after_help = r#"EXAMPLES
  $ chunkwise text feed.log --log-prefix --discover market_id
  $ chunkwise csv quotes.csv --row-wise --chunk-size 4096
  $ chunkwise encode-columnar quotes.csv quotes.col && chunkwise columnar quotes.col

Use `-` as the path to read stdin. Set RUST_LOG=debug to see deferred decodes."#,
    arg_required_else_help = true
)]
struct Cli {
    /// Bytes read from the source per chunk.
    #[arg(long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Process an unterminated final line (or undecoded block) instead of dropping it.
    #[arg(long, global = true)]
    flush: bool,
    /// Register distinct values of FIELD as entities before records that carry them.
    #[arg(long, global = true, value_name = "FIELD")]
    discover: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse each chunk as a standalone JSON document (arrays yield one record per element).
    Bytes { path: PathBuf },
    /// Parse each line as JSON, falling back to a string record.
    Text {
        path: PathBuf,
        /// Lines look like `<timestamp> - <payload>`; attach the timestamp as `ts_init`.
        #[arg(long)]
        log_prefix: bool,
    },
    /// Read delimited text with a header line.
    Csv {
        path: PathBuf,
        /// Hand rows to the parser one at a time instead of whole spans.
        #[arg(long)]
        row_wise: bool,
        /// Keep raw string fields instead of decoding and inferring types.
        #[arg(long)]
        raw: bool,
        #[arg(long, default_value_t = ',')]
        delimiter: char,
    },
    /// Decode a columnar block file (as written by `encode-columnar`).
    Columnar { path: PathBuf },
    /// Convert a csv file into a single columnar block.
    EncodeColumnar { input: PathBuf, output: PathBuf },
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<(), Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp
            | clap::error::ErrorKind::DisplayVersion
            | clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(());
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Try `chunkwise --help`."));
            }
        },
    };

    let config = IngestConfig {
        chunk_size: cli.chunk_size,
        flush_on_end: cli.flush,
    };
    let options = || -> ReaderOptions<Value, EntitySet<String>> {
        let options = ReaderOptions::with_registry(EntitySet::new());
        match cli.discover.clone() {
            Some(field) => options.hook(move |registry: &mut EntitySet<String>, unit: &Unit<'_>| {
                for value in field_values(unit, &field) {
                    registry.insert(value);
                }
                Ok(())
            }),
            None => options,
        }
    };

    match &cli.command {
        Command::Bytes { path } => {
            let mut reader = Reader::byte(document_records, options())?;
            stream(path, &mut reader, config)
        }
        Command::Text { path, log_prefix } => {
            let mut text = options();
            if *log_prefix {
                text = text.preprocessor(LogLinePreprocessor::new(attach_ts_init));
            }
            let mut reader = Reader::text(line_records, text)?;
            stream(path, &mut reader, config)
        }
        Command::Csv {
            path,
            row_wise,
            raw,
            delimiter,
        } => {
            let delimiter = u8::try_from(*delimiter).map_err(|_| {
                Error::new(ErrorKind::Usage).with_message("delimiter must be a single-byte character")
            })?;
            let mut csv = CsvOptions::new().with_decoder(CsvDecoder::new().with_delimiter(delimiter));
            if *row_wise {
                csv = csv.row_wise();
            }
            if *raw {
                csv = csv.raw();
            }
            let mut reader = Reader::csv(tabular_records, csv, options())?;
            stream(path, &mut reader, config)
        }
        Command::Columnar { path } => {
            let mut reader = Reader::columnar(tabular_records, BlockCodec, options())?;
            stream(path, &mut reader, config)
        }
        Command::EncodeColumnar { input, output } => encode_columnar(input, output, config),
    }
}

fn open_source(path: &Path) -> Result<Box<dyn Read>, Error> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(io::stdin().lock()));
    }
    let file = File::open(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to open {}", path.display()))
            .with_source(err)
    })?;
    Ok(Box::new(file))
}

fn stream(
    path: &Path,
    reader: &mut Reader<Value, EntitySet<String>>,
    config: IngestConfig,
) -> Result<(), Error> {
    let source = open_source(path)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let outcome = ingest(source, reader, config, |output| {
        let line = match output {
            Output::Entity(entity) => json!({ "entity": entity }),
            Output::Record(record) => json!({ "record": record }),
        };
        writeln!(out, "{line}").map_err(write_error)
    })?;
    out.flush().map_err(write_error)?;
    emit_summary(&outcome, reader.registry().map_or(0, Registry::len));
    Ok(())
}

fn encode_columnar(input: &Path, output: &Path, config: IngestConfig) -> Result<(), Error> {
    if config.chunk_size == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("chunk size must be positive"));
    }
    let mut reader: Reader<TabularBatch> = Reader::csv(
        |unit: &Unit<'_>| Ok(unit.as_batch().cloned().into_iter().collect()),
        CsvOptions::new(),
        ReaderOptions::new(),
    )?;
    let mut source = open_source(input)?;
    let mut data = Vec::new();
    source.read_to_end(&mut data).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read {}", input.display()))
            .with_source(err)
    })?;

    let mut outcome = IngestOutcome {
        bytes: data.len() as u64,
        ..IngestOutcome::default()
    };
    let mut batches = Vec::new();
    for piece in data.chunks(config.chunk_size) {
        outcome.chunks += 1;
        for output in reader.parse(piece.to_vec()) {
            batches.extend(output?.into_record());
        }
    }
    for output in reader.flush() {
        batches.extend(output?.into_record());
    }
    let names = reader.header().map(<[String]>::to_vec);
    reader.on_stream_end();
    let names = names.ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{} has no header line", input.display()))
    })?;

    let mut columns: Vec<Column> = names
        .into_iter()
        .map(|name| Column {
            name,
            values: Vec::new(),
        })
        .collect();
    for batch in batches {
        for row in batch.rows {
            for (column, value) in columns.iter_mut().zip(row) {
                column.values.push(value);
            }
        }
    }
    let batch = ColumnarBatch::new(columns).map_err(|(name, _, _)| {
        Error::new(ErrorKind::Internal).with_message(format!("column `{name}` is ragged"))
    })?;
    outcome.records = batch.num_rows() as u64;
    let bytes = encode_block(&batch)?;
    std::fs::write(output, &bytes).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to write {}", output.display()))
            .with_source(err)
    })?;
    emit_summary(&outcome, 0);
    Ok(())
}

fn document_records(unit: &Unit<'_>) -> Result<Vec<Value>, Error> {
    let Some(bytes) = unit.as_bytes() else {
        return Ok(Vec::new());
    };
    let value: Value = serde_json::from_slice(bytes).map_err(|err| {
        Error::new(ErrorKind::Parse)
            .with_message("chunk is not a json document")
            .with_hint("Raise --chunk-size so each chunk holds a whole document.")
            .with_source(err)
    })?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn line_records(unit: &Unit<'_>) -> Result<Vec<Value>, Error> {
    Ok(unit.as_bytes().map(line_value).into_iter().collect())
}

fn line_value(line: &[u8]) -> Value {
    serde_json::from_slice(line)
        .unwrap_or_else(|_| Value::String(line.trim_end_with(|c| c == '\r').to_str_lossy().into_owned()))
}

fn tabular_records(unit: &Unit<'_>) -> Result<Vec<Value>, Error> {
    Ok(match unit {
        Unit::Batch(batch) => (0..batch.num_rows())
            .filter_map(|index| batch.row(index))
            .map(Value::Object)
            .collect(),
        Unit::Row(row) => vec![Value::Object((*row).clone())],
        Unit::Columns(batch) => batch.rows().map(Value::Object).collect(),
        Unit::Bytes(span) => span
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| Value::String(line.to_str_lossy().into_owned()))
            .collect(),
    })
}

fn attach_ts_init(record: Value, ts_init: i64) -> Result<Value, Error> {
    Ok(match record {
        Value::Object(mut map) => {
            map.insert("ts_init".to_string(), json!(ts_init));
            Value::Object(map)
        }
        other => json!({ "value": other, "ts_init": ts_init }),
    })
}

/// Distinct values of `field` referenced by a unit, rendered as strings.
fn field_values(unit: &Unit<'_>, field: &str) -> Vec<String> {
    let values: Vec<Value> = match unit {
        Unit::Bytes(bytes) => bytes
            .lines()
            .map(line_value)
            .flat_map(|value| match value {
                Value::Array(items) => items,
                other => vec![other],
            })
            .filter_map(|value| value.get(field).cloned())
            .collect(),
        Unit::Row(row) => row.get(field).cloned().into_iter().collect(),
        Unit::Batch(batch) => match batch.column_index(field) {
            Some(index) => batch.rows.iter().filter_map(|row| row.get(index).cloned()).collect(),
            None => Vec::new(),
        },
        Unit::Columns(batch) => batch
            .column(field)
            .map(|column| column.values.clone())
            .unwrap_or_default(),
    };
    values
        .into_iter()
        .filter(|value| !value.is_null())
        .map(|value| match value {
            Value::String(text) => text,
            other => other.to_string(),
        })
        .collect()
}

fn write_error(err: io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to write output")
        .with_source(err)
}

fn emit_summary(outcome: &IngestOutcome, registered: usize) {
    let summary = json!({
        "summary": {
            "chunks": outcome.chunks,
            "bytes": outcome.bytes,
            "entities": outcome.entities,
            "records": outcome.records,
            "discarded_bytes": outcome.discarded_bytes,
            "registered": registered,
        }
    });
    eprintln!("{summary}");
}

fn emit_error(err: &Error) {
    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::ContractViolation => "preprocessor contract violated".to_string(),
        ErrorKind::InvalidHookUsage => "invalid discovery hook usage".to_string(),
        ErrorKind::Decode => "decode failed".to_string(),
        ErrorKind::Parse => "parse failed".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = std::error::Error::source(err);
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(unit) = err.unit() {
        inner.insert("unit".to_string(), json!(unit));
    }
    if let Some(offset) = err.offset() {
        inner.insert("offset".to_string(), json!(offset));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{attach_ts_init, field_values, line_value, tabular_records};
    use chunkwise::api::{Column, ColumnarBatch, TabularBatch, Unit};
    use serde_json::json;

    #[test]
    fn line_value_falls_back_to_string() {
        assert_eq!(line_value(b"{\"x\":1}"), json!({"x": 1}));
        assert_eq!(line_value(b"plain text\r"), json!("plain text"));
    }

    #[test]
    fn ts_init_wraps_non_objects() {
        assert_eq!(
            attach_ts_init(json!(5), 10).expect("attach"),
            json!({"value": 5, "ts_init": 10})
        );
        assert_eq!(
            attach_ts_init(json!({"a": 1}), 10).expect("attach"),
            json!({"a": 1, "ts_init": 10})
        );
    }

    #[test]
    fn field_values_read_every_unit_shape() {
        let lines = Unit::Bytes(b"{\"id\":\"x\"}\n{\"id\":2}\n{\"other\":1}");
        assert_eq!(field_values(&lines, "id"), vec!["x", "2"]);

        let batch = TabularBatch {
            columns: vec!["id".to_string()],
            rows: vec![vec![json!("a")], vec![json!(null)]],
        };
        assert_eq!(field_values(&Unit::Batch(&batch), "id"), vec!["a"]);

        let columns = ColumnarBatch::new(vec![Column {
            name: "id".to_string(),
            values: vec![json!("c")],
        }])
        .expect("batch");
        assert_eq!(field_values(&Unit::Columns(&columns), "id"), vec!["c"]);
        assert!(field_values(&Unit::Columns(&columns), "missing").is_empty());
    }

    #[test]
    fn tabular_records_render_rows_as_objects() {
        let batch = TabularBatch {
            columns: vec!["a".to_string(), "b".to_string()],
            rows: vec![vec![json!(1), json!(2)]],
        };
        assert_eq!(
            tabular_records(&Unit::Batch(&batch)).expect("records"),
            vec![json!({"a": 1, "b": 2})]
        );
        assert_eq!(
            tabular_records(&Unit::Bytes(b"1,2\n\n3,4")).expect("records"),
            vec![json!("1,2"), json!("3,4")]
        );
    }
}
