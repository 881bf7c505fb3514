// Header capture, raw row mapping, and the decoder seam for delimited text.
use bstr::ByteSlice;
use serde_json::{Number, Value};

use crate::core::carry;
use crate::core::error::{Error, ErrorKind};
use crate::core::unit::{Row, TabularBatch};

/// Decodes a span of delimited rows (no header line) into a batch named by `header`.
pub trait TabularDecoder {
    fn decode(&mut self, header: &[String], span: &[u8]) -> Result<TabularBatch, Error>;

    /// Field separator for the header line and raw rows.
    fn delimiter(&self) -> u8 {
        b','
    }

    /// Splits the header line into field names.
    fn decode_header(&mut self, line: &[u8]) -> Result<Vec<String>, Error> {
        decode_header(line, self.delimiter())
    }
}

impl<F> TabularDecoder for F
where
    F: FnMut(&[String], &[u8]) -> Result<TabularBatch, Error>,
{
    fn decode(&mut self, header: &[String], span: &[u8]) -> Result<TabularBatch, Error> {
        self(header, span)
    }
}

/// `csv`-crate backed decoder with scalar type inference.
#[derive(Clone, Copy, Debug)]
pub struct CsvDecoder {
    delimiter: u8,
    infer_types: bool,
}

impl CsvDecoder {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            infer_types: true,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Keep every cell as a string instead of inferring numbers and booleans.
    pub fn with_strings_only(mut self) -> Self {
        self.infer_types = false;
        self
    }
}

impl Default for CsvDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TabularDecoder for CsvDecoder {
    fn decode(&mut self, header: &[String], span: &[u8]) -> Result<TabularBatch, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(span);
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record.map_err(|err| {
                Error::new(ErrorKind::Decode)
                    .with_message("invalid delimited row")
                    .with_unit(index as u64 + 1)
                    .with_source(err)
            })?;
            if record.len() != header.len() {
                return Err(Error::new(ErrorKind::Decode)
                    .with_message(format!(
                        "row has {} fields but header has {}",
                        record.len(),
                        header.len()
                    ))
                    .with_unit(index as u64 + 1));
            }
            rows.push(
                record
                    .iter()
                    .map(|cell| {
                        if self.infer_types {
                            infer_cell(cell)
                        } else {
                            Value::String(cell.to_string())
                        }
                    })
                    .collect(),
            );
        }
        Ok(TabularBatch {
            columns: header.to_vec(),
            rows,
        })
    }

    fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

fn infer_cell(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match trimmed {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(cell.to_string()),
    }
}

/// Decodes a header line into its ordered field names.
pub fn decode_header(line: &[u8], delimiter: u8) -> Result<Vec<String>, Error> {
    let text = strip_cr(line).to_str().map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("csv header is not utf-8")
            .with_source(err)
    })?;
    Ok(text
        .split(char::from(delimiter))
        .map(|name| name.trim().to_string())
        .collect())
}

/// Maps one raw line onto the header without any quoting rules.
///
/// Surplus fields on either side are dropped.
pub fn raw_row(header: &[String], line: &[u8], delimiter: u8) -> Result<Row, Error> {
    let text = strip_cr(line).to_str().map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("csv row is not utf-8")
            .with_source(err)
    })?;
    Ok(header
        .iter()
        .cloned()
        .zip(
            text.split(char::from(delimiter))
                .map(|value| Value::String(value.to_string())),
        )
        .collect())
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Splits a span into raw rows, skipping blank lines.
pub fn raw_rows(header: &[String], span: &[u8], delimiter: u8) -> Result<Vec<Row>, Error> {
    span.split_str(&[carry::TERMINATOR])
        .filter(|line| !strip_cr(line).is_empty())
        .map(|line| raw_row(header, line, delimiter))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{CsvDecoder, TabularDecoder, decode_header, raw_row, raw_rows};
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn header_is_trimmed_and_ordered() {
        let names = decode_header(b"timestamp, bid ,ask\r", b',').expect("header");
        assert_eq!(names, header(&["timestamp", "bid", "ask"]));
    }

    #[test]
    fn raw_row_zips_header() {
        let row = raw_row(&header(&["a", "b"]), b"1,2", b',').expect("row");
        assert_eq!(Value::Object(row), json!({"a": "1", "b": "2"}));
    }

    #[test]
    fn raw_row_drops_surplus_fields() {
        let row = raw_row(&header(&["a"]), b"1,2,3", b',').expect("row");
        assert_eq!(row.len(), 1);
        let row = raw_row(&header(&["a", "b", "c"]), b"1", b',').expect("row");
        assert_eq!(row.len(), 1);
    }

    #[test]
    fn raw_rows_skip_blank_lines() {
        let rows = raw_rows(&header(&["a"]), b"1\n\n2\r\n", b',').expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["a"], "2");
    }

    #[test]
    fn csv_decoder_infers_scalars_and_handles_quotes() {
        let batch = CsvDecoder::new()
            .decode(
                &header(&["sym", "px", "qty", "live", "note"]),
                b"AUD/USD,0.71,100,true,\n\"EUR,USD\",1.1,5,false,\"hi\"\n",
            )
            .expect("decode");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.rows[0][1], json!(0.71));
        assert_eq!(batch.rows[0][2], json!(100));
        assert_eq!(batch.rows[0][3], json!(true));
        assert_eq!(batch.rows[0][4], Value::Null);
        assert_eq!(batch.rows[1][0], json!("EUR,USD"));
    }

    #[test]
    fn csv_decoder_strings_only() {
        let batch = CsvDecoder::new()
            .with_strings_only()
            .decode(&header(&["a"]), b"1\n")
            .expect("decode");
        assert_eq!(batch.rows[0][0], json!("1"));
    }

    #[test]
    fn csv_decoder_rejects_field_count_mismatch() {
        let err = CsvDecoder::new()
            .decode(&header(&["a", "b"]), b"1,2\n3\n")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(err.unit(), Some(2));
    }

    #[test]
    fn csv_decoder_honours_delimiter() {
        let mut decoder = CsvDecoder::new().with_delimiter(b';');
        let names = decoder.decode_header(b"a;b").expect("header");
        assert_eq!(names, header(&["a", "b"]));
        let batch = decoder.decode(&names, b"1;x\n").expect("decode");
        assert_eq!(batch.rows[0], vec![json!(1), json!("x")]);

        let rows = raw_rows(&names, b"1;x\n", decoder.delimiter()).expect("rows");
        assert_eq!(Value::Object(rows[0].clone()), json!({"a": "1", "b": "x"}));
    }
}
