// CLI integration tests for the chunkwise binary.
use std::path::Path;
use std::process::{Command, Output};

use serde_json::{Value, json};

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_chunkwise");
    Command::new(exe)
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn stdout_lines(output: &Output) -> Vec<Value> {
    std::str::from_utf8(&output.stdout)
        .expect("utf8")
        .lines()
        .map(parse_json)
        .collect()
}

fn stderr_json(output: &Output) -> Value {
    let text = String::from_utf8_lossy(&output.stderr);
    let line = text
        .lines()
        .rev()
        .find(|line| line.starts_with('{'))
        .expect("json line");
    parse_json(line)
}

fn write(dir: &Path, name: &str, contents: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write input");
    path.to_str().expect("utf8 path").to_string()
}

#[test]
fn text_lines_become_records_across_small_chunks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "feed.jsonl", b"{\"id\":1}\nplain\n{\"id\":2}\n");

    let output = cmd()
        .args(["text", &path, "--chunk-size", "3"])
        .output()
        .expect("text");
    assert!(output.status.success());
    assert_eq!(
        stdout_lines(&output),
        vec![
            json!({"record": {"id": 1}}),
            json!({"record": "plain"}),
            json!({"record": {"id": 2}}),
        ]
    );
    let summary = stderr_json(&output);
    assert_eq!(summary["summary"]["records"], 3);
    assert_eq!(summary["summary"]["discarded_bytes"], 0);
}

#[test]
fn unterminated_tail_is_reported_then_flushed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "tail.txt", b"A\nB\nC");

    let dropped = cmd().args(["text", &path]).output().expect("text");
    assert!(dropped.status.success());
    assert_eq!(stdout_lines(&dropped).len(), 2);
    assert_eq!(stderr_json(&dropped)["summary"]["discarded_bytes"], 1);

    let flushed = cmd().args(["text", &path, "--flush"]).output().expect("text");
    assert!(flushed.status.success());
    assert_eq!(stdout_lines(&flushed).last(), Some(&json!({"record": "C"})));
}

#[test]
fn log_prefix_attaches_ts_init_and_discovers_entities() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(
        temp.path(),
        "stream.log",
        b"2021-06-29T06:04:11.943000 - {\"market\":\"1.1\",\"px\":2}\n\
          2021-06-29T06:04:12.000000 - {\"market\":\"1.1\",\"px\":3}\n",
    );

    let output = cmd()
        .args(["text", &path, "--log-prefix", "--discover", "market"])
        .output()
        .expect("text");
    assert!(output.status.success());
    let lines = stdout_lines(&output);
    assert_eq!(lines[0], json!({"entity": "1.1"}));
    assert_eq!(lines[1]["record"]["ts_init"], json!(1624946651943000000i64));
    assert_eq!(lines[2]["record"]["px"], 3);
    assert_eq!(lines.len(), 3);
    assert_eq!(stderr_json(&output)["summary"]["registered"], 1);
}

#[test]
fn csv_row_wise_raw_and_decoded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "quotes.csv", b"a,b\n1,2\n3,4\n");

    let raw = cmd()
        .args(["csv", &path, "--row-wise", "--raw"])
        .output()
        .expect("csv");
    assert!(raw.status.success());
    assert_eq!(
        stdout_lines(&raw),
        vec![
            json!({"record": {"a": "1", "b": "2"}}),
            json!({"record": {"a": "3", "b": "4"}}),
        ]
    );

    let decoded = cmd().args(["csv", &path]).output().expect("csv");
    assert!(decoded.status.success());
    assert_eq!(stdout_lines(&decoded)[1], json!({"record": {"a": 3, "b": 4}}));
}

#[test]
fn encode_columnar_then_read_back() {
    let temp = tempfile::tempdir().expect("tempdir");
    let csv = write(temp.path(), "quotes.csv", b"symbol,bid\nAUD/USD,0.71\nEUR/USD,1.18\n");
    let block = temp.path().join("quotes.col");
    let block = block.to_str().expect("utf8 path");

    let encode = cmd()
        .args(["encode-columnar", &csv, block])
        .output()
        .expect("encode");
    assert!(encode.status.success());

    let read = cmd()
        .args(["columnar", block, "--chunk-size", "7", "--discover", "symbol"])
        .output()
        .expect("columnar");
    assert!(read.status.success());
    let lines = stdout_lines(&read);
    assert_eq!(lines[0], json!({"entity": "AUD/USD"}));
    assert_eq!(lines[1], json!({"entity": "EUR/USD"}));
    assert_eq!(lines[3], json!({"record": {"symbol": "EUR/USD", "bid": 1.18}}));
}

#[test]
fn truncated_block_flush_is_decode_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "broken.col", b"COL1\x01\x00");

    let plain = cmd().args(["columnar", &path]).output().expect("columnar");
    assert!(plain.status.success());
    assert!(stdout_lines(&plain).is_empty());

    let flushed = cmd()
        .args(["columnar", &path, "--flush"])
        .output()
        .expect("columnar");
    assert_eq!(flushed.status.code().unwrap(), 5);
    assert_eq!(stderr_json(&flushed)["error"]["kind"], "Decode");
}

#[test]
fn bytes_chunk_that_is_not_json_is_parse_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "doc.json", b"[1,2,3]");

    let ok = cmd().args(["bytes", &path]).output().expect("bytes");
    assert!(ok.status.success());
    assert_eq!(stdout_lines(&ok).len(), 3);

    let split = cmd()
        .args(["bytes", &path, "--chunk-size", "2"])
        .output()
        .expect("bytes");
    assert_eq!(split.status.code().unwrap(), 6);
    let err = stderr_json(&split);
    assert_eq!(err["error"]["kind"], "Parse");
    assert_eq!(err["error"]["unit"], 1);
    assert!(err["error"]["hint"].as_str().unwrap().contains("--chunk-size"));
}

#[test]
fn usage_and_io_exit_codes() {
    let usage = cmd()
        .args(["text", "--chunk-size", "nope", "x"])
        .output()
        .expect("usage");
    assert_eq!(usage.status.code().unwrap(), 2);
    assert_eq!(stderr_json(&usage)["error"]["kind"], "Usage");

    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "in.txt", b"a\n");
    let zero = cmd()
        .args(["text", &path, "--chunk-size", "0"])
        .output()
        .expect("zero");
    assert_eq!(zero.status.code().unwrap(), 2);

    let missing = temp.path().join("missing.txt");
    let io = cmd()
        .args(["text", missing.to_str().unwrap()])
        .output()
        .expect("missing");
    assert_eq!(io.status.code().unwrap(), 7);
    assert!(stderr_json(&io)["error"]["causes"].is_array());
}

#[test]
fn log_prefix_skips_blank_lines() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(
        temp.path(),
        "gaps.log",
        b"2021-06-29T06:03:14.528000 - {\"id\":1}\n\n2021-06-29T06:03:15 - {\"id\":2}\n",
    );

    let output = cmd()
        .args(["text", &path, "--log-prefix"])
        .output()
        .expect("text");
    assert!(output.status.success());
    let lines = stdout_lines(&output);
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["record"]["ts_init"], json!(1624946594528000000i64));
    assert_eq!(lines[1]["record"]["ts_init"], json!(1624946595000000000i64));
}

#[test]
fn raw_csv_honours_delimiter() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write(temp.path(), "semi.csv", b"a;b\n1;2\n");

    let output = cmd()
        .args(["csv", &path, "--row-wise", "--raw", "--delimiter", ";"])
        .output()
        .expect("csv");
    assert!(output.status.success());
    assert_eq!(stdout_lines(&output), vec![json!({"record": {"a": "1", "b": "2"}})]);
}

#[test]
fn encode_columnar_keeps_header_without_rows() {
    let temp = tempfile::tempdir().expect("tempdir");
    let csv = write(temp.path(), "empty.csv", b"symbol,bid\n");
    let block = temp.path().join("empty.col");
    let block = block.to_str().expect("utf8 path");

    let encode = cmd()
        .args(["encode-columnar", &csv, block])
        .output()
        .expect("encode");
    assert!(encode.status.success());

    let bytes = std::fs::read(block).expect("block");
    let batch = chunkwise::api::decode_block(&bytes).expect("decode");
    let names: Vec<&str> = batch.columns().iter().map(|column| column.name.as_str()).collect();
    assert_eq!(names, vec!["symbol", "bid"]);
    assert_eq!(batch.num_rows(), 0);

    let empty = write(temp.path(), "nothing.csv", b"");
    let missing = cmd()
        .args(["encode-columnar", &empty, block])
        .output()
        .expect("encode");
    assert_eq!(missing.status.code().unwrap(), 2);
}
