#![cfg(feature = "cli")]

use std::process::{Command, Output};

fn chanprims(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_chanprims"))
        .arg("--log-level")
        .arg("error")
        .args(args)
        .output()
        .expect("chanprims should run")
}

fn json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().expect("one line of output");
    serde_json::from_str(line).expect("stdout should be JSON")
}

#[test]
fn version_prints_package_version() {
    let output = chanprims(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.trim(),
        format!("chanprims {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn varint_encode_and_decode() {
    let output = chanprims(&["--format", "json", "varint", "encode", "300"]);
    assert!(output.status.success());
    let record = json(&output);
    assert_eq!(record["hex"], "ac02");
    assert_eq!(record["size"], 2);
    assert!(record["schema_id"]
        .as_str()
        .unwrap()
        .ends_with("varint-encoded.schema.json"));

    let output = chanprims(&["--format", "json", "varint", "decode", "ac02ff"]);
    assert!(output.status.success());
    let record = json(&output);
    assert_eq!(record["value"], 300);
    assert_eq!(record["consumed"], 2);
    assert_eq!(record["trailing"], 1);
}

#[test]
fn varint_overflow_exits_with_data_invalid() {
    let output = chanprims(&["varint", "encode", "2147483648"]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("31-bit"));
}

#[test]
fn encode_output_decodes_back() {
    let output = chanprims(&[
        "--format",
        "json",
        "encode",
        "--text",
        "round trip",
        "--compression",
        "deflate",
    ]);
    assert!(output.status.success());
    let encoded = json(&output);
    assert_eq!(encoded["content_type"], "application/soap+msbin1+deflate");
    let hex = encoded["hex"].as_str().unwrap().to_string();

    let output = chanprims(&[
        "--format",
        "json",
        "decode",
        &hex,
        "--compression",
        "deflate",
    ]);
    assert!(output.status.success());
    let decoded = json(&output);
    assert_eq!(decoded["body"], "round trip");
    assert_eq!(decoded["action"], "urn:chanprims:echo");
    assert_eq!(decoded["version"], "Soap12WSAddressing10");
}

#[test]
fn framed_stream_carries_via_and_encoding() {
    let output = chanprims(&[
        "--format",
        "json",
        "encode",
        "--text",
        "over the wire",
        "--to",
        "test://host/orders",
        "--compression",
        "gzip",
        "--framed",
    ]);
    assert!(output.status.success());
    let encoded = json(&output);
    assert_eq!(encoded["framed"], true);
    let hex = encoded["hex"].as_str().unwrap().to_string();
    // Version record, then a simplex Mode record.
    assert!(hex.starts_with("0001000103"));

    let output = chanprims(&[
        "--format",
        "json",
        "decode",
        &hex,
        "--framed",
        "--compression",
        "gzip",
    ]);
    assert!(output.status.success());
    let decoded = json(&output);
    assert_eq!(decoded["body"], "over the wire");
    assert_eq!(decoded["via"], "test://host/orders");
    assert_eq!(decoded["content_type"], "application/soap+msbin1+gzip");
}

#[test]
fn framed_decode_of_an_empty_stream_is_invalid_data() {
    // Just an End record.
    let output = chanprims(&["decode", "07", "--framed"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn decode_rejects_a_mismatched_content_type() {
    let output = chanprims(&["--format", "json", "encode", "--text", "x"]);
    let hex = json(&output)["hex"].as_str().unwrap().to_string();

    let output = chanprims(&["decode", &hex, "--content-type", "text/xml"]);
    assert_eq!(output.status.code(), Some(60));
}

#[test]
fn content_type_check_reports_support() {
    let output = chanprims(&[
        "--format",
        "json",
        "content-type",
        "--session",
        "--check",
        "application/soap+msbinsession1",
    ]);
    assert!(output.status.success());
    let record = json(&output);
    assert_eq!(record["content_type"], "application/soap+msbinsession1");
    assert_eq!(record["supported"], true);

    let output = chanprims(&["content-type", "--check", "application/json"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn request_echoes_through_the_loopback_stack() {
    let output = chanprims(&[
        "--format",
        "json",
        "request",
        "--text",
        "ping",
        "--compression",
        "gzip",
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let record = json(&output);
    assert_eq!(record["body"], "ping");
    assert_eq!(record["action"], "urn:chanprims:echoResponse");
    assert!(record["relates_to"].is_string());
}

#[test]
fn request_with_foreign_scheme_is_a_usage_error() {
    let output = chanprims(&["request", "http://localhost/echo"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn raw_format_writes_the_body() {
    let output = chanprims(&["--format", "raw", "request", "--text", "raw body"]);
    assert!(output.status.success());
    assert_eq!(output.stdout, b"raw body");
}
