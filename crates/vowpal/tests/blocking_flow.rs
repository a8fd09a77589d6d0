#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use vowpal::{PassthroughFormatter, VowpalClient, VowpalError};

/// Writes an executable stand-in for the vw binary; it ignores the managed
/// `-p` argv and speaks the same line protocol on stdin/stdout.
fn fake_engine(script: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("engine.sh");
    fs::write(&path, script).expect("write engine script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod engine script");
    (dir, path)
}

const ECHO_ENGINE: &str = "#!/bin/sh\nexec cat\n";

fn scores(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{i}.5")).collect()
}

#[test]
fn predict_pipelines_batches_in_order() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = VowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(2)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let results: Result<Vec<f64>, VowpalError> =
        client.predict(&common, scores(5), None).expect("start predict").collect();

    assert_eq!(results.unwrap(), vec![0.5, 1.5, 2.5, 3.5, 4.5]);
    client.close().expect("close engine");
}

#[test]
fn predict_with_a_generous_timeout_is_complete() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = VowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(3)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let results: Result<Vec<f64>, VowpalError> = client
        .predict(&common, scores(7), Some(Duration::from_secs(5)))
        .expect("start predict")
        .collect();

    assert_eq!(results.unwrap().len(), 7);
    client.close().expect("close engine");
}

#[test]
fn train_consumes_the_acknowledgement_stream() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = VowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(2)
        .build()
        .expect("spawn engine");

    let common = "|u u1".to_string();
    let items: Vec<String> = (0..5).map(|i| format!("|i i{i}")).collect();
    let labels = [1.0, -1.0, 1.0, -1.0, 1.0];
    let weights = [Some(0.5), None, None, Some(2.0), None];
    client.train(&common, items, labels, weights).expect("train");

    // Every acknowledgement was read back, so a follow-up predict is not
    // fed stale results.
    let results: Result<Vec<f64>, VowpalError> =
        client.predict(&common, vec!["0.25".to_string()], None).expect("start predict").collect();
    match results {
        // The echo engine returns the line itself, which starts with the
        // common part and does not parse as a float.
        Err(VowpalError::Protocol { .. }) => {}
        other => panic!("expected the echoed line to be rejected, got {other:?}"),
    }
}

#[test]
fn write_only_trains_without_reading() {
    let (_dir, engine) = fake_engine("#!/bin/sh\ncat > /dev/null\n");
    let mut client = VowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .write_only(true)
        .build()
        .expect("spawn engine");

    let common = "|u u1".to_string();
    let items: Vec<String> = (0..50).map(|i| format!("|i i{i}")).collect();
    let labels: Vec<f64> = (0..50).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
    let weights: Vec<Option<f64>> = (0..50).map(|_| None).collect();
    client.train(&common, items, labels, weights).expect("train");

    match client.predict(&common, scores(1), None) {
        Err(VowpalError::WriteOnlyClient) => {}
        Ok(_) => panic!("expected write-only predict to be rejected"),
        Err(other) => panic!("expected write-only rejection, got {other}"),
    }
    client.close().expect("close engine");
}

#[test]
fn a_non_zero_exit_surfaces_from_close() {
    let (_dir, engine) = fake_engine("#!/bin/sh\ncat > /dev/null\nexit 3\n");
    let client = VowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .write_only(true)
        .build()
        .expect("spawn engine");

    match client.close() {
        Err(VowpalError::NonZeroExit { status }) => assert_eq!(status.code(), Some(3)),
        other => panic!("expected non-zero exit to be fatal, got {other:?}"),
    }
}
