#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use vowpal::{NonBlockingVowpalClient, PassthroughFormatter, PredictMetrics, VowpalError};

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
fn predict_yields_every_item_in_order() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(2)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let results: Result<Vec<f64>, VowpalError> =
        client.predict(&common, scores(5), None).expect("start predict").collect();

    assert_eq!(results.unwrap(), vec![0.5, 1.5, 2.5, 3.5, 4.5]);
    assert_eq!(client.pending_lines(), 0);
    client.close().expect("close engine");
}

#[test]
fn an_empty_item_source_yields_nothing() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let results: Vec<_> = client
        .predict(&common, Vec::<String>::new(), None)
        .expect("start predict")
        .collect();

    assert!(results.is_empty());
    client.close().expect("close engine");
}

#[test]
fn a_generous_timeout_does_not_truncate() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(3)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let mut metrics = PredictMetrics::default();
    let results: Result<Vec<f64>, VowpalError> = client
        .predict_with_metrics(&common, scores(7), Some(Duration::from_secs(5)), &mut metrics, None)
        .expect("start predict")
        .collect();

    assert_eq!(results.unwrap().len(), 7);
    assert_eq!(metrics.num_lines, 7);
    assert_eq!(metrics.before_cleanup_pending_lines, 0);
    client.close().expect("close engine");
}

#[test]
fn abandoned_results_are_cleaned_up_by_the_next_call() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .batch_size(2)
        .build()
        .expect("spawn engine");

    let common = String::new();
    {
        let mut predictions = client.predict(&common, scores(5), None).expect("start predict");
        // Take one result and walk away from the rest.
        let first = predictions.next().expect("first result").expect("score");
        assert_eq!(first, 0.5);
    }

    let results: Result<Vec<f64>, VowpalError> =
        client.predict(&common, scores(3), None).expect("start predict").collect();
    assert_eq!(results.unwrap(), vec![0.5, 1.5, 2.5]);
    assert_eq!(client.pending_lines(), 0);
    client.close().expect("close engine");
}

#[test]
fn a_non_numeric_response_is_a_protocol_violation() {
    let (_dir, engine) = fake_engine("#!/bin/sh\nwhile read line; do echo not-a-float; done\n");
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .build()
        .expect("spawn engine");

    let common = String::new();
    let mut predictions = client.predict(&common, scores(1), None).expect("start predict");
    match predictions.next() {
        Some(Err(VowpalError::Protocol { line })) => assert_eq!(line, "not-a-float"),
        other => panic!("expected protocol violation, got {other:?}"),
    }
}

#[test]
fn train_is_unsupported() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .build()
        .expect("spawn engine");

    let common = String::new();
    match client.train(&common, scores(1), [1.0], [None]) {
        Err(VowpalError::TrainUnsupported) => {}
        other => panic!("expected train to be unsupported, got {other:?}"),
    }
    client.close().expect("close engine");
}

#[test]
fn explain_requires_audit_mode() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .build()
        .expect("spawn engine");

    match client.explain_line("|a x", false) {
        Err(VowpalError::NotInAuditMode) => {}
        other => panic!("expected audit precondition, got {other:?}"),
    }
    client.close().expect("close engine");
}

#[cfg(target_os = "linux")]
#[test]
fn the_stdin_pipe_buffer_can_be_resized() {
    let (_dir, engine) = fake_engine(ECHO_ENGINE);
    let mut client = NonBlockingVowpalClient::builder(PassthroughFormatter)
        .binary(&engine)
        .pipe_buffer_size(65536)
        .build()
        .expect("spawn engine with resized pipe");

    let common = String::new();
    let results: Result<Vec<f64>, VowpalError> =
        client.predict(&common, scores(2), None).expect("start predict").collect();
    assert_eq!(results.unwrap(), vec![0.5, 1.5]);
    client.close().expect("close engine");
}
