use super::*;
use crate::cancellation::PipeRequestCanceller;
use crate::test_support::*;
use serde_json::json;

fn args() -> Value {
    json!({ "file": "/project/src/index.ts", "line": 1, "offset": 1 })
}

#[tokio::test]
async fn test_sequence_numbers_follow_call_order() {
    let fake = fake_server("main");
    let mut futures = Vec::new();
    for _ in 0..5 {
        futures.push(fake.server.execute("quickinfo", args(), ExecuteOptions::default()));
    }

    for (seq, future) in futures.into_iter().enumerate() {
        let seq = seq as u64;
        assert_eq!(*fake.process.written_seqs().last().unwrap(), seq);
        fake.respond(seq, "quickinfo", json!({ "seq": seq }));
        future.await.unwrap();
        settle().await;
    }
    assert_eq!(fake.process.written_seqs(), vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_second_sync_request_waits_for_first_response() {
    let fake = fake_server("main");
    let first = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let second = fake.server.execute("definition", args(), ExecuteOptions::default());

    settle().await;
    assert_eq!(fake.process.written_commands(), vec!["quickinfo"]);
    assert_eq!(fake.server.queued_request_count(), 1);

    fake.respond(0, "quickinfo", json!({ "kind": "const" }));
    let first = first.await.unwrap();
    settle().await;
    assert_eq!(
        fake.process.written_commands(),
        vec!["quickinfo", "definition"]
    );

    let ServerResponse::Response(response) = first else {
        panic!("expected a response");
    };
    assert_eq!(response.body, Some(json!({ "kind": "const" })));

    fake.respond(1, "definition", json!([]));
    assert!(matches!(second.await, Ok(ServerResponse::Response(_))));
}

#[tokio::test]
async fn test_async_requests_do_not_hold_the_queue() {
    let fake = fake_server("main");
    let geterr = fake.server.execute(
        "geterr",
        json!({ "files": ["/a.ts"], "delay": 0 }),
        ExecuteOptions::default().asynchronous(),
    );
    let _quickinfo = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let _definition = fake.server.execute("definition", args(), ExecuteOptions::default());

    assert_eq!(fake.process.written_commands(), vec!["geterr", "quickinfo"]);

    fake.request_completed(0);
    assert_eq!(geterr.await, Ok(ServerResponse::Completed));
}

#[tokio::test]
async fn test_request_completed_is_not_republished() {
    let fake = fake_server("main");
    let (events, _sub) = collect(&fake.server.signals().on_event);
    let geterr = fake
        .server
        .execute("geterr", json!({}), ExecuteOptions::default().asynchronous());

    fake.emit_event("semanticDiag", json!({ "file": "/a.ts", "diagnostics": [] }));
    fake.request_completed(0);
    geterr.await.unwrap();

    let names: Vec<String> = events.lock().unwrap().iter().map(|e| e.event.clone()).collect();
    assert_eq!(names, vec!["semanticDiag"]);
}

#[tokio::test]
async fn test_no_content_response() {
    let fake = fake_server("main");
    let future = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    fake.fail(0, "quickinfo", tsz_host_wire::NO_CONTENT_MESSAGE);
    assert_eq!(future.await, Ok(ServerResponse::NoContent));
}

#[tokio::test]
async fn test_failed_response_is_typed_server_error_and_reported() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let reporter: Arc<dyn TelemetryReporter> = telemetry.clone();
    let fake = fake_server_with("semantic", |builder| builder.telemetry(reporter));

    let future = fake.server.execute("completionInfo", args(), ExecuteOptions::default());
    fake.fail(0, "completionInfo", "Debug Failure. False expression.\n    at foo (tsserver.js:1:1)");

    let Err(ExecuteError::Server(err)) = future.await else {
        panic!("expected a server error");
    };
    assert_eq!(err.server_id, "semantic");
    assert_eq!(err.version, "5.4.0-test");
    assert_eq!(err.response.command, "completionInfo");

    let events = telemetry.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "languageServiceErrorResponse");
    assert_eq!(events[0].1["message"], "Debug Failure. False expression.");
}

#[tokio::test]
async fn test_cancelling_queued_request_never_writes_it() {
    let fake = fake_server("main");
    let first = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let token = CancellationToken::new();
    let second = fake.server.execute(
        "completionInfo",
        args(),
        ExecuteOptions::default().with_token(token.clone()),
    );

    token.cancel();
    let ServerResponse::Cancelled { reason } = second.await.unwrap() else {
        panic!("expected cancellation");
    };
    assert_eq!(reason, "Cancelled request 1 - completionInfo");
    assert_eq!(fake.server.queued_request_count(), 0);

    fake.respond(0, "quickinfo", json!({}));
    first.await.unwrap();
    settle().await;
    assert_eq!(fake.process.written_seqs(), vec![0]);
}

#[tokio::test]
async fn test_already_cancelled_token_is_never_written() {
    let fake = fake_server("main");
    let token = CancellationToken::new();
    token.cancel();
    let future = fake.server.execute(
        "quickinfo",
        args(),
        ExecuteOptions::default().with_token(token),
    );

    assert!(future.await.unwrap().is_cancelled());
    assert!(fake.process.written().is_empty());
}

#[tokio::test]
async fn test_cancelling_dispatched_request_signals_pipe_and_unblocks_queue() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("tscancellation.tmp.");
    let canceller = PipeRequestCanceller::with_pipe_name("main", prefix.to_string_lossy().into_owned());
    let fake = fake_server_with("main", |builder| builder.canceller(Box::new(canceller)));

    let token = CancellationToken::new();
    let first = fake.server.execute(
        "quickinfo",
        args(),
        ExecuteOptions::default().with_token(token.clone()),
    );
    let second = fake.server.execute("definition", args(), ExecuteOptions::default());
    assert_eq!(fake.process.written_seqs(), vec![0]);

    token.cancel();
    assert!(first.await.unwrap().is_cancelled());
    assert!(dir.path().join("tscancellation.tmp.0").exists());

    settle().await;
    assert_eq!(fake.process.written_seqs(), vec![0, 1]);

    // A late answer to the cancelled request is ignored.
    fake.respond(0, "quickinfo", json!({}));
    fake.respond(1, "definition", json!([]));
    assert!(matches!(second.await, Ok(ServerResponse::Response(_))));
}

#[tokio::test]
async fn test_cancel_without_pipe_still_frees_the_in_flight_slot() {
    let fake = fake_server("main");
    let first = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let second = fake.server.execute("definition", args(), ExecuteOptions::default());
    assert_eq!(fake.process.written_seqs(), vec![0]);

    assert!(!fake.server.try_cancel_request(0, "quickinfo"));
    assert!(first.await.unwrap().is_cancelled());
    assert_eq!(fake.process.written_seqs(), vec![0, 1]);

    fake.respond(1, "definition", json!([]));
    assert!(matches!(second.await, Ok(ServerResponse::Response(_))));
}

#[tokio::test]
async fn test_cancel_after_response_keeps_response() {
    let fake = fake_server("main");
    let token = CancellationToken::new();
    let future = fake.server.execute(
        "quickinfo",
        args(),
        ExecuteOptions::default().with_token(token.clone()),
    );
    fake.respond(0, "quickinfo", json!({ "ok": true }));
    let result = future.await.unwrap();
    token.cancel();
    settle().await;

    assert!(matches!(result, ServerResponse::Response(_)));
    assert_eq!(fake.server.pending_callback_count(), 0);
}

#[tokio::test]
async fn test_cancelled_server_error_is_not_reported() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let reporter: Arc<dyn TelemetryReporter> = telemetry.clone();
    let fake = fake_server_with("main", |builder| builder.telemetry(reporter));
    let token = CancellationToken::new();
    let future = fake.server.execute(
        "quickinfo",
        args(),
        ExecuteOptions::default().with_token(token.clone()),
    );

    fake.fail(0, "quickinfo", "Operation canceled");
    settle().await;
    token.cancel();

    assert!(matches!(future.await, Err(ExecuteError::Server(_))));
    assert!(telemetry.events().is_empty());
}

#[tokio::test]
async fn test_exit_settles_every_outstanding_request() {
    let fake = fake_server("main");
    let (exits, _sub) = collect(&fake.server.signals().on_exit);
    let first = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let second = fake.server.execute("definition", args(), ExecuteOptions::default());
    let third = fake
        .server
        .execute("geterr", json!({}), ExecuteOptions::default().asynchronous());

    fake.exit(1);

    let expected = Err(ExecuteError::ServerDestroyed {
        cause: "server exited".to_string(),
    });
    assert_eq!(first.await, expected);
    assert_eq!(second.await, expected);
    assert_eq!(third.await, expected);
    assert_eq!(
        *exits.lock().unwrap(),
        vec![ExitStatus {
            code: Some(1),
            signal: None
        }]
    );
}

#[tokio::test]
async fn test_requests_after_exit_fail_without_being_written() {
    let fake = fake_server("main");
    fake.exit(1);
    settle().await;

    let future = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(500), future)
        .await
        .expect("execute after exit must settle");
    assert_eq!(
        outcome,
        Err(ExecuteError::ServerDestroyed {
            cause: "server exited".to_string()
        })
    );

    fake.server.notify("open", args(), NotifyOptions::default());
    assert!(fake.process.written_commands().is_empty());
    assert_eq!(fake.server.pending_callback_count(), 0);
}

#[tokio::test]
async fn test_requests_after_process_error_fail_immediately() {
    let fake = fake_server("main");
    fake.error("wait failed");
    settle().await;

    let future = fake.server.execute("definition", args(), ExecuteOptions::default());
    assert_eq!(
        future.now_or_never(),
        Some(Err(ExecuteError::ServerDestroyed {
            cause: "server errored".to_string()
        }))
    );
    assert!(fake.process.written_commands().is_empty());
}

#[tokio::test]
async fn test_process_error_settles_requests_and_is_published() {
    let fake = fake_server("main");
    let (errors, _sub) = collect(&fake.server.signals().on_error);
    let future = fake.server.execute("quickinfo", args(), ExecuteOptions::default());

    fake.error("spawn EACCES");

    assert_eq!(
        future.await,
        Err(ExecuteError::ServerDestroyed {
            cause: "server errored".to_string()
        })
    );
    assert_eq!(*errors.lock().unwrap(), vec![ProcessError("spawn EACCES".to_string())]);
}

#[tokio::test]
async fn test_dispose_settles_requests_and_rejects_new_ones() {
    let fake = fake_server("main");
    let pending = fake.server.execute("quickinfo", args(), ExecuteOptions::default());

    fake.server.dispose();
    assert_eq!(
        pending.await,
        Err(ExecuteError::ServerDestroyed {
            cause: "server disposed".to_string()
        })
    );

    let after = fake.server.execute("definition", args(), ExecuteOptions::default());
    assert!(matches!(after.await, Err(ExecuteError::ServerDestroyed { .. })));
    fake.server.notify("open", args(), NotifyOptions::default());
    assert_eq!(fake.process.written_commands(), vec!["quickinfo"]);
}

#[tokio::test]
async fn test_write_failure_fails_the_request() {
    let fake = fake_server("main");
    fake.process.fail_writes();
    let future = fake.server.execute("quickinfo", args(), ExecuteOptions::default());

    let Err(ExecuteError::Write { seq, command, .. }) = future.await else {
        panic!("expected a write error");
    };
    assert_eq!(seq, 0);
    assert_eq!(command, "quickinfo");
}

#[tokio::test]
async fn test_notifications_do_not_wait_for_responses() {
    let fake = fake_server("main");
    fake.server.notify("open", json!({ "file": "/a.ts" }), NotifyOptions::default());
    fake.server.notify("change", json!({ "file": "/a.ts" }), NotifyOptions::default());
    let _info = fake.server.execute("quickinfo", args(), ExecuteOptions::default());

    assert_eq!(
        fake.process.written_commands(),
        vec!["open", "change", "quickinfo"]
    );
    assert_eq!(fake.server.pending_callback_count(), 1);
}

#[tokio::test]
async fn test_queueing_classes_while_a_request_is_in_flight() {
    let fake = fake_server("main");
    let first = fake.server.execute("quickinfo", args(), ExecuteOptions::default());
    let _low = fake.server.execute(
        "getCodeFixes",
        args(),
        ExecuteOptions::default().low_priority(),
    );
    let _normal = fake.server.execute("definition", args(), ExecuteOptions::default());
    fake.server.notify("change", args(), NotifyOptions::default());
    let _after_fence = fake.server.execute("references", args(), ExecuteOptions::default());

    fake.respond(0, "quickinfo", json!({}));
    first.await.unwrap();
    settle().await;

    // Normal jumps the low-priority request; nothing jumps the fence.
    assert_eq!(
        fake.process.written_commands(),
        vec!["quickinfo", "definition"]
    );
    fake.respond(2, "definition", json!([]));
    settle().await;
    assert_eq!(
        fake.process.written_commands(),
        vec!["quickinfo", "definition", "getCodeFixes"]
    );
    fake.respond(1, "getCodeFixes", json!([]));
    settle().await;
    assert_eq!(
        fake.process.written_commands(),
        vec!["quickinfo", "definition", "getCodeFixes", "change", "references"]
    );
}

#[tokio::test]
async fn test_reader_errors_are_published() {
    let fake = fake_server("main");
    let (errors, _sub) = collect(&fake.server.signals().on_reader_error);
    fake.events
        .send(ProcessEvent::ReaderError(WireError::MissingContentLength))
        .unwrap();
    settle().await;
    assert_eq!(*errors.lock().unwrap(), vec![WireError::MissingContentLength]);
}

#[tokio::test]
async fn test_kill_reaches_the_process() {
    let fake = fake_server("main");
    fake.server.kill();
    assert!(fake.process.was_killed());
}

#[test]
fn test_queueing_type_for_commands() {
    assert_eq!(queueing_type("open", true), QueueingType::Fence);
    assert_eq!(queueing_type("updateOpen", false), QueueingType::Fence);
    assert_eq!(queueing_type("completionInfo", true), QueueingType::LowPriority);
    assert_eq!(queueing_type("quickinfo", false), QueueingType::Normal);
}
