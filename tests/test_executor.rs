mod helpers;

use std::cell::RefCell;
use std::rc::Rc;

use helpers::scripted::{Script, ScriptedEngine};
use httpcall::error::Error;
use httpcall::executor::{BufferedExecutor, ExecutorEvent, ExecutorEventKind};
use httpcall::http::request::{Method, RequestMessage};
use httpcall::transport::TransferCode;
use httpcall::{Call, CallState};

fn call(engine: &ScriptedEngine, path: &str) -> Call<ScriptedEngine> {
    Call::with_engine(
        RequestMessage::new(Method::GET, format!("http://example.com{}", path)),
        engine.clone(),
    )
}

#[test]
fn test_flushes_when_buffer_fills() {
    let engine = ScriptedEngine::echo(31);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 3);

    assert!(executor.submit(call(&engine, "/1")).unwrap().is_empty());
    assert!(executor.submit(call(&engine, "/2")).unwrap().is_empty());
    assert_eq!(executor.pending_count(), 2);

    let executed = executor.submit(call(&engine, "/3")).unwrap();
    assert_eq!(executed.len(), 3);
    assert_eq!(executor.pending_count(), 0);
    assert_eq!(executor.total_executed_call_count(), 3);

    for (i, call) in executed.iter().enumerate() {
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(
            call.response().body_text(),
            Some(format!("response for http://example.com/{}", i + 1))
        );
    }

    assert!(executor.submit(call(&engine, "/4")).unwrap().is_empty());
    assert!(executor.submit(call(&engine, "/5")).unwrap().is_empty());
    assert_eq!(executor.total_executed_call_count(), 3);
    assert_eq!(executor.submit(call(&engine, "/6")).unwrap().len(), 3);
    assert_eq!(executor.total_executed_call_count(), 6);
}

#[test]
fn test_invoke_all_on_empty_queue_is_a_no_op() {
    let engine = ScriptedEngine::echo(1);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 3);
    let flushes = Rc::new(RefCell::new(0));
    let counter = flushes.clone();
    executor.subscribe(ExecutorEventKind::BeforeFlush, move |_| {
        *counter.borrow_mut() += 1;
    });

    assert!(executor.invoke_all().unwrap().is_empty());
    assert_eq!(*flushes.borrow(), 0);
    assert_eq!(engine.stats.added.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn test_invoke_all_flushes_partial_buffer() {
    let engine = ScriptedEngine::echo(2);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 10);
    executor.submit(call(&engine, "/a")).unwrap();
    executor.submit(call(&engine, "/b")).unwrap();

    let executed = executor.invoke_all().unwrap();
    assert_eq!(executed.len(), 2);
    assert_eq!(executor.pending_count(), 0);
}

#[test]
fn test_events_fire_in_order() {
    let engine = ScriptedEngine::echo(13);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 2);
    let log = Rc::new(RefCell::new(Vec::new()));

    for kind in [
        ExecutorEventKind::BeforeFlush,
        ExecutorEventKind::CallCompleted,
        ExecutorEventKind::AfterFlush,
    ] {
        let log = log.clone();
        executor.subscribe(kind, move |event| {
            let entry = match event {
                ExecutorEvent::BeforeFlush { pending } => format!("before:{}", pending),
                ExecutorEvent::CallCompleted { index, call } => {
                    format!("call:{}:{}", index, call.request().uri())
                }
                ExecutorEvent::AfterFlush { executed, .. } => format!("after:{}", executed),
            };
            log.borrow_mut().push(entry);
        });
    }

    executor.submit(call(&engine, "/x")).unwrap();
    executor.submit(call(&engine, "/y")).unwrap();

    assert_eq!(
        *log.borrow(),
        vec![
            "before:2",
            "call:0:http://example.com/x",
            "call:1:http://example.com/y",
            "after:2",
        ]
    );
}

#[test]
fn test_has_listener() {
    let mut executor = BufferedExecutor::with_engine(ScriptedEngine::echo(1), 3);
    assert!(!executor.has_listener(ExecutorEventKind::AfterFlush));

    executor.subscribe(ExecutorEventKind::AfterFlush, |_| {});
    assert!(executor.has_listener(ExecutorEventKind::AfterFlush));
    assert!(!executor.has_listener(ExecutorEventKind::BeforeFlush));
}

#[test]
fn test_mean_throughput_is_zero_before_any_flush() {
    let executor = BufferedExecutor::with_engine(ScriptedEngine::echo(1), 3);

    assert_eq!(executor.total_call_execution_seconds(), 0.0);
    assert_eq!(executor.mean_throughput(), 0.0);
}

#[test]
fn test_mean_throughput_after_flush() {
    let engine = ScriptedEngine::echo(4);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 2);
    executor.submit(call(&engine, "/1")).unwrap();
    executor.submit(call(&engine, "/2")).unwrap();

    let seconds = executor.total_call_execution_seconds();
    if seconds > 0.0 {
        assert!((executor.mean_throughput() - 2.0 / seconds).abs() < 1e-6);
    } else {
        assert_eq!(executor.mean_throughput(), 0.0);
    }
}

#[test]
fn test_submitted_calls_share_stats() {
    let engine = ScriptedEngine::echo(6);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 2);
    executor.submit(call(&engine, "/1")).unwrap();
    let executed = executor.submit(call(&engine, "/2")).unwrap();

    let stats = executor.call_stats();
    assert_eq!(stats.calls_executed(), 2);
    for call in &executed {
        assert!(std::sync::Arc::ptr_eq(call.stats().unwrap(), stats));
    }
}

#[test]
fn test_failed_calls_are_still_returned() {
    let engine = ScriptedEngine::new(8, |transfer| {
        if transfer.url.ends_with("/bad") {
            Script::refused()
        } else {
            Script::ok("ok")
        }
    });
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 2);
    executor.submit(call(&engine, "/bad")).unwrap();
    let executed = executor.submit(call(&engine, "/good")).unwrap();

    assert!(executed[0].has_error());
    assert!(!executed[1].has_error());
    assert_eq!(executor.total_executed_call_count(), 2);
}

#[test]
fn test_submit_rejects_executed_call() {
    let engine = ScriptedEngine::echo(1);
    let mut done = call(&engine, "/done");
    done.exec().unwrap();

    let mut executor = BufferedExecutor::with_engine(engine, 3);
    assert!(matches!(
        executor.submit(done),
        Err(Error::UnsupportedRequestObject(_))
    ));
    assert_eq!(executor.pending_count(), 0);
}

#[test]
fn test_zero_buffer_size_flushes_every_submit() {
    let engine = ScriptedEngine::echo(1);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 0);

    assert_eq!(executor.buffer_size(), 1);
    assert_eq!(executor.submit(call(&engine, "/1")).unwrap().len(), 1);
}

#[test]
fn test_multiplexer_failure_keeps_the_batch() {
    let engine = ScriptedEngine::echo(8).failing_after(2);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 3);
    let after = Rc::new(RefCell::new(Vec::new()));
    let seen = after.clone();
    executor.subscribe(ExecutorEventKind::AfterFlush, move |event| {
        if let ExecutorEvent::AfterFlush {
            executed,
            error_code,
            ..
        } = event
        {
            seen.borrow_mut().push((*executed, *error_code));
        }
    });

    executor.submit(call(&engine, "/1")).unwrap();
    executor.submit(call(&engine, "/2")).unwrap();
    let executed = executor.invoke_all().unwrap();

    assert_eq!(executed.len(), 2);
    for call in &executed {
        assert_eq!(call.state(), CallState::Completed);
        assert_eq!(call.error_code(), TransferCode::Aborted.code());
    }
    assert_eq!(executor.pending_count(), 0);
    assert_eq!(executor.total_executed_call_count(), 2);
    assert_eq!(executor.call_stats().calls_executed(), 2);
    assert_eq!(executor.last_error_code(), 9);
    assert_eq!(*after.borrow(), vec![(2, 9)]);
}

#[test]
fn test_unstartable_batch_stays_queued() {
    let engine = ScriptedEngine::echo(2);
    let mut executor = BufferedExecutor::with_engine(engine.clone(), 5);

    let mut upload = RequestMessage::new(Method::POST, "http://example.com/upload");
    upload.set_file("doc", Some("/definitely/missing/upload.bin".into()));
    executor
        .submit(Call::with_engine(upload, engine.clone()))
        .unwrap();
    executor.submit(call(&engine, "/ok")).unwrap();

    assert!(executor.invoke_all().is_err());
    assert_eq!(executor.pending_count(), 2);
    assert_eq!(executor.total_executed_call_count(), 0);
    assert_eq!(engine.stats.added.load(std::sync::atomic::Ordering::SeqCst), 0);

    let drained = executor.drain_pending();
    assert_eq!(drained.len(), 2);
    assert!(drained.iter().all(|c| c.state() == CallState::Created));
    assert_eq!(executor.pending_count(), 0);
}
