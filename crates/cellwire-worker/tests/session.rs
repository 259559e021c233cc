#![cfg(unix)]

use std::io::Read;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use cellwire_transport::{ChildProcess, ExitStatus, IpcStream, PollRead};
use cellwire_value::{Payload, Value, ValueRef};
use cellwire_worker::{
    DrainOutcome, Invocation, Operations, ValueRegistry, Worker, WorkerConfig, WorkerError,
};
use serde_json::json;

fn operations() -> Operations {
    Operations::new()
        .with_factory("double", |inputs, call| {
            let source = Rc::clone(inputs.get(call.str_arg(0)?)?);
            let double = Value::computed("double", &[source], |args| {
                let n = args[0].as_i64().unwrap_or_default();
                Ok(json!(n * 2))
            });
            double.current()?;
            Ok(double)
        })
        .with_factory("sum", |inputs, call| {
            let sources = call
                .args
                .iter()
                .map(|name| {
                    let name = name.as_str().unwrap_or_default();
                    inputs.get(name).map(Rc::clone)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let sum = Value::computed("sum", &sources, |args| {
                Ok(json!(args.iter().filter_map(Payload::as_i64).sum::<i64>()))
            });
            Ok(sum)
        })
        .with_job("ticker", |connection, call| {
            let count = call.arg(0).and_then(Payload::as_u64).unwrap_or(1);
            let ticks = Value::prop("ticks", json!(0));
            connection.publish_new("ticks", Rc::clone(&ticks))?;
            for tick in 1..=count {
                ticks.set(json!(tick))?;
            }
            Ok(())
        })
        .with_job("hang", |_, _| {
            std::thread::sleep(Duration::from_secs(30));
            Ok(())
        })
        .with_job("fail", |_, call| {
            Err(WorkerError::operation(&call.op, "failed on request"))
        })
}

fn config() -> WorkerConfig {
    WorkerConfig {
        quit_timeout: Duration::from_millis(300),
        poll_slice: Duration::from_millis(100),
        ..WorkerConfig::default()
    }
}

fn wait_for(worker: &mut Worker, value: &ValueRef, expected: Payload) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while value.peek().as_ref() != Some(&expected) {
        assert!(
            Instant::now() < deadline,
            "{} never became {expected}",
            value.name()
        );
        worker
            .process(Some(Duration::from_millis(50)), 0)
            .expect("worker should stay healthy");
    }
}

#[test]
fn created_value_follows_its_input() {
    let result = Worker::session(operations(), config(), |worker| {
        let n = Value::prop("n", json!(5));
        worker.add_input("n", &n)?;

        let double = worker.create("double", Invocation::new("double").with_arg("n"))?;
        assert_eq!(double.current()?, json!(10));

        n.set(json!(7))?;
        worker.pull("double")?;
        wait_for(worker, &double, json!(14));
        Ok(double.peek())
    });

    assert_eq!(result.expect("session should succeed"), Some(json!(14)));
}

#[test]
fn dirty_output_arrives_pending_and_pull_fills_it() {
    Worker::session(operations(), config(), |worker| {
        let mut inputs = ValueRegistry::new();
        inputs.register("a", Value::prop("a", json!(2)))?;
        inputs.register("b", Value::prop("b", json!(3)))?;
        worker.add_inputs(&inputs)?;
        assert_eq!(worker.inputs().names().collect::<Vec<_>>(), ["a", "b"]);

        let sum = worker.create("sum", Invocation::new("sum").with_arg("a").with_arg("b"))?;
        assert!(sum.is_dirty(), "unpulled computed value has no payload");
        assert!(sum.current().is_err());

        worker.pull("sum")?;
        wait_for(worker, &sum, json!(5));
        Ok(())
    })
    .expect("session should succeed");
}

#[test]
fn job_reports_through_published_values() {
    Worker::session(operations(), config(), |worker| {
        worker.run(Invocation::new("ticker").with_arg(3))?;
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.outputs().contains("ticks") {
            assert!(Instant::now() < deadline, "ticks never announced");
            worker.process(Some(Duration::from_millis(50)), 1)?;
        }
        let ticks = Rc::clone(worker.outputs().get("ticks")?);
        wait_for(worker, &ticks, json!(3));
        Ok(())
    })
    .expect("session should succeed");
}

#[test]
fn duplicate_output_name_is_rejected_locally() {
    Worker::session(operations(), config(), |worker| {
        let n = Value::prop("n", json!(1));
        worker.add_input("n", &n)?;
        worker.create("double", Invocation::new("double").with_arg("n"))?;

        let err = worker
            .create("double", Invocation::new("double").with_arg("n"))
            .unwrap_err();
        assert!(matches!(err, WorkerError::DuplicateName(name) if name == "double"));
        Ok(())
    })
    .expect("session should succeed");
}

fn kill_after(pid: i32, delay: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        // SAFETY: signalling our own child.
        let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
        assert_eq!(rc, 0);
    })
}

#[test]
fn killed_worker_is_detected_promptly() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");

    // SAFETY: signalling our own child.
    let rc = unsafe { libc::kill(worker.pid(), libc::SIGKILL) };
    assert_eq!(rc, 0);

    let start = Instant::now();
    let err = worker
        .process(Some(Duration::from_secs(5)), 0)
        .unwrap_err();
    assert!(matches!(err, WorkerError::WorkerCrashed));
    assert!(start.elapsed() < Duration::from_millis(500));
    assert!(worker.is_crashed());

    assert!(matches!(
        worker.pull("anything"),
        Err(WorkerError::WorkerCrashed)
    ));

    worker.shutdown().expect("shutdown after crash should succeed");
    assert_eq!(
        worker.exit_status(),
        Some(ExitStatus::Signaled(libc::SIGKILL))
    );
}

#[test]
fn worker_killed_with_unread_requests_is_a_crash() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    worker.run(Invocation::new("hang")).expect("run should send");
    // Left unread in the worker's socket, so its death resets the channel.
    worker.pull("anything").expect("pull should send");
    let killer = kill_after(worker.pid(), Duration::from_millis(150));

    let start = Instant::now();
    let err = worker
        .process(Some(Duration::from_secs(5)), 0)
        .unwrap_err();
    killer.join().unwrap();
    assert!(matches!(err, WorkerError::WorkerCrashed), "{err:?}");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(worker.is_crashed());

    worker.shutdown().expect("shutdown after crash should succeed");
    assert_eq!(
        worker.exit_status(),
        Some(ExitStatus::Signaled(libc::SIGKILL))
    );
}

#[test]
fn worker_killed_during_shutdown_is_reclaimed() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    worker.run(Invocation::new("hang")).expect("run should send");
    let killer = kill_after(worker.pid(), Duration::from_millis(100));

    worker.shutdown().expect("shutdown should succeed");
    killer.join().unwrap();
    assert!(worker.is_closed());
    assert_eq!(
        worker.exit_status(),
        Some(ExitStatus::Signaled(libc::SIGKILL))
    );
}

#[test]
fn shutdown_after_worker_exited_on_its_own() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    worker.run(Invocation::new("fail")).expect("run should send");
    thread::sleep(Duration::from_millis(300));

    worker.shutdown().expect("shutdown should succeed");
    assert_eq!(worker.exit_status(), Some(ExitStatus::Exited(1)));
}

#[test]
fn worker_exits_when_its_master_disappears() {
    // The worker inherits `witness`; its end-of-stream means the worker is gone.
    let (mut watch, witness) = IpcStream::pair().expect("pair should open");
    let mut master = ChildProcess::fork(move || {
        let _witness = witness;
        match Worker::spawn(operations(), config()) {
            Ok(worker) => {
                std::mem::forget(worker);
                0
            }
            Err(_) => 1,
        }
    })
    .expect("fork should succeed");
    assert_eq!(
        master.join(Some(Duration::from_secs(5))).expect("join should succeed"),
        Some(ExitStatus::Exited(0))
    );

    assert!(watch
        .poll_read_ready(Some(Duration::from_secs(10)))
        .expect("poll should succeed"));
    let mut buf = [0u8; 1];
    assert_eq!(watch.read(&mut buf).expect("read should succeed"), 0);
}

#[test]
fn failing_job_exits_worker_and_shutdown_still_succeeds() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    worker.run(Invocation::new("fail")).expect("run should send");

    let err = worker
        .process(Some(Duration::from_secs(5)), 0)
        .unwrap_err();
    assert!(matches!(err, WorkerError::WorkerCrashed));

    worker.shutdown().expect("shutdown should succeed");
    assert_eq!(worker.exit_status(), Some(ExitStatus::Exited(1)));
}

#[test]
fn unresponsive_worker_is_killed_within_bounds() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    worker.run(Invocation::new("hang")).expect("run should send");

    let start = Instant::now();
    worker.shutdown().expect("shutdown should succeed");
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(300), "graceful phase waited");
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    assert_eq!(
        worker.exit_status(),
        Some(ExitStatus::Signaled(libc::SIGKILL))
    );
}

#[test]
fn graceful_shutdown_exits_cleanly_and_closes_session() {
    let mut worker = Worker::spawn(operations(), config()).expect("spawn should succeed");
    assert_eq!(
        worker.process(Some(Duration::ZERO), 0).unwrap(),
        DrainOutcome::TimedOut
    );

    worker.shutdown().expect("shutdown should succeed");
    assert_eq!(worker.exit_status(), Some(ExitStatus::Exited(0)));
    assert!(worker.is_closed());
    assert!(!worker.is_crashed());

    worker.shutdown().expect("second shutdown is a no-op");
    assert!(matches!(
        worker.process(Some(Duration::ZERO), 0),
        Err(WorkerError::SessionClosed)
    ));
    let n = Value::prop("n", json!(1));
    assert!(matches!(
        worker.add_input("n", &n),
        Err(WorkerError::SessionClosed)
    ));
}

#[test]
fn session_returns_body_error_after_shutdown() {
    let result: Result<(), WorkerError> = Worker::session(operations(), config(), |worker| {
        worker.create("x", Invocation::new("double").with_arg("missing"))?;
        Ok(())
    });
    assert!(matches!(result, Err(WorkerError::WorkerCrashed)));
}
