//! Derive a value in a forked worker and follow it from the master.
//!
//! Run with:
//!   cargo run --example doubling

use std::rc::Rc;
use std::time::Duration;

use cellwire::{Invocation, Operations, Value, Worker, WorkerConfig};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let operations = Operations::new().with_factory("double", |inputs, call| {
        let n = Rc::clone(inputs.get(call.str_arg(0)?)?);
        let double = Value::computed("double", &[n], |args| {
            Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
        });
        double.current()?;
        Ok(double)
    });

    let config = WorkerConfig {
        debug: true,
        ..WorkerConfig::default()
    };

    Worker::session(operations, config, |worker| {
        eprintln!("Worker running as pid {}", worker.pid());

        let n = Value::prop("n", json!(5));
        worker.add_input("n", &n)?;
        let double = worker.create("double", Invocation::new("double").with_arg("n"))?;
        eprintln!("n = 5, double = {}", double.current()?);

        // The worker reports the mirror dirty first, then the pulled payload.
        n.set(json!(7))?;
        worker.pull("double")?;
        while double.peek() != Some(json!(14)) {
            worker.process(Some(Duration::from_millis(100)), 0)?;
        }
        eprintln!("n = 7, double = {}", double.current()?);
        Ok(())
    })?;

    Ok(())
}
