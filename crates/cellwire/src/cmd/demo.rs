use std::process;
use std::rc::Rc;
use std::time::{Duration, Instant};

use cellwire_value::{Payload, Value, ValueError, ValueRef};
use cellwire_worker::{Invocation, Operations, Worker, WorkerConfig};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::cmd::{parse_duration, DemoArgs};
use crate::exit::{worker_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{payload_text, print_json, print_table, OutputFormat};

const DRAIN_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Serialize)]
struct DemoStep {
    step: &'static str,
    input: i64,
    expected: i64,
    output: Option<Payload>,
}

impl DemoStep {
    fn observe(step: &'static str, input: i64, expected: i64, value: &ValueRef) -> Self {
        Self {
            step,
            input,
            expected,
            output: value.peek(),
        }
    }

    fn delivered(&self) -> bool {
        self.output == Some(json!(self.expected))
    }
}

#[derive(Debug, Serialize)]
struct DemoOutput {
    master_pid: u32,
    worker_pid: i32,
    steps: Vec<DemoStep>,
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let first = doubled(args.input)?;
    let second = doubled(args.update)?;
    let timeout = parse_duration(&args.timeout)?;
    let config = WorkerConfig {
        quit_timeout: parse_duration(&args.quit_timeout)?,
        poll_slice: parse_duration(&args.poll_slice)?,
        debug: args.trace_messages,
        ..WorkerConfig::default()
    };

    let output = Worker::session(operations(), config, |worker| {
        let n = Value::prop("n", json!(args.input));
        worker.add_input("n", &n)?;

        let double = worker.create("double", Invocation::new("double").with_arg("n"))?;
        info!(worker_pid = worker.pid(), output = ?double.peek(), "created double");
        let mut steps = vec![DemoStep::observe("create", args.input, first, &double)];

        n.set(json!(args.update))?;
        worker.pull("double")?;
        let expected = json!(second);
        let deadline = Instant::now() + timeout;
        while double.peek().as_ref() != Some(&expected) && Instant::now() < deadline {
            worker.process(Some(DRAIN_WINDOW), 0)?;
        }
        info!(output = ?double.peek(), "pulled double");
        steps.push(DemoStep::observe("pull", args.update, second, &double));

        Ok(DemoOutput {
            master_pid: process::id(),
            worker_pid: worker.pid(),
            steps,
        })
    })
    .map_err(|err| worker_error("demo failed", err))?;

    print_output(&output, format);

    if let Some(step) = output.steps.iter().find(|step| !step.delivered()) {
        return Err(CliError::new(
            TIMEOUT,
            format!(
                "worker did not deliver {} for step '{}' within {}",
                step.expected, step.step, args.timeout
            ),
        ));
    }
    Ok(SUCCESS)
}

fn doubled(input: i64) -> CliResult<i64> {
    input
        .checked_mul(2)
        .ok_or_else(|| CliError::new(USAGE, format!("{input} cannot be doubled without overflow")))
}

fn operations() -> Operations {
    Operations::new().with_factory("double", |inputs, call| {
        let source = Rc::clone(inputs.get(call.str_arg(0)?)?);
        let double = Value::computed("double", &[source], |args| {
            args[0]
                .as_i64()
                .and_then(|n| n.checked_mul(2))
                .map(|n| json!(n))
                .ok_or_else(|| ValueError::compute("double", "input is not a doublable integer"))
        });
        double.current()?;
        Ok(double)
    })
}

fn print_output(output: &DemoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table => print_table(
            &["STEP", "INPUT", "EXPECTED", "OUTPUT"],
            output
                .steps
                .iter()
                .map(|step| {
                    vec![
                        step.step.to_string(),
                        step.input.to_string(),
                        step.expected.to_string(),
                        payload_text(step.output.as_ref()),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            println!(
                "master={} worker={}",
                output.master_pid, output.worker_pid
            );
            for step in &output.steps {
                println!(
                    "{:<6} n={} double={}",
                    step.step,
                    step.input,
                    payload_text(step.output.as_ref())
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubled_rejects_overflow() {
        assert_eq!(doubled(21).unwrap(), 42);
        assert_eq!(doubled(i64::MAX).unwrap_err().code, USAGE);
    }

    #[test]
    fn step_is_delivered_only_with_expected_payload() {
        let value = Value::prop("double", json!(14));
        assert!(DemoStep::observe("pull", 7, 14, &value).delivered());
        assert!(!DemoStep::observe("pull", 7, 16, &value).delivered());

        let pending = Value::pending("double");
        assert!(!DemoStep::observe("pull", 7, 14, &pending).delivered());
    }

    #[test]
    fn factory_doubles_the_named_input() {
        let mut inputs = cellwire_worker::ValueRegistry::new();
        let n = Value::prop("n", json!(4));
        inputs.register("n", Rc::clone(&n)).unwrap();

        let build = operations().factory("double").unwrap();
        let double = build(&inputs, &Invocation::new("double").with_arg("n")).unwrap();
        assert_eq!(double.peek(), Some(json!(8)));

        n.set(json!(9)).unwrap();
        assert!(double.is_dirty());
        assert_eq!(double.current().unwrap(), json!(18));
    }
}
