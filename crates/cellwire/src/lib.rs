//! Reactive values shared between a master process and a forked worker.
//!
//! The master publishes input values, asks the worker to build derived values
//! from them, and observes those derived values through local mirrors that
//! stay in sync as either side changes.
//!
//! # Crate Structure
//!
//! - [`transport`]: socket pair and forked child process
//! - [`frame`]: length-prefixed frames grouped into lanes
//! - [`value`]: single-threaded reactive values
//! - [`worker`]: the message protocol, master handle and worker driver
//!
//! ```no_run
//! use std::rc::Rc;
//!
//! use cellwire::{Invocation, Operations, Value, Worker, WorkerConfig};
//! use serde_json::json;
//!
//! let operations = Operations::new().with_factory("double", |inputs, call| {
//!     let n = Rc::clone(inputs.get(call.str_arg(0)?)?);
//!     let double = Value::computed("double", &[n], |args| {
//!         Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
//!     });
//!     double.current()?;
//!     Ok(double)
//! });
//!
//! Worker::session(operations, WorkerConfig::default(), |worker| {
//!     let n = Value::prop("n", json!(5));
//!     worker.add_input("n", &n)?;
//!     let double = worker.create("double", Invocation::new("double").with_arg("n"))?;
//!     assert_eq!(double.current()?, json!(10));
//!     Ok(())
//! })?;
//! # Ok::<(), cellwire::WorkerError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use cellwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use cellwire_frame::*;
}

/// Re-export value types.
pub mod value {
    pub use cellwire_value::*;
}

/// Re-export worker types.
pub mod worker {
    pub use cellwire_worker::*;
}

pub use cellwire_value::{Payload, Value, ValueRef};
pub use cellwire_worker::{
    worker_main, DrainOutcome, Invocation, Operations, ValueRegistry, Worker, WorkerConfig,
    WorkerError,
};
