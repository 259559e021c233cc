use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cellwire_value::ValueRef;

use crate::connection::Connection;
use crate::error::{Result, WorkerError};
use crate::protocol::Invocation;
use crate::registry::ValueRegistry;

/// Builds a value from the worker's mirrors of the master's inputs.
pub type Factory = dyn Fn(&ValueRegistry, &Invocation) -> Result<ValueRef> + Send + Sync;

/// Runs on the worker with full access to its connection.
pub type Job = dyn Fn(&mut Connection, &Invocation) -> Result<()> + Send + Sync;

/// The named factories and jobs a worker can run.
///
/// The table is built before the worker is spawned and inherited by it, so
/// messages only ever carry operation names and arguments.
#[derive(Clone, Default)]
pub struct Operations {
    factories: BTreeMap<String, Arc<Factory>>,
    jobs: BTreeMap<String, Arc<Job>>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ValueRegistry, &Invocation) -> Result<ValueRef> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn with_job<F>(mut self, name: impl Into<String>, job: F) -> Self
    where
        F: Fn(&mut Connection, &Invocation) -> Result<()> + Send + Sync + 'static,
    {
        self.jobs.insert(name.into(), Arc::new(job));
        self
    }

    pub fn factory(&self, name: &str) -> Result<Arc<Factory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownOperation {
                kind: "factory",
                name: name.to_string(),
            })
    }

    pub fn job(&self, name: &str) -> Result<Arc<Job>> {
        self.jobs
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownOperation {
                kind: "job",
                name: name.to_string(),
            })
    }

    pub fn factory_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }
}

impl fmt::Debug for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operations")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use cellwire_value::Value;
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_by_name() {
        let operations = Operations::new()
            .with_factory("constant", |_, call| {
                Ok(Value::prop("constant", call.arg(0).cloned().unwrap_or_default()))
            })
            .with_job("noop", |_, _| Ok(()));

        let build = operations.factory("constant").unwrap();
        let value = build(&ValueRegistry::new(), &Invocation::new("constant").with_arg(4)).unwrap();
        assert_eq!(value.peek(), Some(json!(4)));

        assert!(operations.job("noop").is_ok());
        assert_eq!(operations.factory_names().collect::<Vec<_>>(), ["constant"]);
        assert_eq!(operations.job_names().collect::<Vec<_>>(), ["noop"]);
    }

    #[test]
    fn unknown_names_are_errors() {
        let operations = Operations::new();
        assert!(matches!(
            operations.factory("double"),
            Err(WorkerError::UnknownOperation { kind: "factory", .. })
        ));
        assert!(matches!(
            operations.job("tick"),
            Err(WorkerError::UnknownOperation { kind: "job", .. })
        ));
    }

    #[test]
    fn debug_lists_names() {
        let operations = Operations::new().with_job("tick", |_, _| Ok(()));
        assert_eq!(
            format!("{operations:?}"),
            r#"Operations { factories: [], jobs: ["tick"] }"#
        );
    }
}
