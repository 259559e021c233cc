use std::rc::Rc;

use cellwire_value::{Value, ValueRef};
use indexmap::IndexMap;

use crate::error::{Result, WorkerError};
use crate::protocol::Snapshot;

/// Named values in registration order.
///
/// Entries are added only through an [`Intake`], which admits exactly one
/// name and closes again when it is consumed or dropped.
#[derive(Debug, Default)]
pub struct ValueRegistry {
    entries: IndexMap<String, ValueRef>,
    intake_open: bool,
}

/// Temporarily open registry intake.
pub struct Intake<'a> {
    registry: &'a mut ValueRegistry,
}

impl Intake<'_> {
    /// Register `value` under `name` and close the intake.
    pub fn admit(self, name: String, value: ValueRef) -> Result<()> {
        if self.registry.entries.contains_key(&name) {
            return Err(WorkerError::DuplicateName(name));
        }
        self.registry.entries.insert(name, value);
        Ok(())
    }
}

impl Drop for Intake<'_> {
    fn drop(&mut self) {
        self.registry.intake_open = false;
    }
}

impl ValueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open intake for one registration.
    pub fn intake(&mut self) -> Intake<'_> {
        self.intake_open = true;
        Intake { registry: self }
    }

    /// Whether an intake is currently outstanding.
    pub fn is_intake_open(&self) -> bool {
        self.intake_open
    }

    pub fn register(&mut self, name: impl Into<String>, value: ValueRef) -> Result<()> {
        self.intake().admit(name.into(), value)
    }

    /// Register several values, stopping at the first duplicate.
    pub fn bulk_register<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, ValueRef)>,
        S: Into<String>,
    {
        values
            .into_iter()
            .try_for_each(|(name, value)| self.register(name, value))
    }

    pub fn get(&self, name: &str) -> Result<&ValueRef> {
        self.entries
            .get(name)
            .ok_or_else(|| WorkerError::UnknownName(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueRef)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Create a mirror for a value the peer just announced.
    pub fn receive_new(&mut self, name: String, snapshot: Snapshot) -> Result<ValueRef> {
        let mirror = match snapshot {
            Snapshot::Ready(payload) => Value::prop(name.clone(), payload),
            Snapshot::Dirty => Value::pending(name.clone()),
        };
        self.register(name, Rc::clone(&mirror))?;
        Ok(mirror)
    }

    /// Apply a peer's change report to the matching mirror.
    pub fn receive_set(&self, name: &str, snapshot: Snapshot) -> Result<()> {
        let mirror = self.get(name)?;
        match snapshot {
            Snapshot::Ready(payload) => mirror.set(payload)?,
            Snapshot::Dirty => mirror.invalidate(),
        }
        Ok(())
    }
}
