//! Minimal reactive values for cellwire.
//!
//! A [`Value`] holds a JSON payload, a dirty flag and a list of listeners.
//! Props are set from outside; computed values derive their payload from
//! dependencies and recompute lazily when read after a dependency changed.
//!
//! cellwire only needs three capabilities from a value: read the current
//! payload, ask whether it is dirty, and subscribe to changes.

pub mod error;
pub mod value;

pub use error::{Result, ValueError};
pub use value::{Payload, Subscription, Value, ValueRef};
