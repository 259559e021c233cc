use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::{Result, ValueError};

/// The data a value carries.
pub type Payload = serde_json::Value;

/// Shared handle to a value.
pub type ValueRef = Rc<Value>;

type ComputeFn = Box<dyn Fn(&[Payload]) -> Result<Payload>>;

struct Listener {
    callback: Box<dyn Fn()>,
}

/// Keeps a change listener registered.
///
/// Values only hold weak references to their listeners, so notifications stop
/// as soon as the subscription is dropped.
#[must_use = "dropping a subscription stops change notifications"]
pub struct Subscription {
    _listener: Rc<Listener>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

enum Kind {
    Prop,
    Computed {
        dependencies: Vec<ValueRef>,
        compute: ComputeFn,
        _upstream: Vec<Subscription>,
    },
}

/// A named reactive cell.
///
/// The cached payload is `None` while the value is dirty. A dirty prop is
/// pending (nobody has provided a payload yet); a dirty computed value is
/// recomputed on the next [`Value::current`] call.
pub struct Value {
    name: String,
    cached: RefCell<Option<Payload>>,
    kind: Kind,
    listeners: RefCell<Vec<Weak<Listener>>>,
}

impl Value {
    /// A settable value with an initial payload.
    pub fn prop(name: impl Into<String>, payload: Payload) -> ValueRef {
        Rc::new(Self::new(name.into(), Some(payload), Kind::Prop))
    }

    /// A settable value that has no payload yet.
    pub fn pending(name: impl Into<String>) -> ValueRef {
        Rc::new(Self::new(name.into(), None, Kind::Prop))
    }

    /// A value derived from `dependencies`.
    ///
    /// Starts dirty; `compute` runs on the first read and again on the first
    /// read after any dependency changed. It receives the dependencies'
    /// current payloads in order.
    pub fn computed<F>(name: impl Into<String>, dependencies: &[ValueRef], compute: F) -> ValueRef
    where
        F: Fn(&[Payload]) -> Result<Payload> + 'static,
    {
        let name = name.into();
        Rc::new_cyclic(|this: &Weak<Value>| {
            let upstream = dependencies
                .iter()
                .map(|dependency| {
                    let this = this.clone();
                    dependency.subscribe(move || {
                        if let Some(this) = this.upgrade() {
                            this.invalidate();
                        }
                    })
                })
                .collect();

            Self::new(
                name,
                None,
                Kind::Computed {
                    dependencies: dependencies.to_vec(),
                    compute: Box::new(compute),
                    _upstream: upstream,
                },
            )
        })
    }

    fn new(name: String, cached: Option<Payload>, kind: Kind) -> Self {
        Self {
            name,
            cached: RefCell::new(cached),
            kind,
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dirty(&self) -> bool {
        self.cached.borrow().is_none()
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.kind, Kind::Computed { .. })
    }

    /// The cached payload, without recomputing.
    pub fn peek(&self) -> Option<Payload> {
        self.cached.borrow().clone()
    }

    /// The up-to-date payload, recomputing if needed.
    pub fn current(&self) -> Result<Payload> {
        if let Some(payload) = self.peek() {
            return Ok(payload);
        }

        match &self.kind {
            Kind::Prop => Err(ValueError::Pending(self.name.clone())),
            Kind::Computed {
                dependencies,
                compute,
                ..
            } => {
                let inputs = dependencies
                    .iter()
                    .map(|dependency| dependency.current())
                    .collect::<Result<Vec<_>>>()?;
                let payload = compute(&inputs)?;
                trace!(name = %self.name, "recomputed value");
                self.store(payload.clone());
                Ok(payload)
            }
        }
    }

    /// Assign a prop. Assigning an equal payload does not notify listeners.
    pub fn set(&self, payload: Payload) -> Result<()> {
        if self.is_computed() {
            return Err(ValueError::NotSettable(self.name.clone()));
        }
        if self.cached.borrow().as_ref() == Some(&payload) {
            return Ok(());
        }
        self.store(payload);
        Ok(())
    }

    /// Drop the cached payload and notify listeners, unless already dirty.
    pub fn invalidate(&self) {
        let was_clean = self.cached.borrow_mut().take().is_some();
        if was_clean {
            trace!(name = %self.name, "value invalidated");
            self.signal();
        }
    }

    /// Call `callback` after every change of this value.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + 'static,
    {
        let listener = Rc::new(Listener {
            callback: Box::new(callback),
        });
        self.listeners.borrow_mut().push(Rc::downgrade(&listener));
        Subscription {
            _listener: listener,
        }
    }

    /// Number of listeners whose subscription is still alive.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    fn store(&self, payload: Payload) {
        *self.cached.borrow_mut() = Some(payload);
        self.signal();
    }

    fn signal(&self) {
        // Collect first: listeners may read this value or subscribe to it.
        let live: Vec<Rc<Listener>> = {
            let mut listeners = self.listeners.borrow_mut();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            (listener.callback)();
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("name", &self.name)
            .field("computed", &self.is_computed())
            .field("cached", &*self.cached.borrow())
            .finish()
    }
}
