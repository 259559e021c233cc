use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::ErrorKind;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cellwire_frame::{FrameError, FrameReader, FrameWriter};
use cellwire_transport::IpcStream;
use cellwire_value::{Subscription, ValueRef};
use tracing::{debug, warn};

use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::operations::Operations;
use crate::protocol::{self, Message, Side, Snapshot};
use crate::registry::ValueRegistry;

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The requested number of messages was handled.
    Completed,
    /// No message arrived within the wait window.
    TimedOut,
    /// The peer asked this worker to quit; the acknowledgement has been sent.
    QuitRequested,
    /// The worker acknowledged a quit request.
    AckReceived,
}

/// Sending half of a connection, shared with change listeners.
///
/// Listeners cannot return errors, so a failed push is latched here and
/// reported by the next connection operation. Once closed, nothing more
/// is written.
#[derive(Clone)]
struct Outbox {
    side: Side,
    debug: bool,
    writer: Rc<RefCell<FrameWriter<IpcStream>>>,
    fault: Rc<RefCell<Option<String>>>,
    closed: Rc<Cell<bool>>,
}

impl Outbox {
    fn send(&self, message: &Message) -> Result<()> {
        if self.closed.get() {
            return Err(WorkerError::QuitRequested);
        }
        let frame = protocol::encode(message)?;
        if self.debug {
            debug!(side = %self.side, tag = %message.tag(), ?message, "send");
        }
        self.writer.borrow_mut().write_frame(&frame)?;
        Ok(())
    }

    fn push(&self, message: &Message) {
        if self.closed.get() {
            return;
        }
        if let Err(err) = self.send(message) {
            warn!(side = %self.side, error = %err, "failed to push change notification");
            let mut fault = self.fault.borrow_mut();
            if fault.is_none() {
                *fault = Some(err.to_string());
            }
        }
    }

    fn check(&self) -> Result<()> {
        match self.fault.borrow().as_ref() {
            Some(reason) => Err(WorkerError::PushFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

/// One end of a master/worker channel.
///
/// Holds the mirrors of everything the peer published, everything this end
/// published, and the subscriptions that forward local changes to the peer.
pub struct Connection {
    side: Side,
    reader: FrameReader<IpcStream>,
    outbox: Outbox,
    mirrors: ValueRegistry,
    published: ValueRegistry,
    subscriptions: Vec<Subscription>,
    operations: Arc<Operations>,
    quit: bool,
    jobs_running: usize,
    debug: bool,
}

impl Connection {
    pub fn new(
        side: Side,
        stream: IpcStream,
        operations: Arc<Operations>,
        config: &WorkerConfig,
    ) -> Result<Self> {
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, config.frame.clone())?;
        let writer = FrameWriter::with_config_ipc(stream, config.frame.clone())?;
        Ok(Self {
            side,
            reader,
            outbox: Outbox {
                side,
                debug: config.debug,
                writer: Rc::new(RefCell::new(writer)),
                fault: Rc::new(RefCell::new(None)),
                closed: Rc::new(Cell::new(false)),
            },
            mirrors: ValueRegistry::new(),
            published: ValueRegistry::new(),
            subscriptions: Vec::new(),
            operations,
            quit: false,
            jobs_running: 0,
            debug: config.debug,
        })
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Mirrors of the values the peer published.
    pub fn mirrors(&self) -> &ValueRegistry {
        &self.mirrors
    }

    /// Values this end published to the peer.
    pub fn published(&self) -> &ValueRegistry {
        &self.published
    }

    pub fn operations(&self) -> &Operations {
        &self.operations
    }

    /// Whether a quit request has been received and acknowledged.
    pub fn is_quit_requested(&self) -> bool {
        self.quit
    }

    /// Report a change notification that failed to send.
    pub fn check(&self) -> Result<()> {
        self.outbox.check()
    }

    /// Send one message to the peer.
    pub fn send(&self, message: &Message) -> Result<()> {
        self.outbox.send(message)
    }

    /// Publish a value to the peer and forward all of its future changes.
    ///
    /// The announcement always precedes the first change report for `name`.
    pub fn publish_new(&mut self, name: impl Into<String>, value: ValueRef) -> Result<()> {
        let name = name.into();
        self.check()?;
        self.published.register(name.clone(), Rc::clone(&value))?;

        let outbox = self.outbox.clone();
        let watched = Rc::downgrade(&value);
        let key = name.clone();
        let subscription = value.subscribe(move || {
            if let Some(value) = watched.upgrade() {
                outbox.push(&Message::SetValue {
                    name: key.clone(),
                    snapshot: Snapshot::of(&value),
                });
            }
        });
        self.subscriptions.push(subscription);

        self.send(&Message::NewValue {
            name,
            snapshot: Snapshot::of(&value),
        })
    }

    /// Wait up to `wait` for the next message. `None` waits indefinitely.
    pub fn next_message(&mut self, wait: Option<Duration>) -> Result<Option<Message>> {
        match self.reader.poll_frame(wait) {
            Ok(Some(frame)) => protocol::decode(&frame).map(Some),
            Ok(None) => Ok(None),
            Err(FrameError::ConnectionClosed) => Err(WorkerError::Disconnected(format!(
                "{} end saw the channel close",
                self.side
            ))),
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe) =>
            {
                Err(WorkerError::Disconnected(format!(
                    "{} end saw the channel reset: {err}",
                    self.side
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Handle one received message.
    ///
    /// Returns the outcome when the message ends the current drain.
    pub fn dispatch(&mut self, message: Message) -> Result<Option<DrainOutcome>> {
        if self.debug {
            debug!(side = %self.side, tag = %message.tag(), ?message, "recv");
        }

        match (self.side, message) {
            (_, Message::NewValue { name, snapshot }) => {
                self.mirrors.receive_new(name, snapshot)?;
            }
            (_, Message::SetValue { name, snapshot }) => {
                self.mirrors.receive_set(&name, snapshot)?;
            }
            (Side::Worker, Message::CreateValue { name, factory }) => {
                let build = self.operations.factory(&factory.op)?;
                let value = build(&self.mirrors, &factory)?;
                self.publish_new(name, value)?;
            }
            (Side::Worker, Message::PullValue { name }) => {
                self.published.get(&name)?.current()?;
            }
            (Side::Worker, Message::RunJob { job }) => {
                let run = self.operations.job(&job.op)?;
                self.jobs_running += 1;
                let result = run(self, &job);
                self.jobs_running -= 1;
                match result {
                    Err(WorkerError::QuitRequested) if self.quit => {
                        debug!(op = %job.op, "job stopped by quit request");
                        return Ok(Some(DrainOutcome::QuitRequested));
                    }
                    Err(err) => return Err(err),
                    Ok(()) if self.quit => return Ok(Some(DrainOutcome::QuitRequested)),
                    Ok(()) => {}
                }
            }
            (Side::Worker, Message::Quit) => {
                self.quit = true;
                if let Err(err) = self.send(&Message::QuitAck) {
                    warn!(error = %err, "failed to acknowledge quit");
                }
                self.outbox.closed.set(true);
                return self.quit_outcome().map(Some);
            }
            (Side::Master, Message::QuitAck) => return Ok(Some(DrainOutcome::AckReceived)),
            (side, message) => {
                return Err(WorkerError::UnexpectedTag {
                    side,
                    tag: message.tag(),
                })
            }
        }

        self.check()?;
        Ok(None)
    }

    /// Handle incoming messages until `max_count` were handled (0 means no
    /// limit), `max_wait` elapsed, or a quit exchange ends the drain.
    ///
    /// `Some(Duration::ZERO)` handles only what has already arrived.
    pub fn drain(&mut self, max_wait: Option<Duration>, max_count: usize) -> Result<DrainOutcome> {
        if self.quit {
            return self.quit_outcome();
        }
        self.check()?;

        let deadline = max_wait.map(|wait| Instant::now() + wait);
        let mut handled = 0usize;
        loop {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let Some(message) = self.next_message(remaining)? else {
                return Ok(DrainOutcome::TimedOut);
            };
            if let Some(outcome) = self.dispatch(message)? {
                return Ok(outcome);
            }
            handled += 1;
            if max_count != 0 && handled >= max_count {
                return Ok(DrainOutcome::Completed);
            }
        }
    }

    /// Inside a job a quit unwinds as [`WorkerError::QuitRequested`] so the
    /// job stops at its next `?`; the outermost drain reports it as an outcome.
    fn quit_outcome(&self) -> Result<DrainOutcome> {
        if self.jobs_running > 0 {
            Err(WorkerError::QuitRequested)
        } else {
            Ok(DrainOutcome::QuitRequested)
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("side", &self.side)
            .field("mirrors", &self.mirrors.names().collect::<Vec<_>>())
            .field("published", &self.published.names().collect::<Vec<_>>())
            .field("quit", &self.quit)
            .finish_non_exhaustive()
    }
}
