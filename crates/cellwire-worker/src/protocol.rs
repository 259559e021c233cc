//! Message catalogue and its JSON encoding.
//!
//! Every frame payload is a JSON object `{"tag": "...", "data": ...}`. The
//! tag picks both the lane the frame travels on and the shape of `data`.

use std::fmt;
use std::str::FromStr;

use cellwire_frame::{Frame, COMMAND, CONTROL, VALUE};
use cellwire_value::{Payload, Value};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerError};

/// Message type tags, fixed for the lifetime of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    NewValue,
    SetValue,
    CreateValue,
    PullValue,
    RunJob,
    Quit,
    QuitAck,
}

impl Tag {
    pub const ALL: [Tag; 7] = [
        Tag::NewValue,
        Tag::SetValue,
        Tag::CreateValue,
        Tag::PullValue,
        Tag::RunJob,
        Tag::Quit,
        Tag::QuitAck,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::NewValue => "new value",
            Tag::SetValue => "set value",
            Tag::CreateValue => "create value",
            Tag::PullValue => "pull value",
            Tag::RunJob => "run job",
            Tag::Quit => "quit",
            Tag::QuitAck => "quit ack",
        }
    }

    /// The lane frames with this tag travel on.
    pub fn lane(self) -> u16 {
        match self {
            Tag::Quit | Tag::QuitAck => CONTROL,
            Tag::NewValue | Tag::SetValue => VALUE,
            Tag::CreateValue | Tag::PullValue | Tag::RunJob => COMMAND,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self> {
        Tag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| WorkerError::UnknownTag(s.to_string()))
    }
}

/// Which end of the channel a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Master,
    Worker,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Master => f.write_str("master"),
            Side::Worker => f.write_str("worker"),
        }
    }
}

/// The state of a value as sent to the peer.
///
/// A dirty value travels without its stale payload, which keeps "not yet
/// computed" distinct from a legitimate `null` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "payload", rename_all = "snake_case")]
pub enum Snapshot {
    Ready(Payload),
    Dirty,
}

impl Snapshot {
    pub fn of(value: &Value) -> Self {
        match value.peek() {
            Some(payload) => Snapshot::Ready(payload),
            None => Snapshot::Dirty,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Snapshot::Ready(payload) => Some(payload),
            Snapshot::Dirty => None,
        }
    }
}

/// A named factory or job together with its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub op: String,
    #[serde(default)]
    pub args: Vec<Payload>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, Payload>,
}

impl Invocation {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Self::default()
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Payload>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Payload>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&Payload> {
        self.args.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&Payload> {
        self.kwargs.get(key)
    }

    /// Positional argument `index` as a string, or an operation error.
    pub fn str_arg(&self, index: usize) -> Result<&str> {
        self.arg(index).and_then(Payload::as_str).ok_or_else(|| {
            WorkerError::operation(&self.op, format!("argument {index} must be a string"))
        })
    }
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Announces a newly published value and its initial state.
    NewValue { name: String, snapshot: Snapshot },
    /// Reports a change of an already announced value.
    SetValue { name: String, snapshot: Snapshot },
    /// Asks the worker to build and publish a value.
    CreateValue { name: String, factory: Invocation },
    /// Asks the worker to bring a published value up to date.
    PullValue { name: String },
    /// Asks the worker to run a job.
    RunJob { job: Invocation },
    Quit,
    QuitAck,
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::NewValue { .. } => Tag::NewValue,
            Message::SetValue { .. } => Tag::SetValue,
            Message::CreateValue { .. } => Tag::CreateValue,
            Message::PullValue { .. } => Tag::PullValue,
            Message::RunJob { .. } => Tag::RunJob,
            Message::Quit => Tag::Quit,
            Message::QuitAck => Tag::QuitAck,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    tag: String,
    #[serde(default)]
    data: Payload,
}

#[derive(Serialize, Deserialize)]
struct ValueData {
    name: String,
    value: Snapshot,
}

#[derive(Serialize, Deserialize)]
struct CreateData {
    name: String,
    factory: Invocation,
}

/// Encode a message into a frame on its tag's lane.
pub fn encode(message: &Message) -> Result<Frame> {
    let data = match message {
        Message::NewValue { name, snapshot } | Message::SetValue { name, snapshot } => {
            serde_json::to_value(ValueData {
                name: name.clone(),
                value: snapshot.clone(),
            })?
        }
        Message::CreateValue { name, factory } => serde_json::to_value(CreateData {
            name: name.clone(),
            factory: factory.clone(),
        })?,
        Message::PullValue { name } => Payload::String(name.clone()),
        Message::RunJob { job } => serde_json::to_value(job)?,
        Message::Quit | Message::QuitAck => Payload::Null,
    };

    let tag = message.tag();
    let body = serde_json::to_vec(&Envelope {
        tag: tag.as_str().to_string(),
        data,
    })?;
    Ok(Frame::new(tag.lane(), body))
}

/// Decode a frame into a message.
///
/// Unknown tags and tags on the wrong lane are protocol errors.
pub fn decode(frame: &Frame) -> Result<Message> {
    let envelope: Envelope = serde_json::from_slice(&frame.payload)?;
    let tag: Tag = envelope.tag.parse()?;
    if tag.lane() != frame.lane {
        return Err(WorkerError::LaneMismatch {
            tag,
            lane: frame.lane,
        });
    }

    let message = match tag {
        Tag::NewValue => {
            let ValueData { name, value } = serde_json::from_value(envelope.data)?;
            Message::NewValue {
                name,
                snapshot: value,
            }
        }
        Tag::SetValue => {
            let ValueData { name, value } = serde_json::from_value(envelope.data)?;
            Message::SetValue {
                name,
                snapshot: value,
            }
        }
        Tag::CreateValue => {
            let CreateData { name, factory } = serde_json::from_value(envelope.data)?;
            Message::CreateValue { name, factory }
        }
        Tag::PullValue => Message::PullValue {
            name: serde_json::from_value(envelope.data)?,
        },
        Tag::RunJob => Message::RunJob {
            job: serde_json::from_value(envelope.data)?,
        },
        Tag::Quit => Message::Quit,
        Tag::QuitAck => Message::QuitAck,
    };
    Ok(message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn body(frame: &Frame) -> Payload {
        serde_json::from_slice(&frame.payload).unwrap()
    }

    #[test]
    fn tags_round_trip_through_their_names() {
        for tag in Tag::ALL {
            assert_eq!(tag.as_str().parse::<Tag>().unwrap(), tag);
        }
        assert!(matches!(
            "bogus".parse::<Tag>(),
            Err(WorkerError::UnknownTag(tag)) if tag == "bogus"
        ));
    }

    #[test]
    fn tags_travel_on_their_lanes() {
        assert_eq!(Tag::Quit.lane(), CONTROL);
        assert_eq!(Tag::QuitAck.lane(), CONTROL);
        assert_eq!(Tag::SetValue.lane(), VALUE);
        assert_eq!(Tag::RunJob.lane(), COMMAND);
    }

    #[test]
    fn set_value_wire_shape() {
        let frame = encode(&Message::SetValue {
            name: "double".into(),
            snapshot: Snapshot::Ready(json!(14)),
        })
        .unwrap();

        assert_eq!(frame.lane, VALUE);
        assert_eq!(
            body(&frame),
            json!({
                "tag": "set value",
                "data": {"name": "double", "value": {"state": "ready", "payload": 14}}
            })
        );
    }

    #[test]
    fn dirty_snapshot_is_distinct_from_null_payload() {
        let dirty = encode(&Message::NewValue {
            name: "x".into(),
            snapshot: Snapshot::Dirty,
        })
        .unwrap();
        let null = encode(&Message::NewValue {
            name: "x".into(),
            snapshot: Snapshot::Ready(Payload::Null),
        })
        .unwrap();

        assert_eq!(body(&dirty)["data"]["value"], json!({"state": "dirty"}));
        assert_eq!(
            body(&null)["data"]["value"],
            json!({"state": "ready", "payload": null})
        );
        assert_ne!(decode(&dirty).unwrap(), decode(&null).unwrap());
    }

    #[test]
    fn invocation_survives_encoding() {
        let job = Invocation::new("scale")
            .with_arg("n")
            .with_arg(3)
            .with_kwarg("clamp", true);
        let message = Message::CreateValue {
            name: "scaled".into(),
            factory: job,
        };

        let frame = encode(&message).unwrap();
        assert_eq!(frame.lane, COMMAND);
        assert_eq!(decode(&frame).unwrap(), message);
    }

    #[test]
    fn invocation_args_default_when_absent() {
        let frame = Frame::new(COMMAND, r#"{"tag":"run job","data":{"op":"tick"}}"#);
        assert_eq!(
            decode(&frame).unwrap(),
            Message::RunJob {
                job: Invocation::new("tick")
            }
        );
    }

    #[test]
    fn quit_carries_no_data() {
        let frame = encode(&Message::Quit).unwrap();
        assert_eq!(frame.lane, CONTROL);
        assert_eq!(body(&frame), json!({"tag": "quit", "data": null}));
        assert_eq!(decode(&frame).unwrap(), Message::Quit);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let frame = Frame::new(VALUE, r#"{"tag":"bogus","data":null}"#);
        assert!(matches!(
            decode(&frame),
            Err(WorkerError::UnknownTag(tag)) if tag == "bogus"
        ));
    }

    #[test]
    fn tag_on_wrong_lane_is_rejected() {
        let frame = Frame::new(VALUE, r#"{"tag":"quit","data":null}"#);
        assert!(matches!(
            decode(&frame),
            Err(WorkerError::LaneMismatch {
                tag: Tag::Quit,
                lane: VALUE
            })
        ));
    }

    #[test]
    fn malformed_body_is_json_error() {
        let frame = Frame::new(COMMAND, "not json");
        assert!(matches!(decode(&frame), Err(WorkerError::Json(_))));
    }

    #[test]
    fn str_arg_reports_wrong_type() {
        let call = Invocation::new("double").with_arg(5);
        assert!(matches!(
            call.str_arg(0),
            Err(WorkerError::Operation { op, .. }) if op == "double"
        ));
        assert!(call.str_arg(1).is_err());
    }
}
