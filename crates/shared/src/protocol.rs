use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    domain::{CenterAxis, EngraveMode},
    error::ProtocolError,
};

/// One unit exchanged over the control channel, discriminated by its `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Message(LogMessage),
    Status(StatusSnapshot),
    Command(Command),
}

impl Frame {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingDiscriminant)?;
        match kind {
            "message" | "status" | "command" => Ok(serde_json::from_value(value)?),
            other => Err(ProtocolError::UnknownDiscriminant(other.to_string())),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Message(_) => "message",
            Frame::Status(_) => "status",
            Frame::Command(_) => "command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub content: String,
}

impl LogMessage {
    pub fn new(severity: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            severity: severity.into(),
            content: content.into(),
        }
    }
}

/// Full device status. Each inbound snapshot replaces the previous one wholesale.
///
/// Decoding is lenient field by field: a value of the wrong shape falls back to the
/// field's default instead of rejecting the whole snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusSnapshot {
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::version"
    )]
    pub version: Option<String>,
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub connected: bool,
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub busy: bool,
    #[serde(deserialize_with = "lenient::flag_or_true")]
    pub fan_on: bool,
    #[serde(deserialize_with = "lenient::flag_or_true")]
    pub success: bool,
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub framing: bool,
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub engraving: bool,
    #[serde(deserialize_with = "lenient::flag_or_false")]
    pub use_center: bool,
    #[serde(deserialize_with = "lenient::center_axis")]
    pub center_axis: Option<CenterAxis>,
}

mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use crate::domain::CenterAxis;

    pub fn version<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(de)? {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn center_axis<'de, D: Deserializer<'de>>(de: D) -> Result<Option<CenterAxis>, D::Error> {
        Ok(Value::deserialize(de)?
            .as_str()
            .and_then(CenterAxis::parse))
    }

    pub fn flag_or_false<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
        Ok(flag(Value::deserialize(de)?).unwrap_or(false))
    }

    pub fn flag_or_true<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
        Ok(flag(Value::deserialize(de)?).unwrap_or(true))
    }

    fn flag(value: Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(b),
            Value::Number(n) => n.as_f64().map(|n| n != 0.0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            version: None,
            connected: false,
            busy: false,
            fan_on: true,
            success: true,
            framing: false,
            engraving: false,
            use_center: false,
            center_axis: None,
        }
    }
}

impl StatusSnapshot {
    pub fn disabled(&self) -> bool {
        self.engraving || self.framing
    }

    pub fn total_disabled(&self) -> bool {
        !self.connected || self.disabled()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "cmd")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameArgs {
    pub fx: u32,
    pub fy: u32,
    pub use_center: bool,
    pub center_axis: Option<CenterAxis>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngraveArgs {
    pub mode: EngraveMode,
    pub use_center: bool,
    pub trf: String,
    pub width: u32,
    pub height: u32,
    pub power: u8,
    pub depth: u8,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    fn with_args(name: &str, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.to_string(),
            args,
        }
    }

    pub fn status() -> Self {
        Self::new("status")
    }

    pub fn fan(on: bool) -> Self {
        Self::with_args("fan", json!({ "on": on }))
    }

    pub fn home() -> Self {
        Self::new("home")
    }

    pub fn connect() -> Self {
        Self::new("connect")
    }

    pub fn disconnect() -> Self {
        Self::new("disconnect")
    }

    pub fn move_by(dx: i64, dy: i64) -> Self {
        Self::with_args("move", json!({ "dx": dx, "dy": dy }))
    }

    pub fn frame_start(args: FrameArgs) -> Self {
        Self::with_args("frameStart", frame_args(args))
    }

    pub fn frame_stop(args: FrameArgs) -> Self {
        Self::with_args("frameStop", frame_args(args))
    }

    pub fn engrave(args: EngraveArgs) -> Self {
        Self::with_args(
            "engrave",
            json!({
                "mode": args.mode.as_str(),
                "useCenter": args.use_center,
                "trf": args.trf,
                "width": args.width,
                "height": args.height,
                "power": args.power.min(100),
                "depth": args.depth.min(100),
            }),
        )
    }

    pub fn stop_engraving() -> Self {
        Self::new("stopEngraving")
    }

    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }
}

fn frame_args(args: FrameArgs) -> Value {
    json!({
        "fx": args.fx,
        "fy": args.fy,
        "useCenter": args.use_center,
        "centerAxis": args.center_axis.map(CenterAxis::as_str),
    })
}

impl From<Command> for Frame {
    fn from(value: Command) -> Self {
        Frame::Command(value)
    }
}
