use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

pub const TYPE_JOIN: &str = "join";
pub const TYPE_MESSAGE: &str = "message";
pub const TYPE_SYSTEM: &str = "system";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_PROGRESS_UPDATE: &str = "progress_update";
pub const TYPE_COMMAND_PROGRESS: &str = "command_progress";
pub const EVENT_MEMBER_LEFT: &str = "member_left";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Started,
    #[serde(alias = "in-progress")]
    InProgress,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Started => "started",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

/// Interim report the plugin emits while working through a chunked command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default)]
    pub command_id: String,
    #[serde(default)]
    pub command_type: String,
    pub status: ProgressStatus,
    #[serde(default)]
    pub progress: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub processed_items: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_chunk: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default)]
    pub timestamp: i64,
}

/// What the relay should do with a frame it received from an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameIntent {
    Join {
        id: Option<String>,
        channel: Option<String>,
    },
    Broadcast {
        id: Option<String>,
        channel: Option<String>,
    },
    /// A correlated reply sent without a routing discriminator.
    Direct { id: String },
    Unrecognized { kind: Option<String> },
}

pub fn classify_frame(frame: &Value) -> FrameIntent {
    let kind = frame.get("type").and_then(Value::as_str);
    let id = id_field(frame);
    let channel = frame
        .get("channel")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    match kind {
        Some(TYPE_JOIN) => FrameIntent::Join { id, channel },
        Some(TYPE_MESSAGE) => FrameIntent::Broadcast { id, channel },
        _ => match id {
            Some(id) if frame.get("message").is_some() => FrameIntent::Direct { id },
            _ => FrameIntent::Unrecognized {
                kind: kind.map(str::to_string),
            },
        },
    }
}

/// What a relay client should do with a frame forwarded to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    JoinAck {
        id: Option<String>,
        channel: String,
        result: Value,
    },
    MemberLeft {
        channel: String,
        members: usize,
    },
    Response {
        id: String,
        outcome: Result<Value, (String, Value)>,
    },
    Rejected {
        id: String,
        message: String,
    },
    Progress(ProgressUpdate),
    RelayError {
        message: String,
    },
    Other,
}

pub fn classify_inbound(frame: &Value) -> Inbound {
    let kind = frame.get("type").and_then(Value::as_str);
    let body = frame.get("message");

    match kind {
        Some(TYPE_SYSTEM) => return classify_system(frame, body),
        Some(TYPE_ERROR) => {
            return Inbound::RelayError {
                message: text_of(body),
            }
        }
        Some(TYPE_PROGRESS_UPDATE) => {
            let data = body
                .and_then(|message| message.get("data"))
                .or(body)
                .cloned()
                .unwrap_or(Value::Null);
            return match parse_progress(data, id_field(frame)) {
                Some(update) => Inbound::Progress(update),
                None => Inbound::Other,
            };
        }
        _ => {}
    }

    if body.is_none() {
        if let Some(error) = frame.get("error").filter(|value| !value.is_null()) {
            return match id_field(frame) {
                Some(id) => Inbound::Rejected {
                    id,
                    message: text_of(Some(error)),
                },
                None => Inbound::RelayError {
                    message: text_of(Some(error)),
                },
            };
        }
    }

    let Some(body) = body.filter(|value| value.is_object()) else {
        return Inbound::Other;
    };

    if body.get("type").and_then(Value::as_str) == Some(TYPE_COMMAND_PROGRESS) {
        return match parse_progress(body.clone(), None) {
            Some(update) => Inbound::Progress(update),
            None => Inbound::Other,
        };
    }

    let Some(id) = id_field(body) else {
        return Inbound::Other;
    };
    if let Some(error) = body.get("error").filter(|value| !value.is_null()) {
        return Inbound::Response {
            id,
            outcome: Err((text_of(Some(error)), error.clone())),
        };
    }
    match body.get("result") {
        Some(result) => Inbound::Response {
            id,
            outcome: Ok(result.clone()),
        },
        None => Inbound::Other,
    }
}

fn classify_system(frame: &Value, body: Option<&Value>) -> Inbound {
    let channel = frame
        .get("channel")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(body) = body else {
        return Inbound::Other;
    };
    if body.get("event").and_then(Value::as_str) == Some(EVENT_MEMBER_LEFT) {
        let members = body.get("members").and_then(Value::as_u64).unwrap_or(0) as usize;
        return Inbound::MemberLeft { channel, members };
    }
    match body.get("result") {
        Some(result) => Inbound::JoinAck {
            id: id_field(frame).or_else(|| id_field(body)),
            channel,
            result: result.clone(),
        },
        None => Inbound::Other,
    }
}

fn parse_progress(data: Value, fallback_id: Option<String>) -> Option<ProgressUpdate> {
    let mut update: ProgressUpdate = serde_json::from_value(data).ok()?;
    if update.command_id.is_empty() {
        update.command_id = fallback_id?;
    }
    Some(update)
}

/// Correlation ids are strings on the wire, but numeric ids are tolerated.
pub fn id_field(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn text_of(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

pub fn join_request(id: &str, channel: &str) -> Value {
    json!({
        "id": id,
        "type": TYPE_JOIN,
        "channel": channel,
    })
}

pub fn command_envelope(id: &str, channel: &str, command: &str, params: Value) -> Value {
    let mut params = match params {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    params.insert("commandId".to_string(), Value::String(id.to_string()));
    json!({
        "id": id,
        "type": TYPE_MESSAGE,
        "channel": channel,
        "message": {
            "id": id,
            "command": command,
            "params": Value::Object(params),
        },
    })
}

pub fn join_ack(channel: &str, id: Option<&str>) -> Value {
    let mut message = json!({
        "result": {"status": "joined", "channel": channel},
    });
    let mut ack = json!({
        "type": TYPE_SYSTEM,
        "channel": channel,
    });
    if let Some(id) = id {
        message["id"] = Value::String(id.to_string());
        ack["id"] = Value::String(id.to_string());
    }
    ack["message"] = message;
    ack
}

pub fn missing_channel_error() -> Value {
    json!({
        "type": TYPE_ERROR,
        "message": "Channel name is required",
    })
}

pub fn routing_error(id: Option<&str>, channel: Option<&str>) -> Value {
    json!({
        "id": id,
        "error": format!("Channel '{}' not found or not joined", channel.unwrap_or_default()),
    })
}

pub fn invalid_json_error() -> Value {
    json!({ "error": "Invalid JSON format" })
}

pub fn frame_too_large_error(size: usize, max: usize) -> Value {
    json!({
        "type": TYPE_ERROR,
        "message": format!("Frame too large: {size} > {max} bytes"),
    })
}

pub fn member_left(channel: &str, members: usize) -> Value {
    json!({
        "type": TYPE_SYSTEM,
        "channel": channel,
        "message": {"event": EVENT_MEMBER_LEFT, "members": members},
    })
}
