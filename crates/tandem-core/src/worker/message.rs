use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MESSAGE_ENVELOPE_VERSION;
use crate::error::{CoreError, Result};
use crate::models::PushData;

/// Messages exchanged between the background worker and a foreground page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Worker -> page: the user clicked a notification.
    NotificationClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<PushData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    /// Page -> worker: activate the waiting worker now.
    SkipWaiting,
}

/// Versioned wire form: the message object plus a `v` field.
/// Messages without `v` are treated as version 1.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEnvelope {
    pub v: u8,
    pub message: WorkerMessage,
}

impl MessageEnvelope {
    pub fn new(message: WorkerMessage) -> Self {
        Self {
            v: MESSAGE_ENVELOPE_VERSION,
            message,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(&self.message)?;
        if let Value::Object(map) = &mut value {
            map.insert("v".to_string(), Value::from(self.v));
        }
        Ok(value)
    }

    pub fn from_value(mut value: Value) -> Result<Self> {
        let Value::Object(map) = &mut value else {
            return Err(CoreError::payload("worker message must be an object"));
        };
        let v = match map.remove("v") {
            None => 1,
            Some(raw) => raw
                .as_u64()
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| CoreError::payload(format!("invalid message version: {}", raw)))?,
        };
        if v == 0 || v > MESSAGE_ENVELOPE_VERSION {
            return Err(CoreError::payload(format!(
                "unsupported worker message version {} (supported: {})",
                v, MESSAGE_ENVELOPE_VERSION
            )));
        }
        let message = serde_json::from_value(value)?;
        Ok(Self { v, message })
    }
}
