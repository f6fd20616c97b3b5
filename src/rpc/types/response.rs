use std::error::Error as StdError;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error object carried by a JSON-RPC error response.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mint returned error {}: {}", self.code, self.message)
    }
}

impl StdError for RpcError {}

/// Server push for an active subscription.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    /// Method name chosen by the mint (not interpreted)
    pub method: String,
    pub params: NotificationParams,
}

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotificationParams {
    /// Wire subscription id the update belongs to
    #[serde(rename = "subId")]
    pub sub_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl Notification {
    /// Build a notification for `sub_id`, as an alternative update source would.
    #[must_use]
    pub fn new(sub_id: String, payload: Value) -> Self {
        Self {
            method: "subscribe".to_owned(),
            params: NotificationParams { sub_id, payload },
        }
    }

    #[must_use]
    pub fn sub_id(&self) -> &str {
        &self.params.sub_id
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.params.payload
    }

    /// Decode the payload into one of the typed update structs.
    pub fn payload_as<T: DeserializeOwned>(&self) -> crate::Result<T> {
        crate::serde_helpers::deserialize_with_warnings(self.params.payload.clone())
    }
}

/// Classification of one inbound frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Success response to a request we sent.
    Success { id: u64, result: Value },
    /// Error response to a request we sent.
    Failure { id: u64, error: RpcError },
    /// Subscription push (method without id).
    Notification(Notification),
    /// Request from the server (method with id). Clients never serve these.
    Request { method: String },
    /// Valid JSON matching none of the shapes above.
    Unrecognized,
}

impl InboundMessage {
    /// Parse and classify a text frame.
    ///
    /// Fails only when the frame is not JSON or a recognized shape carries
    /// malformed members.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Self::classify(value)
    }

    fn classify(value: Value) -> Result<Self, serde_json::Error> {
        let Value::Object(mut object) = value else {
            return Ok(Self::Unrecognized);
        };

        let has_id = object.contains_key("id");
        let id = object.remove("id").filter(|id| !id.is_null());

        if let Some(id) = &id {
            if let Some(result) = object.remove("result") {
                return Ok(id
                    .as_u64()
                    .map_or(Self::Unrecognized, |id| Self::Success { id, result }));
            }
            if let Some(error) = object.remove("error") {
                let error: RpcError = serde_json::from_value(error)?;
                return Ok(id
                    .as_u64()
                    .map_or(Self::Unrecognized, |id| Self::Failure { id, error }));
            }
        }

        match object.get("method") {
            Some(Value::String(method)) if has_id => Ok(Self::Request {
                method: method.clone(),
            }),
            Some(Value::String(_)) => Ok(Self::Notification(serde_json::from_value(
                Value::Object(object),
            )?)),
            _ => Ok(Self::Unrecognized),
        }
    }
}
