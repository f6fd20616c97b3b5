use serde::Serialize;
use serde::ser::SerializeTuple as _;

use crate::types::SubscriptionKind;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound JSON-RPC request envelope.
///
/// Serializes as `{"jsonrpc":"2.0","method":...,"params":...,"id":...}`.
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct Request<P> {
    pub jsonrpc: &'static str,
    pub method: Method,
    pub params: P,
    pub id: u64,
}

impl Request<SubscribeParams> {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe(id: u64, params: SubscribeParams) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: Method::Subscribe,
            params,
            id,
        }
    }
}

impl Request<UnsubscribeParams> {
    /// Create an unsubscribe request.
    #[must_use]
    pub fn unsubscribe(id: u64, sub_id: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: Method::Unsubscribe,
            params: UnsubscribeParams { sub_id },
            id,
        }
    }
}

/// The only two methods a client ever calls.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    Subscribe,
    Unsubscribe,
}

#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct SubscribeParams {
    pub kind: SubscriptionKind,
    /// Application keys to watch (quote ids, proof `Y` values)
    pub filters: Vec<String>,
    /// Client-chosen id the mint will tag notifications with
    #[serde(rename = "subId")]
    pub sub_id: String,
}

impl SubscribeParams {
    #[must_use]
    pub fn new(kind: SubscriptionKind, filters: Vec<String>, sub_id: String) -> Self {
        Self {
            kind,
            filters,
            sub_id,
        }
    }
}

#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct UnsubscribeParams {
    #[serde(rename = "subId")]
    pub sub_id: String,
}

/// Immediate teardown control message, sent as the bare array `["CLOSE", subId]`.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct CloseMessage {
    pub sub_id: String,
}

impl CloseMessage {
    #[must_use]
    pub fn new(sub_id: String) -> Self {
        Self { sub_id }
    }
}

impl Serialize for CloseMessage {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element("CLOSE")?;
        tuple.serialize_element(&self.sub_id)?;
        tuple.end()
    }
}
