//! Domain types shared by the RPC and subscription layers.
//!
//! Payload shapes follow the mint's quote and proof-check responses
//! (NUT-04, NUT-05 and NUT-07); the mint pushes the same objects over the
//! socket whenever they change.

use serde::{Deserialize, Serialize};

/// Stream categories a mint can push updates for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum SubscriptionKind {
    /// State changes of a bolt11 mint quote, keyed by quote id.
    Bolt11MintQuote,
    /// State changes of a bolt11 melt quote, keyed by quote id.
    Bolt11MeltQuote,
    /// Spent state changes of a proof, keyed by its `Y` value.
    ProofState,
}

impl SubscriptionKind {
    /// Name of the payload field that carries the key a filter matched.
    ///
    /// Used to tell apart payloads that arrive on a subscription covering
    /// several keys.
    #[must_use]
    pub const fn key_field(self) -> &'static str {
        match self {
            Self::Bolt11MintQuote | Self::Bolt11MeltQuote => "quote",
            Self::ProofState => "Y",
        }
    }
}

/// Lifecycle of a mint quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[non_exhaustive]
pub enum MintQuoteState {
    /// Invoice not paid yet.
    Unpaid,
    /// Invoice paid, tokens can be minted.
    Paid,
    /// Tokens have been minted.
    Issued,
    /// Unknown state from the mint (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Lifecycle of a melt quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[non_exhaustive]
pub enum MeltQuoteState {
    /// Melt not started.
    Unpaid,
    /// Lightning payment in flight.
    Pending,
    /// Lightning payment settled.
    Paid,
    /// Unknown state from the mint (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Spent state of a single proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[non_exhaustive]
pub enum ProofState {
    Unspent,
    Pending,
    Spent,
    /// Unknown state from the mint (captures the raw value for debugging).
    #[serde(untagged)]
    Unknown(String),
}

/// Payload pushed for [`SubscriptionKind::Bolt11MintQuote`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuoteUpdate {
    /// Quote id
    pub quote: String,
    /// Bolt11 invoice to pay
    #[serde(default)]
    pub request: Option<String>,
    pub state: MintQuoteState,
    /// Unix timestamp (seconds) after which the quote is void
    #[serde(default)]
    pub expiry: Option<u64>,
}

/// Payload pushed for [`SubscriptionKind::Bolt11MeltQuote`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuoteUpdate {
    /// Quote id
    pub quote: String,
    #[serde(default)]
    pub amount: Option<u64>,
    #[serde(default)]
    pub fee_reserve: Option<u64>,
    pub state: MeltQuoteState,
    #[serde(default)]
    pub expiry: Option<u64>,
    /// Lightning preimage once the payment settled
    #[serde(default)]
    pub payment_preimage: Option<String>,
}

/// Payload pushed for [`SubscriptionKind::ProofState`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStateUpdate {
    /// Hash-to-curve of the proof secret, hex encoded
    #[serde(rename = "Y")]
    pub y: String,
    pub state: ProofState,
    #[serde(default)]
    pub witness: Option<String>,
}
