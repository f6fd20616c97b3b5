#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod notify;
pub mod rpc;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use notify::{Client, Listener, ListenerId, SubscriptionState};
pub use types::SubscriptionKind;
