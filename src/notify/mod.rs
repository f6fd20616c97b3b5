#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! Subscription tracking and update fan-out.
//!
//! Applications watch mint entities by key:
//!
//! - **Mint quotes** (`bolt11_mint_quote`): keyed by quote id
//! - **Melt quotes** (`bolt11_melt_quote`): keyed by quote id
//! - **Proof states** (`proof_state`): keyed by the proof's `Y` value
//!
//! Any number of listeners can watch the same key; the mint sees a single
//! subscription. After a reconnect every key is subscribed again.
//!
//! # Example
//!
//! ```rust, no_run
//! use mint_notify::notify::{Client, Listener};
//! use mint_notify::types::SubscriptionKind;
//! use mint_notify::ws::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Client::new("wss://mint.example.com/v1/ws", Config::default())?;
//!
//!     let id = client.add_listener(
//!         SubscriptionKind::Bolt11MeltQuote,
//!         "melt-quote-id",
//!         Listener::new(
//!             |payload| println!("Update: {payload}"),
//!             |kind, key, error| eprintln!("{kind} {key} failed: {error}"),
//!         ),
//!     )?;
//!
//!     // Later...
//!     client.remove_listener(SubscriptionKind::Bolt11MeltQuote, "melt-quote-id", id)?;
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod registry;
pub mod subscription;

pub use client::Client;
pub use registry::{RESUBSCRIBE_BATCH_SIZE, Registry, SubscriptionInfo};
pub use subscription::{Listener, ListenerId, Subscription, SubscriptionState};
