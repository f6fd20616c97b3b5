//! Watch a mint quote, a melt quote and a proof on a Cashu mint.
//!
//! Usage:
//! ```sh
//! RUST_LOG=info cargo run --example quote_updates --features tracing -- \
//!     wss://mint.example.com/v1/ws <mint-quote-id> [<melt-quote-id>] [<proof-Y>]
//! ```

use std::time::Duration;

use futures::StreamExt as _;
use mint_notify::types::{MintQuoteState, SubscriptionKind};
use mint_notify::ws::TransportEvent;
use mint_notify::ws::config::{Config, ReconnectConfig};
use mint_notify::{Client, Listener};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let endpoint = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing mint WebSocket endpoint"))?;
    let mint_quote = args
        .next()
        .ok_or_else(|| anyhow::anyhow!("missing mint quote id"))?;
    let melt_quote = args.next();
    let proof_y = args.next();

    let config = Config::builder()
        .reconnect(ReconnectConfig::builder().max_retries(5).build())
        .build();
    let client = Client::new(&endpoint, config)?;

    // Log lifecycle events in the background
    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TransportEvent::ReconnectFailed => warn!(?event, "giving up"),
                event => info!(?event, "transport"),
            }
        }
    });

    // Callback listeners share a single subscription per key
    if let Some(quote) = &melt_quote {
        client.add_listener(
            SubscriptionKind::Bolt11MeltQuote,
            quote,
            Listener::new(
                |payload| info!(stream = "melt_quote", %payload),
                |kind, key, error| warn!(%kind, key, %error, "subscription failed"),
            ),
        )?;
    }

    if let Some(y) = &proof_y {
        let stream = client.subscribe_proof_state(y)?;
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(update) = stream.next().await {
                match update {
                    Ok(update) => info!(stream = "proof_state", y = %update.y, state = %update.state),
                    Err(e) => debug!(stream = "proof_state", error = %e),
                }
            }
        });
    }

    info!(stream = "mint_quote", quote = %mint_quote, "Waiting for quote updates");
    let stream = client.subscribe_mint_quote(&mint_quote)?;
    let mut stream = Box::pin(stream);

    while let Ok(Some(result)) = timeout(Duration::from_secs(300), stream.next()).await {
        match result {
            Ok(update) => {
                info!(stream = "mint_quote", quote = %update.quote, state = %update.state);
                if update.state == MintQuoteState::Issued {
                    break;
                }
            }
            Err(e) => {
                warn!(stream = "mint_quote", error = %e);
                break;
            }
        }
    }

    info!(
        subscriptions = client.subscription_count(),
        pending_calls = client.pending_calls(),
        state = ?client.connection_state()
    );
    client.disconnect();

    Ok(())
}
