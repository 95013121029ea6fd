//! Minimal live client: connects, logs state changes and prints inbound
//! frames, riding out server restarts via automatic reconnection.
//!
//! ```sh
//! cargo run --example feed_client -- ws://127.0.0.1:9001
//! ```

use std::sync::Arc;
use std::time::Duration;

use resock_core::{Client, ClientConfig};
use resock_tungstenite::TungsteniteConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_owned());

    let config = ClientConfig::default()
        .with_reconnect_interval(Duration::from_millis(500))
        .with_max_reconnect_attempts(10)
        .with_ping_interval(Duration::from_secs(15));
    let client = Client::new(config, Arc::new(TungsteniteConnector::new()));

    client.on_state_change(|change| {
        match change.cause.as_deref() {
            Some(cause) => println!("{} -> {} ({cause})", change.previous, change.current),
            None => println!("{} -> {}", change.previous, change.current),
        }
    });
    client.on_message(|payload| println!("inbound: {} bytes", payload.len()));

    client.connect(&url, &[])?;
    println!("connecting to {url}; ctrl-c to quit");

    tokio::signal::ctrl_c().await?;
    client.disconnect(1000, "client shutting down").await?;
    Ok(())
}
