use anyhow::{Context, Result};
use tracing::{info, warn};

use switchboard::Token;
use switchboard::gateway::{Config, Connection, Event};

const GUILDS: u64 = 1 << 0;
const GUILD_VOICE_STATES: u64 = 1 << 7;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let token = dotenvy::var("TOKEN").context("Missing `TOKEN` environment variable")?;
    let config = Config::new(Token::from(token), GUILDS | GUILD_VOICE_STATES);

    let (connection, handle) = Connection::new(config);
    let run = tokio::spawn(connection.run());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("ctrl+c detected, closing the connection...");
                handle.stop().await;
            }
            event = handle.next_event() => match event {
                Some(Event::Ready(ready)) => {
                    info!(session_id = %ready.session_id, "session is ready");
                }
                Some(Event::Resumed) => info!("session was resumed"),
                Some(Event::Dispatch(dispatch)) => {
                    info!(kind = %dispatch.kind, sequence = dispatch.sequence, "dispatch");
                }
                Some(Event::Closed(frame)) => info!(?frame, "connection closed"),
                None => break,
            }
        }
    }

    run.await??;
    Ok(())
}
