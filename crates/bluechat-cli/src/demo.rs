//! Two endpoints on one in-memory radio, chatting end to end

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bluechat_core::{ConnectionResult, Message, RuntimePermissions, SessionState};
use bluechat_rfcomm::{ConnectionStream, MemoryRadio, RfcommConfig, SessionController};
use tokio::time::timeout;
use tracing::info;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

const HOST_ADDRESS: &str = "00:00:00:00:0A:01";
const GUEST_ADDRESS: &str = "00:00:00:00:0A:02";

async fn next_result(stream: &mut ConnectionStream, side: &str) -> Result<Option<ConnectionResult>> {
    timeout(STEP_TIMEOUT, stream.next_result())
        .await
        .with_context(|| format!("{} timed out waiting for the session", side))
}

async fn expect_established(stream: &mut ConnectionStream, side: &str) -> Result<()> {
    match next_result(stream, side).await? {
        Some(ConnectionResult::Established) => Ok(()),
        Some(ConnectionResult::Error(reason)) => bail!("{} failed to connect: {}", side, reason),
        other => bail!("{} got {:?} before the session was established", side, other),
    }
}

async fn expect_message(stream: &mut ConnectionStream, side: &str) -> Result<Message> {
    match next_result(stream, side).await? {
        Some(ConnectionResult::Transferred(message)) => Ok(message),
        other => bail!("{} expected a message, got {:?}", side, other),
    }
}

async fn send(controller: &SessionController, text: &str, side: &str) -> Result<Message> {
    controller
        .send_message(text)
        .await
        .ok_or_else(|| anyhow!("{} could not send {:?}", side, text))
}

/// Run the demo exchange; returns the number of messages delivered
pub async fn run_demo(config: RfcommConfig, messages: usize) -> Result<usize> {
    let radio = MemoryRadio::new();
    let host = radio.adapter("Host", HOST_ADDRESS);
    let guest = radio.adapter("Guest", GUEST_ADDRESS);
    radio.pair(&host, &guest);

    let server = SessionController::new(
        Arc::new(host.clone()),
        Arc::new(RuntimePermissions::legacy()),
        config.clone(),
    )?;
    let client = SessionController::new(
        Arc::new(guest),
        Arc::new(RuntimePermissions::legacy()),
        config,
    )?;

    let mut accepted = server.start_server();
    let mut state = server.session_state();
    timeout(STEP_TIMEOUT, state.wait_for(|s| *s == SessionState::Accepting))
        .await
        .context("server did not start listening")?
        .context("server controller went away")?;
    println!("Host is waiting on {}", server.config().service());

    let mut dialed = client.connect(&host.device());
    expect_established(&mut dialed, "Guest").await?;
    expect_established(&mut accepted, "Host").await?;
    println!("Guest connected to {}", host.device());

    let mut delivered = 0;
    for round in 1..=messages {
        let ping = send(&client, &format!("ping {}", round), "Guest").await?;
        let received = expect_message(&mut accepted, "Host").await?;
        println!("Guest sent {:<20} Host got {}", ping.to_string(), received);

        let pong = send(&server, &format!("pong {}", round), "Host").await?;
        let received = expect_message(&mut dialed, "Guest").await?;
        println!("Host sent  {:<20} Guest got {}", pong.to_string(), received);

        delivered += 2;
    }

    server.close();
    match next_result(&mut dialed, "Guest").await? {
        None => println!("Host closed the session"),
        Some(other) => bail!("Guest expected the session to end, got {:?}", other),
    }

    info!("Demo delivered {} messages", delivered);
    Ok(delivered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_exchanges_every_message() {
        let delivered = run_demo(RfcommConfig::new(), 2).await.unwrap();
        assert_eq!(delivered, 4);
    }
}
