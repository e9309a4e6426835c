//! Interactive chat loop over one connection stream

use std::io::Write;

use bluechat_core::ConnectionResult;
use bluechat_rfcomm::{ConnectionStream, SessionController};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::error::Result;

/// Line that leaves the chat
pub const QUIT_COMMAND: &str = "/quit";

/// What the chat loop should do after a connection result
#[derive(Debug, PartialEq, Eq)]
pub enum ChatEvent {
    Print(String),
    Connected(String),
    Finished(String),
}

/// Map a connection result to terminal output
pub fn render(result: Option<ConnectionResult>) -> ChatEvent {
    match result {
        Some(ConnectionResult::Established) => ChatEvent::Connected(format!(
            "Connected. Type a message and press enter, {} to leave.",
            QUIT_COMMAND
        )),
        Some(ConnectionResult::Transferred(message)) => ChatEvent::Print(message.to_string()),
        Some(ConnectionResult::Error(reason)) => ChatEvent::Finished(reason),
        None => ChatEvent::Finished("Session ended".to_string()),
    }
}

fn show_prompt(prompt: &str) {
    print!("{}", prompt);
    let _ = std::io::stdout().flush();
}

/// Drive `results` and stdin until the session ends or the user quits
pub async fn run_chat(
    controller: &SessionController,
    mut results: ConnectionStream,
    prompt: &str,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut connected = false;

    loop {
        tokio::select! {
            result = results.next_result() => match render(result) {
                ChatEvent::Connected(banner) => {
                    connected = true;
                    println!("{}", banner);
                    show_prompt(prompt);
                }
                ChatEvent::Print(line) => {
                    println!("\r{}", line);
                    show_prompt(prompt);
                }
                ChatEvent::Finished(reason) => {
                    println!("\r{}", reason);
                    break;
                }
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                let text = line.trim();
                if text == QUIT_COMMAND {
                    break;
                }
                if !text.is_empty() {
                    if !connected {
                        println!("Not connected yet");
                    } else if controller.send_message(text).await.is_none() {
                        println!("Message was not delivered");
                    }
                }
                show_prompt(prompt);
            }
        }
    }

    controller.close();
    info!("Left chat");
    Ok(())
}
