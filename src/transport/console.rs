//! Line-based chat transport over any async reader/writer pair.
//!
//! Stands in for a chat service: every line is either an administrative command or
//! a reaction on the frame that is currently published.

use super::command::{ConsoleCommand, HELP};
use super::TransportError;
use crate::library::format_game_name;
use crate::render::{ChannelId, RenderPublisher};
use crate::session::{Reaction, SessionController, SessionError, StopOutcome};
use chrono::Local;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct ConsoleTransport<P: RenderPublisher, R, W> {
    controller: SessionController<P>,
    input: R,
    output: W,
    channel_id: ChannelId,
}

impl<P, R, W> ConsoleTransport<P, R, W>
where
    P: RenderPublisher,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(controller: SessionController<P>, input: R, output: W, channel_id: ChannelId) -> Self {
        Self {
            controller,
            input,
            output,
            channel_id,
        }
    }

    /// Serves lines until `/quit`, end of input or cancellation. Returns the writer.
    pub async fn run(mut self, token: CancellationToken) -> Result<W, TransportError> {
        info!("Console transport ready");
        let mut lines = (&mut self.input).lines();

        loop {
            let line = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                debug!("Console input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let command = match line.parse::<ConsoleCommand>() {
                Ok(command) => command,
                Err(e) => {
                    write_reply(&mut self.output, &format!("❌ {}", e)).await?;
                    continue;
                }
            };
            if command == ConsoleCommand::Quit {
                write_reply(&mut self.output, "👋 Bye").await?;
                break;
            }

            let reply = execute(&self.controller, self.channel_id, command).await;
            write_reply(&mut self.output, &reply).await?;
        }

        Ok(self.output)
    }
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &str) -> Result<(), TransportError> {
    output.write_all(reply.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;
    Ok(())
}

async fn execute<P: RenderPublisher>(
    controller: &SessionController<P>,
    channel_id: ChannelId,
    command: ConsoleCommand,
) -> String {
    match command {
        ConsoleCommand::Start(rom) => match controller.start(&rom).await {
            Ok(()) => format!("🎮 Started {}!", format_game_name(&rom)),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::Stop => match controller.stop().await {
            StopOutcome::Stopped => "⏹️ Emulator stopped".to_string(),
            StopOutcome::AlreadyIdle => "No game is running".to_string(),
        },
        ConsoleCommand::Reset => match controller.reset().await {
            Ok(()) => "🔄 Game reset".to_string(),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::Speed(requested) => match controller.set_speed(requested).await {
            Ok(speed) => format!("⚡ Speed set to {}x", speed),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::SaveState(name) => match controller.save_state(name.as_deref()).await {
            Ok(path) => format!(
                "💾 Saved state: {}",
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .unwrap_or_default()
            ),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::LoadState(name) => match controller.load_state(&name).await {
            Ok(()) => format!("📂 Loaded state: {}", name),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::Games => match controller.list_games().await {
            Ok(games) if games.is_empty() => "No ROMs found in games directory".to_string(),
            Ok(games) => format!("🎮 Available games:\n{}", bullet_list(&games)),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::Saves => match controller.list_saves().await {
            Ok(saves) if saves.is_empty() => "No saved states".to_string(),
            Ok(saves) => format!("💾 Saved states:\n{}", bullet_list(&saves)),
            Err(e) => error_reply(e),
        },
        ConsoleCommand::Stats => controller.stats().to_string(),
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => String::new(),
        ConsoleCommand::React { actor, glyph } => {
            let frame = controller.current_frame();
            let reaction = Reaction {
                actor,
                glyph,
                message_id: frame.map(|h| h.message_id).unwrap_or_default(),
                channel_id: frame.map(|h| h.channel_id).unwrap_or(channel_id),
                timestamp: Local::now(),
                from_bot: false,
            };
            match controller.handle_reaction(&reaction) {
                Ok(event) => format!("👍 {} queued", event.button),
                Err(reason) => format!("🚫 {}", reason),
            }
        }
    }
}

fn error_reply(e: SessionError) -> String {
    format!("❌ {}", e)
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("• {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}
