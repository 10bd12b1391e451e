use crate::session::ActorId;
use std::str::FromStr;
use thiserror::Error;

/// One line typed into the console transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start(String),
    Stop,
    Reset,
    Speed(i64),
    SaveState(Option<String>),
    LoadState(String),
    Games,
    Saves,
    Stats,
    Help,
    Quit,
    /// Reaction on the current frame
    React { actor: ActorId, glyph: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0} (try /help)")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Not a number: {0}")]
    InvalidNumber(String),
}

pub const HELP: &str = "\
Commands:
  /start <rom>        start a game from the games directory
  /stop               stop the running game
  /reset              restart the current game from scratch
  /speed <1-10>       set the emulation speed
  /savestate [name]   save the game state
  /loadstate <name>   load a saved game state
  /games              list available games
  /saves              list saved states
  /stats              show session statistics
  /help               show this message
  /quit               exit
  react <actor> <glyph>  press a button as <actor>";

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Err(CommandError::Empty);
        };

        let command = match head.to_ascii_lowercase().as_str() {
            "/start" => ConsoleCommand::Start(
                rest(parts).ok_or(CommandError::Usage("/start <rom>"))?,
            ),
            "/stop" => ConsoleCommand::Stop,
            "/reset" => ConsoleCommand::Reset,
            "/speed" => {
                let value = parts.next().ok_or(CommandError::Usage("/speed <1-10>"))?;
                ConsoleCommand::Speed(
                    value
                        .parse()
                        .map_err(|_| CommandError::InvalidNumber(value.to_string()))?,
                )
            }
            "/savestate" => ConsoleCommand::SaveState(rest(parts)),
            "/loadstate" => ConsoleCommand::LoadState(
                rest(parts).ok_or(CommandError::Usage("/loadstate <name>"))?,
            ),
            "/games" => ConsoleCommand::Games,
            "/saves" => ConsoleCommand::Saves,
            "/stats" => ConsoleCommand::Stats,
            "/help" => ConsoleCommand::Help,
            "/quit" | "/exit" => ConsoleCommand::Quit,
            "react" => {
                let usage = CommandError::Usage("react <actor> <glyph>");
                let actor = parts.next().ok_or(usage)?;
                let actor = actor
                    .parse()
                    .map_err(|_| CommandError::InvalidNumber(actor.to_string()))?;
                let glyph = parts
                    .next()
                    .ok_or(CommandError::Usage("react <actor> <glyph>"))?;
                ConsoleCommand::React {
                    actor,
                    glyph: glyph.to_string(),
                }
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

/// Remaining words joined back together, `None` if there are none
fn rest<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = parts.collect::<Vec<_>>().join(" ");
    (!joined.is_empty()).then_some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "/start tetris.gb".parse(),
            Ok(ConsoleCommand::Start("tetris.gb".to_string()))
        );
        assert_eq!("/STOP".parse(), Ok(ConsoleCommand::Stop));
        assert_eq!("/speed 20".parse(), Ok(ConsoleCommand::Speed(20)));
        assert_eq!("/savestate".parse(), Ok(ConsoleCommand::SaveState(None)));
        assert_eq!(
            "/savestate boss fight".parse(),
            Ok(ConsoleCommand::SaveState(Some("boss fight".to_string())))
        );
        assert_eq!(
            "react 42 ⬆️".parse(),
            Ok(ConsoleCommand::React {
                actor: 42,
                glyph: "⬆️".to_string()
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("   ".parse::<ConsoleCommand>(), Err(CommandError::Empty));
        assert_eq!(
            "/start".parse::<ConsoleCommand>(),
            Err(CommandError::Usage("/start <rom>"))
        );
        assert_eq!(
            "/speed fast".parse::<ConsoleCommand>(),
            Err(CommandError::InvalidNumber("fast".to_string()))
        );
        assert!(matches!(
            "/teleport".parse::<ConsoleCommand>(),
            Err(CommandError::Unknown(_))
        ));
        assert!("react bob ⬆️".parse::<ConsoleCommand>().is_err());
    }
}
