//! Line-based control commands, the stand-in for the effect selector and
//! background picker of a UI.

use crate::config::EffectKind;
use crate::error::CommandError;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Switch to another effect (restarts the loop)
    Effect(EffectKind),
    /// Load a new background image
    Background(PathBuf),
    /// Restart the current effect
    Start,
    /// Stop the loop and blank the output
    Stop,
    /// Log the current run state
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        match verb.to_ascii_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "effect" | "e" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument("effect"));
                }
                Ok(Command::Effect(rest.parse()?))
            }
            "background" | "bg" => {
                if rest.is_empty() {
                    return Err(CommandError::MissingArgument("background"));
                }
                Ok(Command::Background(PathBuf::from(rest)))
            }
            "start" | "restart" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "status" => Ok(Command::Status),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}
