//! Terminal input parsed into user actions.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};

pub const HELP: &str = "\
commands:
  /users                  list users and who is online
  /dm <user>              open a direct conversation
  /broadcast on|off       toggle broadcast mode
  /to <user>              add or remove a broadcast recipient
  /file <path> [caption]  send a file to the current target
  /more                   load older messages
  /refresh                reload users, presence and history
  /retry                  resend the last draft that failed
  /status                 show connection state
  /logout                 end the session
  /quit                   exit
anything else is sent as a message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Users,
    Direct(String),
    Broadcast(bool),
    ToggleRecipient(String),
    SendFile { path: PathBuf, caption: String },
    More,
    Refresh,
    Retry,
    Status,
    Logout,
    Quit,
    Help,
    Say(String),
    Empty,
}

pub fn parse(line: &str) -> Result<CliCommand> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(CliCommand::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(CliCommand::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "users" => CliCommand::Users,
        "dm" => CliCommand::Direct(required(name, arg)?),
        "broadcast" => match arg {
            "on" => CliCommand::Broadcast(true),
            "off" => CliCommand::Broadcast(false),
            _ => bail!("usage: /broadcast on|off"),
        },
        "to" => CliCommand::ToggleRecipient(required(name, arg)?),
        "file" => {
            let arg = required(name, arg)?;
            let (path, caption) = match arg.split_once(char::is_whitespace) {
                Some((path, caption)) => (path, caption.trim()),
                None => (arg.as_str(), ""),
            };
            CliCommand::SendFile {
                path: PathBuf::from(path),
                caption: caption.to_string(),
            }
        }
        "more" => CliCommand::More,
        "refresh" => CliCommand::Refresh,
        "retry" => CliCommand::Retry,
        "status" => CliCommand::Status,
        "logout" => CliCommand::Logout,
        "quit" | "exit" => CliCommand::Quit,
        "help" | "?" => CliCommand::Help,
        other => return Err(anyhow!("unknown command /{other}, try /help")),
    };
    Ok(command)
}

fn required(name: &str, arg: &str) -> Result<String> {
    if arg.is_empty() {
        bail!("/{name} needs an argument");
    }
    Ok(arg.to_string())
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
