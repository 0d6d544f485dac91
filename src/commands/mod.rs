//! Terminal client commands
//!
//! A line starting with `/` is a command, anything else is sent as chat.

use crate::error::{Error, Result};
use crate::session::SessionHandle;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Mute,
    Camera,
    Screen,
    Offer,
    Status,
    Leave,
    Help,
    Chat(String),
}

pub const HELP: &str = "\
/mute    toggle microphone
/camera  toggle camera
/screen  toggle screen share
/offer   send an offer to the room
/status  show session state
/leave   leave the room
text     send a chat message";

impl FromStr for UserCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let Some(cmd) = line.strip_prefix('/') else {
            return Ok(UserCommand::Chat(line.to_string()));
        };
        // "//text" sends "/text" as chat
        if cmd.starts_with('/') {
            return Ok(UserCommand::Chat(cmd.to_string()));
        }
        match cmd.split_whitespace().next().unwrap_or_default() {
            "mute" => Ok(UserCommand::Mute),
            "camera" | "cam" => Ok(UserCommand::Camera),
            "screen" => Ok(UserCommand::Screen),
            "offer" => Ok(UserCommand::Offer),
            "status" => Ok(UserCommand::Status),
            "leave" | "quit" => Ok(UserCommand::Leave),
            "help" | "" => Ok(UserCommand::Help),
            other => Err(Error::UnknownCommand(format!("/{other}"))),
        }
    }
}

/// What the terminal should do after a command ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Print(String),
    Silent,
    Quit,
}

/// Runs one command against the session.
pub async fn dispatch(session: &SessionHandle, command: UserCommand) -> Result<Outcome> {
    let outcome = match command {
        UserCommand::Mute => {
            let muted = session.toggle_mute().await?;
            Outcome::Print(if muted { "microphone muted" } else { "microphone on" }.into())
        }
        UserCommand::Camera => {
            let off = session.toggle_camera().await?;
            Outcome::Print(if off { "camera off" } else { "camera on" }.into())
        }
        UserCommand::Screen => {
            let sharing = session.toggle_screen_share().await?;
            Outcome::Print(if sharing { "sharing screen" } else { "screen share stopped" }.into())
        }
        UserCommand::Offer => {
            session.offer().await?;
            Outcome::Print("offer sent".into())
        }
        UserCommand::Status => {
            let snap = session.snapshot();
            Outcome::Print(format!(
                "state={:?} room={} muted={} camera_off={} screen={} remote_tracks={} rounds={}",
                snap.state,
                snap.room.as_ref().map_or("-", |r| r.as_str()),
                snap.muted,
                snap.camera_off,
                snap.screen_sharing,
                snap.remote_tracks,
                snap.rounds
            ))
        }
        UserCommand::Leave => {
            session.leave().await?;
            Outcome::Quit
        }
        UserCommand::Help => Outcome::Print(HELP.into()),
        UserCommand::Chat(text) => match session.send_chat(text).await? {
            Some(_) => Outcome::Silent,
            None if session.is_ended() => Outcome::Quit,
            None => Outcome::Silent,
        },
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_chat() {
        assert_eq!("/mute".parse::<UserCommand>().unwrap(), UserCommand::Mute);
        assert_eq!(" /cam ".parse::<UserCommand>().unwrap(), UserCommand::Camera);
        assert_eq!("/screen now".parse::<UserCommand>().unwrap(), UserCommand::Screen);
        assert_eq!("/".parse::<UserCommand>().unwrap(), UserCommand::Help);
        assert_eq!(
            "hello there".parse::<UserCommand>().unwrap(),
            UserCommand::Chat("hello there".into())
        );
        assert_eq!(
            "//mute".parse::<UserCommand>().unwrap(),
            UserCommand::Chat("/mute".into())
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!("/dance".parse::<UserCommand>(), Err(Error::UnknownCommand(_))));
    }
}
