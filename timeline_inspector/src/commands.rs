use std::num::ParseIntError;

use thiserror::Error;
use timeline_core::{StepDirection, TransportSpeed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorCommand {
    Live,
    Archive,
    Scrub(usize),
    Step(StepDirection),
    Play,
    Pause,
    Toggle,
    Rewind,
    Forward,
    Speed(TransportSpeed),
    Seek(String),
    Status,
    Frame,
    Flow,
    Wait(u64),
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("invalid step direction '{0}'")]
    InvalidDirection(String),
    #[error("invalid speed '{0}', expected 1, 3 or 5")]
    InvalidSpeed(String),
}

pub fn parse_command_line(input: &str) -> Result<InspectorCommand, CommandParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CommandParseError::Empty);
    }

    let (verb, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (trimmed, ""),
    };
    let mut parts = rest.split_whitespace();

    match verb.to_ascii_lowercase().as_str() {
        "live" => Ok(InspectorCommand::Live),
        "archive" => Ok(InspectorCommand::Archive),
        "scrub" | "goto" => {
            let index_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("index"))?;
            Ok(InspectorCommand::Scrub(parse_usize(index_str, "scrub index")?))
        }
        "step" => {
            let direction_str = parts.next().unwrap_or("+1");
            let direction = match direction_str {
                "+1" | "1" | "+" | "next" | "fwd" => StepDirection::Forward,
                "-1" | "-" | "prev" | "back" => StepDirection::Backward,
                other => return Err(CommandParseError::InvalidDirection(other.to_string())),
            };
            Ok(InspectorCommand::Step(direction))
        }
        "play" => Ok(InspectorCommand::Play),
        "pause" => Ok(InspectorCommand::Pause),
        "toggle" => Ok(InspectorCommand::Toggle),
        "rew" | "rewind" => Ok(InspectorCommand::Rewind),
        "fwd" | "forward" => Ok(InspectorCommand::Forward),
        "speed" => {
            let speed_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("speed"))?;
            let multiplier = speed_str.trim_end_matches(['x', 'X']);
            multiplier
                .parse::<u32>()
                .ok()
                .and_then(TransportSpeed::from_multiplier)
                .map(InspectorCommand::Speed)
                .ok_or_else(|| CommandParseError::InvalidSpeed(speed_str.to_string()))
        }
        "seek" => {
            if rest.is_empty() {
                return Err(CommandParseError::MissingArgument("time"));
            }
            Ok(InspectorCommand::Seek(rest.to_string()))
        }
        "status" => Ok(InspectorCommand::Status),
        "frame" => Ok(InspectorCommand::Frame),
        "flow" => Ok(InspectorCommand::Flow),
        "wait" => {
            let ms_str = parts
                .next()
                .ok_or(CommandParseError::MissingArgument("milliseconds"))?;
            let ms = ms_str
                .parse::<u64>()
                .map_err(|source| CommandParseError::InvalidInteger {
                    value: ms_str.to_string(),
                    context: "wait milliseconds",
                    source,
                })?;
            Ok(InspectorCommand::Wait(ms))
        }
        "quit" | "exit" => Ok(InspectorCommand::Quit),
        other => Err(CommandParseError::UnknownCommand(other.to_string())),
    }
}

fn parse_usize(value: &str, context: &'static str) -> Result<usize, CommandParseError> {
    value
        .parse::<usize>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}
