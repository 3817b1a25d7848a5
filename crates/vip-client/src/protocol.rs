//! Coordinator line protocol.
//!
//! One command per line, ASCII, space separated tokens, the first token names
//! the directive.

use std::fmt;

/// Message sent to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Health(u16),
    Deregister(&'a str),
    Pause(&'a str),
    Resume(&'a str),
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Health(code) => write!(f, "HEALTH {}", code),
            Command::Deregister(name) => write!(f, "DEREGISTER {}", name),
            Command::Pause(name) => write!(f, "PAUSE {}", name),
            Command::Resume(name) => write!(f, "RESUME {}", name),
        }
    }
}

/// Message received from the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Coordinator rejected something we sent
    Invalid(String),
    Deregistered,
    Paused,
    Resumed,
    /// Health report acknowledged, with the echoed code if present
    HealthAck(Option<String>),
    /// Empty or whitespace-only line
    Empty,
    /// Anything not in the protocol
    Unrecognized(String),
}

impl Directive {
    /// Parse one line, with or without its line terminator.
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut tokens = line.split_whitespace();

        let Some(name) = tokens.next() else {
            return Directive::Empty;
        };

        match name {
            "INVALID" => Directive::Invalid(line.to_string()),
            "DEREGISTERED" => Directive::Deregistered,
            "PAUSED" => Directive::Paused,
            "RESUMED" => Directive::Resumed,
            "HEALTHACK" => Directive::HealthAck(tokens.next().map(str::to_string)),
            _ => Directive::Unrecognized(line.to_string()),
        }
    }

    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::Invalid(_) => "invalid",
            Directive::Deregistered => "deregistered",
            Directive::Paused => "paused",
            Directive::Resumed => "resumed",
            Directive::HealthAck(_) => "healthack",
            Directive::Empty => "empty",
            Directive::Unrecognized(_) => "unrecognized",
        }
    }
}
