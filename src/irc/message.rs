//! IRC message representation.
//!
//! A [`Message`] is the decoded form of one wire line:
//! `[@tags ][:source ]COMMAND [params...] [:trailing]`. Tags are accepted on
//! input and dropped. Messages are immutable once built.

use crate::error::ProtocolError;
use irc::proto::{self, Command, Prefix};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    source: Option<String>,
    command: String,
    params: Vec<String>,
}

impl Message {
    pub fn new<C, I, P>(command: C, params: I) -> Self
    where
        C: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            source: None,
            command: command.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Nickname part of the source, if the source names a user rather than a
    /// server.
    pub fn source_nick(&self) -> Option<String> {
        match Prefix::new_from_str(self.source.as_deref()?) {
            Prefix::Nickname(nick, _, _) if !nick.is_empty() => Some(nick),
            _ => None,
        }
    }

    /// Parse a single line with the terminator already removed.
    ///
    /// Tokenizing is done by `irc-proto`, which also normalizes the casing of
    /// known commands. The result is flattened back into a command and a
    /// parameter list so handlers can be keyed by command text.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parsed: proto::Message = line.parse().map_err(|e: proto::error::ProtocolError| {
            ProtocolError::Malformed {
                line: line.to_string(),
                reason: e.to_string(),
            }
        })?;

        let wire = String::from(&parsed.command);
        let (head, trailing) = match wire.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (wire.as_str(), None),
        };
        let mut tokens = head.split(' ').filter(|token| !token.is_empty());
        let command = tokens
            .next()
            .ok_or_else(|| ProtocolError::MissingCommand(line.to_string()))?;
        if !command.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidCommand(command.to_string()));
        }
        let mut params: Vec<String> = tokens.map(str::to_string).collect();
        params.extend(trailing.map(str::to_string));

        Ok(Self {
            source: parsed.prefix.as_ref().map(Prefix::to_string),
            command: command.to_string(),
            params,
        })
    }

    /// Check that the message can be written as exactly one wire line.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.command.is_empty() {
            return Err(ProtocolError::MissingCommand(String::new()));
        }
        if !self.command.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidCommand(self.command.clone()));
        }
        let last = self.params.len().saturating_sub(1);
        for (index, param) in self.params.iter().enumerate() {
            let breaks_line = param.contains(['\r', '\n', '\0']);
            let bad_middle =
                index != last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if breaks_line || bad_middle {
                return Err(ProtocolError::InvalidParam {
                    index,
                    param: param.clone(),
                });
            }
        }
        if let Some(source) = &self.source {
            if source.is_empty() || source.contains([' ', '\r', '\n', '\0']) {
                return Err(ProtocolError::InvalidParam {
                    index: 0,
                    param: source.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for Message {
    /// Wire form without the line terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = proto::Message {
            tags: None,
            prefix: self.source.as_deref().map(Prefix::from),
            command: Command::Raw(self.command.clone(), self.params.clone()),
        };
        f.write_str(wire.to_string().trim_end_matches("\r\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_line() {
        let msg = Message::parse(":nick!user@host PRIVMSG #rust :hello there").unwrap();
        assert_eq!(msg.source(), Some("nick!user@host"));
        assert_eq!(msg.command(), "PRIVMSG");
        assert_eq!(msg.params(), &["#rust".to_string(), "hello there".to_string()]);
        assert_eq!(msg.source_nick().as_deref(), Some("nick"));
    }

    #[test]
    fn test_parse_numeric_and_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z :irc.example 001 bot :Welcome").unwrap();
        assert_eq!(msg.command(), "001");
        assert_eq!(msg.param(1), Some("Welcome"));
        // Server sources carry no nickname.
        assert_eq!(msg.source_nick(), None);
    }

    #[test]
    fn test_parse_without_source_or_params() {
        let msg = Message::parse("QUIT").unwrap();
        assert_eq!(msg.source(), None);
        assert!(msg.params().is_empty());

        let msg = Message::parse("PING  irc.example").unwrap();
        assert_eq!(msg.param(0), Some("irc.example"));
    }

    #[test]
    fn test_parse_bare_nick_source() {
        let msg = Message::parse(":bot JOIN #test").unwrap();
        assert_eq!(msg.source_nick().as_deref(), Some("bot"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(Message::parse(":only-a-prefix"), Err(ProtocolError::MissingCommand(_))));
        assert!(matches!(Message::parse("PRIV/MSG x"), Err(ProtocolError::InvalidCommand(_))));
    }

    #[test]
    fn test_display_trailing_rules() {
        assert_eq!(Message::new("USER", ["bot", "0", "*", "bot"]).to_string(), "USER bot 0 * bot");
        assert_eq!(
            Message::new("PRIVMSG", ["#a", "hi there"]).to_string(),
            "PRIVMSG #a :hi there"
        );
        assert_eq!(Message::new("TOPIC", ["#a", ""]).to_string(), "TOPIC #a :");
        assert_eq!(Message::new("PRIVMSG", ["#a", ":)"]).to_string(), "PRIVMSG #a ::)");
    }

    #[test]
    fn test_display_parse_round_trip() {
        let messages = [
            Message::new("PRIVMSG", ["#a", "hello world"]).with_source("n!u@h"),
            Message::new("353", ["bot", "=", "#a", "@op +voice plain"]).with_source("irc.example"),
            Message::new("JOIN", ["#a"]),
            Message::new("PART", ["#a", ""]),
        ];
        for msg in messages {
            assert_eq!(Message::parse(&msg.to_string()).unwrap(), msg);
        }
    }

    #[test]
    fn test_validate_rejects_injection() {
        let msg = Message::new("PRIVMSG", ["#a", "hi\r\nQUIT"]);
        assert!(matches!(msg.validate(), Err(ProtocolError::InvalidParam { index: 1, .. })));

        let msg = Message::new("PRIVMSG", ["#a b", "hi"]);
        assert!(matches!(msg.validate(), Err(ProtocolError::InvalidParam { index: 0, .. })));

        assert!(Message::new("PRIVMSG", ["#a", "fine text"]).validate().is_ok());
    }

    #[test]
    fn test_parse_normalizes_known_commands() {
        let msg = Message::parse(":alice!a@host privmsg #a :hi").unwrap();
        assert_eq!(msg.command(), "PRIVMSG");
        assert_eq!(msg.params(), &["#a".to_string(), "hi".to_string()]);

        let msg = Message::parse(":irc.example MODE #a +o-v alice bob").unwrap();
        assert_eq!(msg.params(), &["#a", "+o-v", "alice", "bob"]);

        let msg = Message::parse("PART #a :").unwrap();
        assert_eq!(msg.params(), &["#a".to_string(), String::new()]);
    }
}
