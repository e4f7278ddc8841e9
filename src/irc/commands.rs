//! Builders for the commands the client sends.

use crate::irc::message::Message;

/// `USER <username> <mode> * <realname>`. The realname defaults to the
/// username.
pub fn user(username: &str, realname: Option<&str>) -> Message {
    Message::new("USER", [username, "0", "*", realname.unwrap_or(username)])
}

pub fn nick(nickname: &str) -> Message {
    Message::new("NICK", [nickname])
}

pub fn join(channel: &str, key: Option<&str>) -> Message {
    match key {
        Some(key) => Message::new("JOIN", [channel, key]),
        None => Message::new("JOIN", [channel]),
    }
}

pub fn part(channel: &str, reason: Option<&str>) -> Message {
    match reason {
        Some(reason) => Message::new("PART", [channel, reason]),
        None => Message::new("PART", [channel]),
    }
}

/// `PRIVMSG`. CTCP delimiters are stripped so user text cannot smuggle in a
/// CTCP request.
pub fn privmsg(target: &str, text: &str) -> Message {
    let clean = text.replace('\x01', "");
    Message::new("PRIVMSG", [target.to_string(), clean])
}

pub fn pong(server: &str) -> Message {
    Message::new("PONG", [server])
}

pub fn quit(reason: Option<&str>) -> Message {
    match reason {
        Some(reason) => Message::new("QUIT", [reason]),
        None => Message::new("QUIT", Vec::<String>::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_lines() {
        assert_eq!(user("bot", None).to_string(), "USER bot 0 * bot");
        assert_eq!(user("bot", Some("Real Name")).to_string(), "USER bot 0 * :Real Name");
        assert_eq!(nick("bot").to_string(), "NICK bot");
    }

    #[test]
    fn test_channel_commands() {
        assert_eq!(join("#test", None).to_string(), "JOIN #test");
        assert_eq!(join("#test", Some("secret")).to_string(), "JOIN #test secret");
        assert_eq!(part("#test", Some("bye now")).to_string(), "PART #test :bye now");
        assert_eq!(quit(None).to_string(), "QUIT");
    }

    #[test]
    fn test_privmsg_strips_ctcp() {
        assert_eq!(
            privmsg("#test", "\x01VERSION\x01").to_string(),
            "PRIVMSG #test VERSION"
        );
    }
}
