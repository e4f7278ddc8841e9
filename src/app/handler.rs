//! Baseline command handlers and the opt-in extension catalog.

use crate::app::dispatch::{source, Context, Extension, Handler};
use crate::app::hooks::Event;
use crate::app::state::{ChannelMessage, Delivery, MessageKind, SessionState};
use crate::config::nickname::alternate_nick;
use crate::error::HandlerError;
use crate::irc::commands;
use crate::irc::message::Message;
use crate::irc::numeric;
use irc::proto::ChannelExt;
use tracing::{error, info, warn};

pub const BASELINE: &[(&str, Handler)] = &[
    ("PING", handle_ping),
    ("JOIN", handle_join),
    ("PART", handle_part),
    ("KICK", handle_kick),
    ("NICK", handle_nick),
    ("NOTICE", handle_notice),
    ("MODE", handle_mode),
    ("PRIVMSG", handle_privmsg),
    ("TOPIC", handle_topic),
    ("QUIT", handle_quit),
    ("ERROR", handle_error),
    (numeric::RPL_TOPIC, handle_topic_reply),
    (numeric::ERR_NICKNAMEINUSE, handle_nick_in_use),
];

pub const EXTENSIONS: &[Extension] = &[
    Extension {
        name: "auto-rejoin",
        command: "KICK",
        handler: rejoin_on_kick,
    },
    Extension {
        name: "accept-invite",
        command: "INVITE",
        handler: join_on_invite,
    },
];

pub(crate) fn param(msg: &Message, index: usize) -> Result<&str, HandlerError> {
    msg.param(index).ok_or(HandlerError::MissingParam { index })
}

/// Sender nick, falling back to the raw source for server messages.
fn sender(msg: &Message) -> String {
    msg.source_nick().unwrap_or_else(|| source(msg).to_string())
}

/// Point the active channel somewhere else after leaving `channel`.
fn leave_active(ctx: &mut Context<'_>, channel: &str) {
    let was_active = ctx
        .state
        .active_channel
        .as_deref()
        .is_some_and(|active| active.eq_ignore_ascii_case(channel));
    if was_active {
        let next = ctx.state.registry.active().next().map(|c| c.name().to_string());
        ctx.state.active_channel = next.clone();
        ctx.emit(Event::ActiveChannel(next));
    }
}

fn record(state: &mut SessionState, channel: &str, sender: &str, text: &str, kind: MessageKind) {
    state
        .registry
        .record_message(channel, ChannelMessage::new(sender, text, kind));
}

fn handle_ping(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    ctx.send(commands::pong(param(msg, 0)?));
    Ok(())
}

fn handle_join(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 0)?;
    let nick = sender(msg);

    if ctx.state.is_own_nick(&nick) {
        info!("[{}] Joined channel: {}", source(msg), channel);
        ctx.state.registry.confirm_join(channel);
        if ctx.state.active_channel.is_none() {
            ctx.state.active_channel = Some(channel.to_string());
            ctx.emit(Event::ActiveChannel(Some(channel.to_string())));
        }
    } else {
        info!("[{}] {} joined {}", source(msg), nick, channel);
    }

    ctx.state.registry.add_user(channel, &nick);
    record(ctx.state, channel, &nick, "joined", MessageKind::Join);
    ctx.emit(Event::Join {
        channel: channel.to_string(),
        nick,
    });
    Ok(())
}

fn handle_part(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 0)?;
    let reason = msg.param(1).unwrap_or_default();
    let nick = sender(msg);
    info!("[{}] User parted channel: {} ({})", source(msg), channel, reason);

    record(ctx.state, channel, &nick, reason, MessageKind::Part);
    if ctx.state.is_own_nick(&nick) {
        ctx.state.registry.archive_channel(channel);
        leave_active(ctx, channel);
    } else {
        ctx.state.registry.remove_user(channel, &nick);
    }
    ctx.emit(Event::Part {
        channel: channel.to_string(),
        nick,
    });
    Ok(())
}

fn handle_kick(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 0)?;
    let victim = param(msg, 1)?;
    let reason = msg.param(2).unwrap_or_default();
    let by = sender(msg);

    record(
        ctx.state,
        channel,
        &by,
        &format!("kicked {} ({})", victim, reason),
        MessageKind::Kick,
    );
    if ctx.state.is_own_nick(victim) {
        warn!("[{}] Kicked from {} by {}: {}", source(msg), channel, by, reason);
        ctx.state.registry.archive_channel(channel);
        leave_active(ctx, channel);
    } else {
        info!("[{}] {} kicked {} from {}", source(msg), by, victim, channel);
        ctx.state.registry.remove_user(channel, victim);
    }
    ctx.emit(Event::Part {
        channel: channel.to_string(),
        nick: victim.to_string(),
    });
    Ok(())
}

fn handle_nick(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let new = param(msg, 0)?;
    let old = sender(msg);
    if ctx.state.is_own_nick(&old) {
        info!("[{}] Your nick is now {}", source(msg), new);
        ctx.state.nickname = new.to_string();
    } else {
        info!("[{}] {} is now known as {}", source(msg), old, new);
    }
    ctx.state.registry.rename_user(&old, new);
    Ok(())
}

fn handle_notice(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let target = param(msg, 0)?;
    let text = param(msg, 1)?;
    info!("[{}] NOTICE: {}", source(msg), text);
    if target.is_channel_name() {
        record(ctx.state, target, &sender(msg), text, MessageKind::Notice);
    }
    Ok(())
}

fn handle_mode(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let target = param(msg, 0)?;
    let mode = param(msg, 1)?;
    if ctx.state.is_own_nick(target) {
        info!("[{}] Your mode is: {}", source(msg), mode);
        ctx.state.mode = Some(mode.to_string());
    } else {
        info!("[{}] Mode {} {}", source(msg), target, msg.params()[1..].join(" "));
    }
    Ok(())
}

fn handle_privmsg(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let target = param(msg, 0)?;
    let text = param(msg, 1)?;
    let nick = sender(msg);
    info!("[{}] {}: {}", source(msg), target, text);

    let entry = ChannelMessage::new(nick.as_str(), text, MessageKind::Message);
    let target = if target.is_channel_name() {
        ctx.state.registry.record_message(target, entry.clone());
        target.to_string()
    } else {
        nick
    };
    ctx.state.inbox.push_back(Delivery {
        target,
        record: entry,
    });
    Ok(())
}

fn handle_topic(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 0)?;
    let topic = param(msg, 1)?;
    info!("[{}] Topic for {}: {}", source(msg), channel, topic);
    ctx.state.registry.set_topic(channel, topic);
    Ok(())
}

fn handle_topic_reply(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 1)?;
    let topic = param(msg, 2)?;
    info!("[{}] Topic for {}: {}", source(msg), channel, topic);
    ctx.state.registry.set_topic(channel, topic);
    Ok(())
}

fn handle_quit(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let reason = msg.param(0).unwrap_or_default();
    match msg.source_nick() {
        Some(nick) if !ctx.state.is_own_nick(&nick) => {
            info!("[{}] {} quit: {}", source(msg), nick, reason);
            for channel in ctx.state.registry.remove_user_everywhere(&nick) {
                record(ctx.state, &channel, &nick, reason, MessageKind::Quit);
                ctx.emit(Event::Part {
                    channel,
                    nick: nick.clone(),
                });
            }
        }
        _ => info!("[{}] Quit: {}", source(msg), reason),
    }
    Ok(())
}

fn handle_error(_ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    error!("[{}] Error: {}", source(msg), msg.param(0).unwrap_or_default());
    Ok(())
}

/// 433 during registration: retry with the next alternate nick.
fn handle_nick_in_use(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let taken = param(msg, 1)?;
    if ctx.state.registered {
        warn!("[{}] Nickname {} is already in use", source(msg), taken);
        return Ok(());
    }

    let state = &mut *ctx.state;
    let next = alternate_nick(&state.username, &state.alt_nicks, state.alt_nick_index);
    state.alt_nick_index += 1;
    warn!("[{}] Nickname {} is in use, trying {}", source(msg), taken, next);
    state.nickname = next.clone();
    ctx.send(commands::nick(&next));
    Ok(())
}

fn rejoin_on_kick(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 0)?;
    if !ctx.state.is_own_nick(param(msg, 1)?) {
        return Ok(());
    }
    info!("[{}] Rejoining {}", source(msg), channel);
    if let Some(join) = ctx.state.registry.join(channel, None) {
        ctx.send(join);
    }
    Ok(())
}

fn join_on_invite(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let invited = param(msg, 0)?;
    let channel = param(msg, 1)?;
    if !ctx.state.is_own_nick(invited) {
        return Ok(());
    }
    info!("[{}] Invited to {}, joining", source(msg), channel);
    if let Some(join) = ctx.state.registry.join(channel, None) {
        ctx.send(join);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::channels::JoinState;
    use crate::app::dispatch::Dispatcher;

    struct Session {
        dispatcher: Dispatcher,
        state: SessionState,
    }

    impl Session {
        fn new(extensions: &[&str]) -> Self {
            let mut dispatcher = Dispatcher::with_defaults();
            for name in extensions {
                dispatcher.enable_extension(name).unwrap();
            }
            Self {
                dispatcher,
                state: SessionState::new("bot"),
            }
        }

        fn feed(&mut self, line: &str) -> (Vec<Message>, Vec<Event>) {
            let mut ctx = Context::new(&mut self.state);
            self.dispatcher.dispatch(&mut ctx, &Message::parse(line).unwrap());
            ctx.into_parts()
        }

        fn joined(&mut self, channel: &str) {
            self.state.registry.join(channel, None);
            self.feed(&format!(":bot!b@host JOIN {}", channel));
        }
    }

    #[test]
    fn test_own_join_echo_confirms() {
        let mut s = Session::new(&[]);
        s.state.registry.join("#test", None);
        assert!(!s.state.channels().get("#test").unwrap().joined());

        let (_, events) = s.feed(":bot!b@host JOIN #test");
        let channel = s.state.channels().get("#test").unwrap();
        assert!(channel.joined());
        assert!(channel.users().contains("bot"));
        assert_eq!(s.state.active_channel(), Some("#test"));
        assert!(events.contains(&Event::ActiveChannel(Some("#test".into()))));
    }

    #[test]
    fn test_other_join_does_not_confirm() {
        let mut s = Session::new(&[]);
        s.state.registry.join("#test", None);
        s.feed(":alice!a@host JOIN #test");
        let channel = s.state.channels().get("#test").unwrap();
        assert!(!channel.joined());
        assert!(channel.users().contains("alice"));
    }

    #[test]
    fn test_server_forced_join_creates_channel() {
        let mut s = Session::new(&[]);
        s.feed(":bot!b@host JOIN #forced");
        assert!(s.state.channels().get("#forced").unwrap().joined());
    }

    #[test]
    fn test_part_and_kick() {
        let mut s = Session::new(&[]);
        s.joined("#a");
        s.joined("#b");
        s.feed(":alice!a@host JOIN #a");
        s.feed(":alice!a@host PART #a :later");
        assert!(!s.state.channels().get("#a").unwrap().users().contains("alice"));

        s.feed(":op!o@host KICK #a bot :out");
        assert!(!s.state.channels().is_active("#a"));
        let archived = s.state.channels().archived("#a").unwrap();
        assert_eq!(archived.join_state(), JoinState::Parted);
        assert_eq!(s.state.active_channel(), Some("#b"));

        s.feed(":bot!b@host PART #b");
        assert!(!s.state.channels().is_active("#b"));
        assert_eq!(s.state.active_channel(), None);
    }

    #[test]
    fn test_quit_and_nick_update_members() {
        let mut s = Session::new(&[]);
        s.joined("#a");
        s.feed(":alice!a@host JOIN #a");
        s.feed(":alice!a@host NICK alicia");
        assert!(s.state.channels().get("#a").unwrap().users().contains("alicia"));

        let (_, events) = s.feed(":alicia!a@host QUIT :bye");
        assert!(!s.state.channels().get("#a").unwrap().users().contains("alicia"));
        assert_eq!(
            events,
            [Event::Part {
                channel: "#a".into(),
                nick: "alicia".into()
            }]
        );

        s.feed(":bot!b@host NICK bot2");
        assert_eq!(s.state.nickname(), "bot2");
    }

    #[test]
    fn test_privmsg_channel_and_private() {
        let mut s = Session::new(&[]);
        s.joined("#a");
        s.feed(":alice!a@host PRIVMSG #a :hello all");
        s.feed(":alice!a@host PRIVMSG bot :psst");

        let history = s.state.channels().get("#a").unwrap().messages();
        let last = history.last().unwrap();
        assert_eq!((last.sender.as_str(), last.text.as_str()), ("alice", "hello all"));

        let targets: Vec<_> = s.state.inbox.iter().map(|d| d.target.as_str()).collect();
        assert_eq!(targets, ["#a", "alice"]);
        assert!(s.state.channels().get("alice").is_none());
    }

    #[test]
    fn test_mode_and_topic() {
        let mut s = Session::new(&[]);
        s.joined("#a");
        s.feed(":bot MODE bot :+i");
        assert_eq!(s.state.mode(), Some("+i"));
        s.feed(":irc.example 332 bot #a :Welcome to #a");
        assert_eq!(s.state.channels().get("#a").unwrap().topic(), Some("Welcome to #a"));
        s.feed(":alice!a@host TOPIC #a :new topic");
        assert_eq!(s.state.channels().get("#a").unwrap().topic(), Some("new topic"));
    }

    #[test]
    fn test_nick_in_use_tries_alternates() {
        let mut s = Session::new(&[]);
        s.state.alt_nicks = vec!["bot_".into()];
        let (out, _) = s.feed(":irc.example 433 * bot :Nickname is already in use");
        assert_eq!(out, [commands::nick("bot_")]);
        assert_eq!(s.state.nickname(), "bot_");

        let (out, _) = s.feed(":irc.example 433 * bot_ :Nickname is already in use");
        let fallback = s.state.nickname().to_string();
        assert!(fallback.starts_with("bot") && fallback.len() == 5);
        assert_eq!(out, [commands::nick(&fallback)]);

        s.state.registered = true;
        let (out, _) = s.feed(":irc.example 433 bot5 other :Nickname is already in use");
        assert!(out.is_empty());
    }

    #[test]
    fn test_auto_rejoin() {
        let mut s = Session::new(&["auto-rejoin"]);
        s.joined("#a");
        let (out, _) = s.feed(":op!o@host KICK #a bot :out");
        assert_eq!(out, [commands::join("#a", None)]);
        assert_eq!(
            s.state.channels().get("#a").unwrap().join_state(),
            JoinState::Pending
        );

        let (out, _) = s.feed(":op!o@host KICK #a alice :out");
        assert!(out.is_empty());
    }

    #[test]
    fn test_accept_invite() {
        let mut s = Session::new(&["accept-invite"]);
        let (out, _) = s.feed(":alice!a@host INVITE bot :#secret");
        assert_eq!(out, [commands::join("#secret", None)]);
        let (out, _) = s.feed(":alice!a@host INVITE carol :#secret");
        assert!(out.is_empty());
    }
}
