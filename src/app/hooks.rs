//! Observer interface for presentation layers.
//!
//! Handlers never call out to the presentation layer directly. They queue
//! [`Event`]s, and the engine delivers them to the installed [`Hooks`] after
//! each processed batch, followed by a single [`Hooks::on_update`].

use crate::app::state::ChannelMessage;
use crate::irc::message::Message;

/// Callbacks invoked from the receive task. Every method defaults to a no-op.
///
/// Implementations must not block: the receive loop is paused while a hook
/// runs. To send from a hook, clone the [`Client`](crate::app::client::Client)
/// into a spawned task.
pub trait Hooks: Send + Sync {
    fn on_join(&self, _channel: &str, _nick: &str) {}

    fn on_part(&self, _channel: &str, _nick: &str) {}

    /// A PRIVMSG addressed to a channel, or to us (`target` is then the
    /// sender's nick).
    fn on_message(&self, _target: &str, _record: &ChannelMessage) {}

    fn on_numeric(&self, _message: &Message) {}

    fn on_active_channel(&self, _channel: Option<&str>) {}

    fn on_join_failed(&self, _channel: &str) {}

    /// Something a view would redraw on has changed.
    fn on_update(&self) {}
}

/// Hooks that ignore everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// A notification queued by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Join { channel: String, nick: String },
    Part { channel: String, nick: String },
    Numeric(Message),
    ActiveChannel(Option<String>),
    JoinFailed(String),
}

impl Event {
    pub(crate) fn deliver(&self, hooks: &dyn Hooks) {
        match self {
            Event::Join { channel, nick } => hooks.on_join(channel, nick),
            Event::Part { channel, nick } => hooks.on_part(channel, nick),
            Event::Numeric(message) => hooks.on_numeric(message),
            Event::ActiveChannel(channel) => hooks.on_active_channel(channel.as_deref()),
            Event::JoinFailed(channel) => hooks.on_join_failed(channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Hooks for Recorder {
        fn on_join(&self, channel: &str, nick: &str) {
            self.calls.lock().unwrap().push(format!("join {} {}", channel, nick));
        }

        fn on_active_channel(&self, channel: Option<&str>) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("active {}", channel.unwrap_or("-")));
        }
    }

    #[test]
    fn test_events_route_to_hooks() {
        let hooks = Recorder::default();
        Event::Join {
            channel: "#a".into(),
            nick: "bob".into(),
        }
        .deliver(&hooks);
        Event::ActiveChannel(None).deliver(&hooks);
        // Unimplemented callbacks fall through to the defaults.
        Event::JoinFailed("#a".into()).deliver(&hooks);

        assert_eq!(*hooks.calls.lock().unwrap(), ["join #a bob", "active -"]);
    }
}
