//! Command-token → handler registry and stop-command evaluation.

use crate::app::handler;
use crate::app::hooks::Event;
use crate::app::replies;
use crate::app::state::SessionState;
use crate::error::{EngineError, HandlerError};
use crate::irc::message::Message;
use crate::irc::numeric;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// A protocol handler. Runs on the receive task with the session state
/// locked, so it may only queue outgoing messages, never wait on them.
pub type Handler = fn(&mut Context<'_>, &Message) -> Result<(), HandlerError>;

/// Commands that end the long-lived main loop.
pub const MAIN_STOP_SET: &[&str] = &["QUIT", "ERROR"];

/// Commands that end the registration loop.
pub const REGISTRATION_STOP_SET: &[&str] = &[numeric::RPL_ENDOFMOTD, numeric::ERR_NOMOTD];

/// What a handler can touch: the session state, an outbox flushed after the
/// handler returns, and the presentation event queue.
pub struct Context<'a> {
    pub(crate) state: &'a mut SessionState,
    outbox: Vec<Message>,
    events: Vec<Event>,
}

impl<'a> Context<'a> {
    pub fn new(state: &'a mut SessionState) -> Self {
        Self {
            state,
            outbox: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        self.state
    }

    /// Queue a message for sending once dispatch of the current message is
    /// complete.
    pub fn send(&mut self, msg: Message) {
        self.outbox.push(msg);
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn into_parts(self) -> (Vec<Message>, Vec<Event>) {
        (self.outbox, self.events)
    }
}

/// An opt-in handler from the extension catalog. Extensions run after the
/// primary handler for the same command.
#[derive(Clone, Copy)]
pub struct Extension {
    pub name: &'static str,
    pub command: &'static str,
    pub handler: Handler,
}

pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
    extensions: HashMap<String, Vec<Handler>>,
    stop_set: HashSet<String>,
}

impl Dispatcher {
    /// An empty dispatcher stopping on the main stop set.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            extensions: HashMap::new(),
            stop_set: MAIN_STOP_SET.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// The baseline command handlers plus the numeric reply aggregator.
    pub fn with_defaults() -> Self {
        let mut dispatcher = Self::new();
        for (command, handler) in handler::BASELINE.iter().chain(replies::REPLIES) {
            dispatcher.handlers.insert(command.to_string(), *handler);
        }
        dispatcher
    }

    /// Add a handler for `command`. Fails if one is already registered.
    pub fn register(&mut self, command: &str, handler: Handler) -> Result<(), EngineError> {
        if self.handlers.contains_key(command) {
            return Err(EngineError::DuplicateHandler(command.to_string()));
        }
        self.handlers.insert(command.to_string(), handler);
        Ok(())
    }

    /// Enable a catalog extension by name.
    pub fn enable_extension(&mut self, name: &str) -> Result<(), EngineError> {
        let extension = handler::EXTENSIONS
            .iter()
            .find(|ext| ext.name == name)
            .ok_or_else(|| EngineError::UnknownExtension(name.to_string()))?;
        self.extensions
            .entry(extension.command.to_string())
            .or_default()
            .push(extension.handler);
        Ok(())
    }

    pub fn handles(&self, command: &str) -> bool {
        self.handlers.contains_key(command) || self.extensions.contains_key(command)
    }

    /// Swap in a new stop set, returning the previous one.
    pub fn replace_stop_set(&mut self, commands: HashSet<String>) -> HashSet<String> {
        std::mem::replace(&mut self.stop_set, commands)
    }

    pub fn stop_set(&self) -> &HashSet<String> {
        &self.stop_set
    }

    /// Run the handler for `msg` and report whether it ends the current loop.
    ///
    /// Handler errors are logged and contained here.
    pub fn dispatch(&self, ctx: &mut Context<'_>, msg: &Message) -> bool {
        let command = msg.command();
        if numeric::is_numeric(command) {
            ctx.emit(Event::Numeric(msg.clone()));
        }

        let primary = self.handlers.get(command);
        let extra = self.extensions.get(command);
        if primary.is_none() && extra.is_none() {
            warn!("[{}] Unhandled command: {}", source(msg), msg);
        }

        for handler in primary.into_iter().chain(extra.into_iter().flatten()) {
            if let Err(e) = handler(ctx, msg) {
                warn!("[{}] Malformed {}: {} ({})", source(msg), command, e, msg);
            }
        }

        self.is_stop(ctx.state, msg)
    }

    /// A QUIT from another user is a membership change; only our own QUIT or
    /// a server-issued one ends the session.
    fn is_stop(&self, state: &SessionState, msg: &Message) -> bool {
        if !self.stop_set.contains(msg.command()) {
            return false;
        }
        if msg.command() == "QUIT" {
            if let Some(nick) = msg.source_nick() {
                return state.is_own_nick(&nick);
            }
        }
        true
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Stop set built from a list of command tokens.
pub fn stop_set(commands: &[&str]) -> HashSet<String> {
    commands.iter().map(|c| c.to_string()).collect()
}

pub(crate) fn source(msg: &Message) -> &str {
    msg.source().unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Message {
        Message::parse(line).unwrap()
    }

    fn run(dispatcher: &Dispatcher, state: &mut SessionState, line: &str) -> (bool, Vec<Message>) {
        let mut ctx = Context::new(state);
        let stop = dispatcher.dispatch(&mut ctx, &parse(line));
        (stop, ctx.into_parts().0)
    }

    #[test]
    fn test_ping_queues_pong() {
        let dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");
        let (stop, out) = run(&dispatcher, &mut state, "PING :irc.example");
        assert!(!stop);
        assert_eq!(out, [Message::new("PONG", ["irc.example"])]);
    }

    #[test]
    fn test_unknown_command_is_ignored() {
        let dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");
        let (stop, out) = run(&dispatcher, &mut state, ":irc.example FOO bar");
        assert!(!stop);
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_contained() {
        let dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");
        let (stop, _) = run(&dispatcher, &mut state, ":irc.example 252 bot lots :operators");
        assert!(!stop);
        assert_eq!(state.server_info().operator_count, None);
    }

    #[test]
    fn test_stop_set_swap() {
        let mut dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");

        let previous = dispatcher.replace_stop_set(stop_set(REGISTRATION_STOP_SET));
        assert!(!run(&dispatcher, &mut state, ":irc.example QUIT :bye").0);
        assert!(run(&dispatcher, &mut state, ":irc.example 376 bot :End of MOTD").0);

        dispatcher.replace_stop_set(previous);
        assert!(run(&dispatcher, &mut state, ":irc.example QUIT :bye").0);
        assert!(!run(&dispatcher, &mut state, ":irc.example 376 bot :End of MOTD").0);
    }

    #[test]
    fn test_quit_from_other_user_does_not_stop() {
        let dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");
        assert!(!run(&dispatcher, &mut state, ":alice!a@host QUIT :gone").0);
        assert!(run(&dispatcher, &mut state, ":bot!b@host QUIT :gone").0);
        assert!(run(&dispatcher, &mut state, "ERROR :Closing link").0);
    }

    #[test]
    fn test_duplicate_registration() {
        fn noop(_: &mut Context<'_>, _: &Message) -> Result<(), HandlerError> {
            Ok(())
        }

        let mut dispatcher = Dispatcher::with_defaults();
        assert!(matches!(
            dispatcher.register("PING", noop),
            Err(EngineError::DuplicateHandler(c)) if c == "PING"
        ));
        dispatcher.register("WALLOPS", noop).unwrap();
        assert!(dispatcher.handles("WALLOPS"));
    }

    #[test]
    fn test_extensions() {
        let mut dispatcher = Dispatcher::with_defaults();
        assert!(matches!(
            dispatcher.enable_extension("teleport"),
            Err(EngineError::UnknownExtension(_))
        ));
        assert!(!dispatcher.handles("INVITE"));
        dispatcher.enable_extension("accept-invite").unwrap();
        assert!(dispatcher.handles("INVITE"));
    }

    #[test]
    fn test_numerics_emit_event() {
        let dispatcher = Dispatcher::with_defaults();
        let mut state = SessionState::new("bot");
        let mut ctx = Context::new(&mut state);
        let msg = parse(":irc.example 001 bot :Welcome");
        dispatcher.dispatch(&mut ctx, &msg);
        let (_, events) = ctx.into_parts();
        assert_eq!(events, [Event::Numeric(msg)]);
    }
}
