//! The command API handed to applications.
//!
//! A [`Client`] is a cheap, cloneable handle onto the shared [`Session`]. It
//! can be used from any task while the engine drives the receive loop.
//! Outgoing writes are serialized by the send lock, which covers encoding and
//! writing as one critical section.

use crate::app::channels::JoinState;
use crate::app::hooks::Hooks;
use crate::app::state::{ChannelMessage, MessageKind, RunState, SessionState};
use crate::error::{EngineError, Result};
use crate::irc::codec::Encoder;
use crate::irc::commands;
use crate::irc::connection::ConnectionWriter;
use crate::irc::message::Message;
use irc::proto::ChannelExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Write half of a live connection with its encoder.
pub(crate) struct Outbound {
    encoder: Encoder,
    writer: ConnectionWriter,
}

/// State shared between the engine and every [`Client`].
pub(crate) struct Session {
    outbound: tokio::sync::Mutex<Option<Outbound>>,
    state: Mutex<SessionState>,
    run_state: watch::Sender<RunState>,
    stop: AtomicBool,
    interrupt: AtomicBool,
    pub(crate) hooks: Arc<dyn Hooks>,
    join_timeout: Option<Duration>,
}

impl Session {
    pub(crate) fn new(
        state: SessionState,
        hooks: Arc<dyn Hooks>,
        join_timeout: Option<Duration>,
    ) -> Self {
        let (run_state, _) = watch::channel(RunState::Idle);
        Self {
            outbound: tokio::sync::Mutex::new(None),
            state: Mutex::new(state),
            run_state,
            stop: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            hooks,
            join_timeout,
        }
    }

    /// Lock the session state. Never held across an await point.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_run_state(&self, state: RunState) {
        let previous = self.run_state.send_replace(state);
        if previous != state {
            debug!("Run state: {:?} -> {:?}", previous, state);
        }
    }

    /// Install the write half of a new connection. Stop and interrupt
    /// requests made before this point are discarded.
    pub(crate) async fn attach(&self, writer: ConnectionWriter) {
        if self.stop.swap(false, Ordering::SeqCst) {
            info!("Discarding stop requested before the session started");
        }
        if self.interrupt.swap(false, Ordering::SeqCst) {
            info!("Discarding interrupt requested before the session started");
        }
        *self.outbound.lock().await = Some(Outbound {
            encoder: Encoder::new(),
            writer,
        });
    }

    pub(crate) async fn detach(&self) {
        if let Some(mut outbound) = self.outbound.lock().await.take() {
            outbound.writer.shutdown().await;
        }
    }

    /// Whether an interrupt or stop was requested, interrupt first.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupt.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn take_stop(&self) -> bool {
        self.stop.swap(false, Ordering::SeqCst)
    }

    /// Encode and write `messages` under one hold of the send lock.
    pub(crate) async fn send_all(&self, messages: Vec<Message>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut guard = self.outbound.lock().await;
        let outbound = guard.as_mut().ok_or(EngineError::NotConnected)?;
        for msg in &messages {
            outbound.encoder.push(msg)?;
            if msg.command() == "PONG" {
                trace!("Sending: {}", msg);
            } else {
                debug!("Sending: {}", msg);
            }
        }
        while !outbound.encoder.pending_bytes().is_empty() {
            let n = outbound.writer.send(outbound.encoder.pending_bytes()).await?;
            outbound.encoder.consume_sent(n);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.session.send_all(vec![msg]).await
    }

    pub async fn user(&self, username: &str, realname: Option<&str>) -> Result<()> {
        self.send(commands::user(username, realname)).await
    }

    /// Request a nick change. Our own nick is updated when the server echoes
    /// the NICK.
    pub async fn nick(&self, nickname: &str) -> Result<()> {
        self.send(commands::nick(nickname)).await
    }

    /// Join `channel` without waiting for the server. Does nothing if the
    /// channel is already joined.
    pub async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        let (msg, previous) = {
            let mut state = self.session.lock_state();
            let msg = state.registry.join(channel, key);
            let previous = state.active_channel.clone();
            if msg.is_some() {
                state.active_channel = Some(channel.to_string());
            }
            (msg, previous)
        };
        let Some(msg) = msg else {
            return Ok(());
        };
        if let Err(e) = self.send(msg).await {
            let mut state = self.session.lock_state();
            state.registry.abandon_join(channel);
            if state.active_channel.as_deref() == Some(channel) {
                state.active_channel = previous;
            }
            return Err(e);
        }
        let hooks = &self.session.hooks;
        hooks.on_active_channel(Some(channel));
        hooks.on_update();
        Ok(())
    }

    /// Part `channel`, or the active channel when `None`.
    pub async fn part(&self, channel: Option<&str>, reason: Option<&str>) -> Result<()> {
        let (msg, active) = {
            let mut state = self.session.lock_state();
            let Some(name) = channel
                .map(str::to_string)
                .or_else(|| state.active_channel.clone())
            else {
                warn!("No active channel to part");
                return Ok(());
            };
            let msg = state.registry.part(&name, reason);
            let was_active = state
                .active_channel
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(&name));
            let active = if was_active {
                let next = state.registry.active().next().map(|c| c.name().to_string());
                state.active_channel = next.clone();
                Some(next)
            } else {
                None
            };
            (msg, active)
        };
        if let Some(msg) = msg {
            self.send(msg).await?;
        }
        let hooks = &self.session.hooks;
        if let Some(active) = active {
            hooks.on_active_channel(active.as_deref());
        }
        hooks.on_update();
        Ok(())
    }

    /// Send `text` to `target`. A channel we are not in is joined first, and
    /// the call waits for the server to confirm the join.
    pub async fn msg(&self, target: &str, text: &str) -> Result<()> {
        if target.is_channel_name() {
            let (active, joined) = self.view(|state| {
                let channel = state.channels().get(target);
                (channel.is_some(), channel.is_some_and(|c| c.joined()))
            });
            if !joined {
                if !active {
                    self.join(target, None).await?;
                }
                self.await_joined(target).await?;
            }
        }

        self.send(commands::privmsg(target, text)).await?;
        {
            let mut state = self.session.lock_state();
            let nick = state.nickname.clone();
            state
                .registry
                .record_message(target, ChannelMessage::new(nick, text, MessageKind::Outgoing));
        }
        self.session.hooks.on_update();
        Ok(())
    }

    pub async fn pong(&self, server: &str) -> Result<()> {
        self.send(commands::pong(server)).await
    }

    /// Send QUIT and ask the engine to stop once it is processed.
    pub async fn quit(&self, reason: Option<&str>) -> Result<()> {
        let result = self.send(commands::quit(reason)).await;
        self.stop();
        result
    }

    /// Wait for the server to confirm our join to `channel`, using the
    /// configured join timeout.
    pub async fn await_joined(&self, channel: &str) -> Result<()> {
        self.await_joined_for(channel, self.session.join_timeout).await
    }

    /// Wait for the server to confirm our join to `channel`. `None` waits
    /// indefinitely.
    ///
    /// Must not be awaited from a hook or handler: the confirmation is
    /// delivered by the receive loop.
    pub async fn await_joined_for(&self, channel: &str, timeout: Option<Duration>) -> Result<()> {
        let mut rx = self
            .view(|state| state.channels().subscribe(channel))
            .ok_or_else(|| EngineError::UnknownChannel(channel.to_string()))?;

        let wait = rx.wait_for(|state| *state != JoinState::Pending);
        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| EngineError::JoinTimeout {
                    channel: channel.to_string(),
                    waited: limit,
                })?,
            None => wait.await,
        };

        match outcome.map(|state| *state) {
            Ok(JoinState::Joined) => Ok(()),
            Ok(_) => Err(EngineError::JoinRejected {
                channel: channel.to_string(),
            }),
            Err(_) => Err(EngineError::NotConnected),
        }
    }

    /// Read-only access to the session state.
    pub fn view<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        f(&self.session.lock_state())
    }

    pub fn run_state(&self) -> RunState {
        *self.session.run_state.borrow()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.session.run_state.subscribe()
    }

    /// Ask the engine to end the session. Observed between dispatches and at
    /// the receive timeout.
    pub fn stop(&self) {
        info!("Stop requested");
        self.session.stop.store(true, Ordering::SeqCst);
    }

    /// Ask the engine to quit and reconnect.
    pub fn interrupt(&self) {
        info!("Interrupt requested");
        self.session.interrupt.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::hooks::NoHooks;
    use crate::irc::connection::Connection;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    async fn connected(join_timeout: Option<Duration>) -> (Client, BufReader<DuplexStream>) {
        let (ours, theirs) = tokio::io::duplex(4096);
        let (_reader, writer) = Connection::from_stream(ours).split();
        let session = Arc::new(Session::new(
            SessionState::new("bot"),
            Arc::new(NoHooks),
            join_timeout,
        ));
        session.attach(writer).await;
        (Client::new(session), BufReader::new(theirs))
    }

    async fn next_line(server: &mut BufReader<DuplexStream>) -> String {
        let mut line = String::new();
        server.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let session = Arc::new(Session::new(SessionState::new("bot"), Arc::new(NoHooks), None));
        let client = Client::new(session);
        assert!(matches!(
            client.nick("bot").await,
            Err(EngineError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_join_and_part() {
        let (client, mut server) = connected(None).await;
        client.join("#a", None).await.unwrap();
        assert_eq!(next_line(&mut server).await, "JOIN #a\r\n");
        assert_eq!(client.view(|s| s.active_channel().map(str::to_string)), Some("#a".into()));

        client.part(None, Some("bye now")).await.unwrap();
        assert_eq!(next_line(&mut server).await, "PART #a :bye now\r\n");
        assert!(client.view(|s| s.channels().archived("#a").is_some()));
        assert_eq!(client.view(|s| s.active_channel().map(str::to_string)), None);
    }

    #[tokio::test]
    async fn test_msg_to_nick_is_sent_directly() {
        let (client, mut server) = connected(None).await;
        client.msg("alice", "hi there").await.unwrap();
        assert_eq!(next_line(&mut server).await, "PRIVMSG alice :hi there\r\n");
    }

    #[tokio::test]
    async fn test_msg_waits_for_join_confirmation() {
        let (client, mut server) = connected(None).await;

        let sender = client.clone();
        let pending = tokio::spawn(async move { sender.msg("#a", "hi").await });

        assert_eq!(next_line(&mut server).await, "JOIN #a\r\n");
        assert!(!pending.is_finished());

        client.session.lock_state().registry.confirm_join("#a");
        pending.await.unwrap().unwrap();
        assert_eq!(next_line(&mut server).await, "PRIVMSG #a hi\r\n");

        let history = client.view(|s| s.channels().get("#a").unwrap().messages().to_vec());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hi");
        assert_eq!(history[0].kind, MessageKind::Outgoing);
    }

    #[tokio::test]
    async fn test_await_joined_timeout_and_rejection() {
        let (client, _server) = connected(Some(Duration::from_millis(20))).await;
        client.join("#slow", None).await.unwrap();
        assert!(matches!(
            client.await_joined("#slow").await,
            Err(EngineError::JoinTimeout { .. })
        ));

        client.join("#locked", None).await.unwrap();
        client.session.lock_state().registry.mark_failed("#locked");
        assert!(matches!(
            client.await_joined("#locked").await,
            Err(EngineError::JoinRejected { .. })
        ));

        assert!(matches!(
            client.await_joined("#nowhere").await,
            Err(EngineError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_join_send_is_rolled_back() {
        let session = Arc::new(Session::new(SessionState::new("bot"), Arc::new(NoHooks), None));
        let client = Client::new(session);
        assert!(matches!(
            client.join("#a", None).await,
            Err(EngineError::NotConnected)
        ));
        assert!(client.view(|s| !s.channels().is_active("#a")));
        assert_eq!(client.view(|s| s.active_channel().map(str::to_string)), None);
    }

    #[tokio::test]
    async fn test_failed_msg_send_leaves_no_history() {
        let (client, _server) = connected(None).await;
        client.session.lock_state().registry.join("#a", None);
        client.session.lock_state().registry.confirm_join("#a");
        client.session.detach().await;

        assert!(matches!(
            client.msg("#a", "lost").await,
            Err(EngineError::NotConnected)
        ));
        assert!(client.view(|s| s.channels().get("#a").unwrap().messages().is_empty()));
    }

    #[tokio::test]
    async fn test_quit_requests_stop() {
        let (client, mut server) = connected(None).await;
        client.quit(Some("see you")).await.unwrap();
        assert_eq!(next_line(&mut server).await, "QUIT :see you\r\n");
        assert!(client.session.take_stop());
        assert!(!client.session.take_stop());
    }
}
