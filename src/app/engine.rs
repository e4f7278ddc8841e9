//! The runloop: connect, register, serve, and restart on interrupt.
//!
//! One task drives the receive side. It owns the decoder and the read half of
//! the connection, dispatches messages strictly in arrival order, and flushes
//! whatever the handlers queued before taking the next message. Everything
//! else talks to the session through a [`Client`].

use crate::app::client::{Client, Session};
use crate::app::dispatch::{
    stop_set, Context, Dispatcher, Handler, MAIN_STOP_SET, REGISTRATION_STOP_SET,
};
use crate::app::hooks::{Event, Hooks, NoHooks};
use crate::app::state::{Delivery, RunState, SessionState};
use crate::config::{Config, RetryConfig};
use crate::error::{EngineError, Result};
use crate::irc::codec::Decoder;
use crate::irc::commands;
use crate::irc::connection::{Connection, ConnectionReader, Incoming};
use crate::irc::message::Message;
use rand::RngExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A command in the active stop set was dispatched.
    Command(String),
    /// The server closed the connection.
    Closed,
    /// [`Client::stop`] or [`Client::quit`].
    Requested,
    /// [`Client::interrupt`]. QUIT has been sent.
    Interrupted,
}

pub struct EngineBuilder {
    config: Config,
    hooks: Arc<dyn Hooks>,
    handlers: Vec<(String, Handler)>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            hooks: Arc::new(NoHooks),
            handlers: Vec::new(),
        }
    }

    pub fn hooks(self, hooks: impl Hooks + 'static) -> Self {
        self.shared_hooks(Arc::new(hooks))
    }

    pub fn shared_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Handle `command` with `handler`. Commands already covered by the
    /// built-in handlers are rejected by [`build`](Self::build).
    pub fn handler(mut self, command: &str, handler: Handler) -> Self {
        self.handlers.push((command.to_string(), handler));
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let mut dispatcher = Dispatcher::with_defaults();
        for name in &self.config.extensions {
            dispatcher.enable_extension(name)?;
        }
        for (command, handler) in self.handlers {
            dispatcher.register(&command, handler)?;
        }

        let state = SessionState::new(self.config.user.clone());
        let session = Arc::new(Session::new(
            state,
            self.hooks,
            self.config.join_timeout(),
        ));
        Ok(Engine {
            config: self.config,
            dispatcher,
            session,
            decoder: Decoder::new(),
            backlog: VecDeque::new(),
        })
    }
}

pub struct Engine {
    config: Config,
    dispatcher: Dispatcher,
    session: Arc<Session>,
    decoder: Decoder,
    /// Decoded messages not yet dispatched.
    backlog: VecDeque<Message>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// A handle for sending commands and reading state.
    pub fn client(&self) -> Client {
        Client::new(self.session.clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect and serve sessions until one ends without asking for a
    /// restart, or the retry budget is spent.
    pub async fn run(&mut self) -> Result<()> {
        let retry = self.config.retry.clone();
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.session.set_run_state(RunState::Connecting);
            let connection = match Connection::connect(
                &self.config.server,
                self.config.port,
                self.config.tls,
                self.config.accept_invalid_certs,
            )
            .await
            {
                Ok(connection) => connection,
                Err(e) => {
                    error!("{}", e);
                    self.session.set_run_state(RunState::Stopped);
                    return Err(e.into());
                }
            };

            let restart = match self.serve(connection).await? {
                StopReason::Interrupted => true,
                StopReason::Closed => retry.reconnect_on_close,
                _ => false,
            };
            if !restart {
                return Ok(());
            }
            if attempt >= retry.max_attempts {
                warn!("Giving up after {} sessions", attempt);
                return Err(EngineError::RetriesExhausted { attempts: attempt });
            }

            let delay = reconnect_delay(&retry, attempt);
            info!(
                "[{}] Reconnecting in {:.1}s (attempt {}/{})",
                self.config.server,
                delay.as_secs_f64(),
                attempt + 1,
                retry.max_attempts
            );
            tokio::time::sleep(delay).await;

            if self.session.take_stop() {
                info!("[{}] Stop requested while reconnecting", self.config.server);
                return Ok(());
            }
            if self.session.take_interrupt() {
                info!("[{}] Interrupt ignored, already reconnecting", self.config.server);
            }
        }
    }

    /// Run one session over an established connection: register, join the
    /// configured channels, then dispatch until a stop condition.
    pub async fn serve(&mut self, connection: Connection) -> Result<StopReason> {
        let (mut reader, writer) = connection.split();
        self.decoder = Decoder::new();
        self.backlog.clear();
        // A cancelled session can leave the registration set installed.
        self.dispatcher.replace_stop_set(stop_set(MAIN_STOP_SET));
        self.session
            .lock_state()
            .reset(&self.config.user, &self.config.alt_nicks);
        self.session.attach(writer).await;
        self.session.set_run_state(RunState::Connecting);

        let result = self.session_loop(&mut reader).await;

        self.session.set_run_state(RunState::Stopping);
        match &result {
            Ok(reason) => info!("[{}] Session ended: {:?}", self.config.server, reason),
            Err(e) => error!("[{}] Session failed: {}", self.config.server, e),
        }
        self.deliver(Vec::new(), false);
        self.session.detach().await;
        self.session.set_run_state(RunState::Stopped);
        result
    }

    async fn session_loop(&mut self, reader: &mut ConnectionReader) -> Result<StopReason> {
        let reason = match self.register(reader).await? {
            Some(reason) => reason,
            None => {
                self.session.set_run_state(RunState::Active);
                self.join_configured().await?;
                self.drive(reader).await?
            }
        };

        if reason == StopReason::Interrupted {
            let quit = commands::quit(self.config.quit_message.as_deref());
            if let Err(e) = self.session.send_all(vec![quit]).await {
                warn!("Failed to send QUIT: {}", e);
            }
        }
        Ok(reason)
    }

    /// Send USER/NICK and run the receive loop until the end of the MOTD.
    /// Returns the stop reason if the loop ended any other way.
    async fn register(&mut self, reader: &mut ConnectionReader) -> Result<Option<StopReason>> {
        self.session.set_run_state(RunState::Registering);
        let user = commands::user(&self.config.user, self.config.realname.as_deref());
        let nick = commands::nick(&self.config.user);
        self.session.send_all(vec![user, nick]).await?;

        let previous = self
            .dispatcher
            .replace_stop_set(stop_set(REGISTRATION_STOP_SET));
        let result = self.drive(reader).await;
        self.dispatcher.replace_stop_set(previous);

        match result? {
            StopReason::Command(command) if REGISTRATION_STOP_SET.contains(&command.as_str()) => {
                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    async fn join_configured(&mut self) -> Result<()> {
        let joins: Vec<Message> = {
            let mut state = self.session.lock_state();
            state.registered = true;
            info!(
                "[{}] Registered as {}. Supported features: {}",
                self.config.server,
                state.nickname,
                state.server_info.supported_features.join(" ")
            );
            self.config
                .channels
                .iter()
                .filter_map(|channel| state.registry.join(channel, None))
                .collect()
        };
        self.session.send_all(joins).await
    }

    /// Receive and dispatch until the current stop set fires, the peer
    /// closes, or a stop is requested.
    async fn drive(&mut self, reader: &mut ConnectionReader) -> Result<StopReason> {
        let poll = self.config.poll_interval();
        loop {
            if let Some(reason) = self.requested_stop() {
                return Ok(reason);
            }
            if !self.backlog.is_empty() {
                if let Some(reason) = self.process_backlog().await? {
                    return Ok(reason);
                }
                continue;
            }

            match reader.receive(poll).await? {
                Incoming::Timeout => self.deliver(Vec::new(), false),
                Incoming::Closed => {
                    info!("[{}] Connection closed by peer", self.config.server);
                    return Ok(StopReason::Closed);
                }
                Incoming::Data(bytes) => {
                    let server = &self.config.server;
                    let messages = self
                        .decoder
                        .decode(&bytes)
                        .inspect_err(|e| error!("[{}] Protocol desync: {}", server, e))?;
                    self.backlog.extend(messages);
                }
            }
        }
    }

    /// Dispatch queued messages one at a time, flushing each handler's
    /// outbox before the next. Messages after a stop stay queued for the
    /// next loop.
    async fn process_backlog(&mut self) -> Result<Option<StopReason>> {
        let mut events = Vec::new();
        let mut stop = None;
        while let Some(msg) = self.backlog.pop_front() {
            let (outbox, stopped) = {
                let mut state = self.session.lock_state();
                let mut ctx = Context::new(&mut state);
                let stopped = self.dispatcher.dispatch(&mut ctx, &msg);
                let (outbox, queued) = ctx.into_parts();
                events.extend(queued);
                (outbox, stopped)
            };
            self.session.send_all(outbox).await?;

            if stopped {
                stop = Some(StopReason::Command(msg.command().to_string()));
                break;
            }
            if let Some(reason) = self.requested_stop() {
                stop = Some(reason);
                break;
            }
        }
        self.deliver(events, true);
        Ok(stop)
    }

    fn requested_stop(&self) -> Option<StopReason> {
        if self.session.take_interrupt() {
            Some(StopReason::Interrupted)
        } else if self.session.take_stop() {
            Some(StopReason::Requested)
        } else {
            None
        }
    }

    /// Hand queued events and received messages to the hooks, then signal a
    /// single update.
    fn deliver(&self, events: Vec<Event>, processed: bool) {
        let inbox: Vec<Delivery> = self.session.lock_state().inbox.drain(..).collect();
        if events.is_empty() && inbox.is_empty() && !processed {
            return;
        }
        let hooks = self.session.hooks.as_ref();
        for event in &events {
            event.deliver(hooks);
        }
        for delivery in &inbox {
            hooks.on_message(&delivery.target, &delivery.record);
        }
        hooks.on_update();
    }
}

/// Exponential backoff with up to 10% jitter, capped at `max_delay_ms`
/// before jitter.
pub fn reconnect_delay(retry: &RetryConfig, attempt: u32) -> Duration {
    let multiplier = BACKOFF_MULTIPLIER.powi(attempt.saturating_sub(1) as i32);
    let delay_ms = (retry.base_delay_ms as f64 * multiplier).min(retry.max_delay_ms as f64) as u64;
    let jitter = rand::rng().random_range(0..=delay_ms / 10);
    Duration::from_millis(delay_ms + jitter)
}
