use crate::app::channels::ChannelRegistry;
use chrono::{DateTime, Local};
use std::collections::VecDeque;

/// Lifecycle of the engine. Only the engine moves between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connecting,
    Registering,
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Message,
    Notice,
    Outgoing,
    Join,
    Part,
    Kick,
    Quit,
}

/// One entry of a channel's history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub timestamp: DateTime<Local>,
    pub sender: String,
    pub text: String,
    pub kind: MessageKind,
}

impl ChannelMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            timestamp: Local::now(),
            sender: sender.into(),
            text: text.into(),
            kind,
        }
    }
}

/// Server metadata gathered from numeric replies.
///
/// Scalar fields are set once per reply type. The feature list and MOTD lines
/// only ever grow for the lifetime of a connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub welcome_message: Option<String>,
    pub host: Option<String>,
    pub creation_time: Option<String>,
    pub supported_features: Vec<String>,

    pub max_connection_count: Option<u64>,
    pub max_client_count: Option<u64>,
    pub total_connections_received: Option<u64>,

    pub user_count: Option<u64>,
    pub invisible_count: Option<u64>,
    pub server_count: Option<u64>,
    pub operator_count: Option<u64>,
    pub unknown_count: Option<u64>,
    pub channel_count: Option<u64>,
    pub local_client_count: Option<u64>,
    pub local_server_count: Option<u64>,
    pub local_user_count: Option<u64>,
    pub max_local_user_count: Option<u64>,
    pub global_user_count: Option<u64>,
    pub max_global_user_count: Option<u64>,

    pub motd_header: Option<String>,
    pub motd: Vec<String>,
    pub(crate) motd_open: bool,
}

/// A received PRIVMSG waiting to be handed to the presentation layer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Channel name, or the sender's nick for a private message.
    pub target: String,
    pub record: ChannelMessage,
}

/// Everything the protocol handlers mutate. Guarded by the session lock.
#[derive(Debug)]
pub struct SessionState {
    pub(crate) nickname: String,
    pub(crate) username: String,
    pub(crate) registry: ChannelRegistry,
    pub(crate) server_info: ServerInfo,
    pub(crate) mode: Option<String>,
    pub(crate) active_channel: Option<String>,
    pub(crate) registered: bool,
    pub(crate) alt_nicks: Vec<String>,
    pub(crate) alt_nick_index: usize,
    pub(crate) inbox: VecDeque<Delivery>,
}

impl SessionState {
    pub fn new(nickname: impl Into<String>) -> Self {
        let nickname = nickname.into();
        Self {
            username: nickname.clone(),
            nickname,
            registry: ChannelRegistry::new(),
            server_info: ServerInfo::default(),
            mode: None,
            active_channel: None,
            registered: false,
            alt_nicks: Vec::new(),
            alt_nick_index: 0,
            inbox: VecDeque::new(),
        }
    }

    /// Prepare for a fresh connection. Channel history survives in the
    /// archive; server metadata starts over.
    pub(crate) fn reset(&mut self, nickname: &str, alt_nicks: &[String]) {
        self.nickname = nickname.to_string();
        self.username = nickname.to_string();
        self.alt_nicks = alt_nicks.to_vec();
        self.registry.archive_all();
        self.server_info = ServerInfo::default();
        self.mode = None;
        self.registered = false;
        self.alt_nick_index = 0;
        self.inbox.clear();
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_own_nick(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nickname)
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn active_channel(&self) -> Option<&str> {
        self.active_channel.as_deref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}
