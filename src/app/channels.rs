//! Channel membership and history.
//!
//! A channel lives in exactly one of two maps: `active` while joined or while
//! a JOIN is in flight, `archive` after parting. Moving between the maps keeps
//! the [`Channel`] value, so history and members survive a rejoin.
//!
//! Map keys are ASCII-lowercased; [`Channel::name`] keeps the spelling used
//! when the channel was first seen.

use crate::app::state::ChannelMessage;
use crate::error::HandlerError;
use crate::irc::commands;
use crate::irc::message::Message;
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Membership prefixes stripped from NAMES entries.
const MEMBER_PREFIXES: &[char] = &['~', '&', '@', '%', '+'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// JOIN sent, server echo not seen yet.
    Pending,
    Joined,
    /// The server refused the join.
    Failed,
    Parted,
}

#[derive(Debug)]
pub struct Channel {
    name: String,
    users: HashSet<String>,
    messages: Vec<ChannelMessage>,
    topic: Option<String>,
    state: watch::Sender<JoinState>,
}

impl Channel {
    fn new(name: &str) -> Self {
        let (state, _) = watch::channel(JoinState::Pending);
        Self {
            name: name.to_string(),
            users: HashSet::new(),
            messages: Vec::new(),
            topic: None,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn users(&self) -> &HashSet<String> {
        &self.users
    }

    pub fn messages(&self) -> &[ChannelMessage] {
        &self.messages
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn join_state(&self) -> JoinState {
        *self.state.borrow()
    }

    /// True once the server echoed our own JOIN.
    pub fn joined(&self) -> bool {
        self.join_state() == JoinState::Joined
    }

    pub fn failed(&self) -> bool {
        self.join_state() == JoinState::Failed
    }

    /// Watch the join state; used to wait for the server's confirmation.
    pub fn subscribe(&self) -> watch::Receiver<JoinState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: JoinState) {
        self.state.send_replace(state);
    }
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn strip_member_prefix(name: &str) -> &str {
    name.trim_start_matches(MEMBER_PREFIXES)
}

#[derive(Debug, Default)]
pub struct ChannelRegistry {
    active: HashMap<String, Channel>,
    archive: HashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start joining `name`. Returns the JOIN to send, or `None` when the
    /// channel is already joined.
    ///
    /// A previously parted channel is restored from the archive with its
    /// history intact.
    pub fn join(&mut self, name: &str, channel_key: Option<&str>) -> Option<Message> {
        let k = key(name);
        if let Some(channel) = self.active.get(&k) {
            if channel.joined() {
                warn!("Already joined channel: {}", name);
                return None;
            }
            channel.set_state(JoinState::Pending);
        } else {
            let channel = match self.archive.remove(&k) {
                Some(channel) => {
                    debug!("Restoring channel from archive: {}", name);
                    channel
                }
                None => Channel::new(name),
            };
            channel.set_state(JoinState::Pending);
            self.active.insert(k, channel);
        }
        Some(commands::join(name, channel_key))
    }

    /// Mark `name` joined after the server echoed our JOIN. Creates the entry
    /// when the join was not requested by us.
    pub fn confirm_join(&mut self, name: &str) {
        let k = key(name);
        if !self.active.contains_key(&k) {
            let channel = self.archive.remove(&k).unwrap_or_else(|| Channel::new(name));
            self.active.insert(k.clone(), channel);
        }
        if let Some(channel) = self.active.get(&k) {
            channel.set_state(JoinState::Joined);
        }
    }

    /// Undo [`join`](Self::join) when the JOIN never reached the server. A
    /// channel with history goes back to the archive.
    pub fn abandon_join(&mut self, name: &str) {
        let k = key(name);
        let Some(channel) = self.active.remove(&k) else {
            return;
        };
        channel.set_state(JoinState::Parted);
        if channel.messages.is_empty() && channel.users.is_empty() && channel.topic.is_none() {
            debug!("Dropping unsent join: {}", name);
        } else {
            self.archive.insert(k, channel);
        }
    }

    /// Leave `name`, archiving it. Returns the PART to send, or `None` when
    /// the channel is not active.
    pub fn part(&mut self, name: &str, reason: Option<&str>) -> Option<Message> {
        if !self.archive_channel(name) {
            warn!("Not in channel, cannot part: {}", name);
            return None;
        }
        Some(commands::part(name, reason))
    }

    /// Move an active channel to the archive without sending anything.
    pub fn archive_channel(&mut self, name: &str) -> bool {
        let k = key(name);
        match self.active.remove(&k) {
            Some(channel) => {
                channel.set_state(JoinState::Parted);
                self.archive.insert(k, channel);
                true
            }
            None => false,
        }
    }

    pub(crate) fn archive_all(&mut self) {
        let names: Vec<String> = self.active.keys().cloned().collect();
        for name in names {
            self.archive_channel(&name);
        }
    }

    /// Union `users` into the member set of an active channel. Returns how
    /// many were new.
    pub fn record_users<'a, I>(&mut self, name: &str, users: I) -> Result<usize, HandlerError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let channel = self
            .active
            .get_mut(&key(name))
            .ok_or_else(|| HandlerError::UnknownChannel(name.to_string()))?;
        let before = channel.users.len();
        channel.users.extend(
            users
                .into_iter()
                .map(strip_member_prefix)
                .filter(|nick| !nick.is_empty())
                .map(str::to_string),
        );
        Ok(channel.users.len() - before)
    }

    pub fn add_user(&mut self, name: &str, nick: &str) -> bool {
        match self.active.get_mut(&key(name)) {
            Some(channel) => channel.users.insert(nick.to_string()),
            None => false,
        }
    }

    pub fn remove_user(&mut self, name: &str, nick: &str) -> bool {
        match self.active.get_mut(&key(name)) {
            Some(channel) => channel.users.remove(nick),
            None => false,
        }
    }

    /// Drop `nick` from every active channel, returning the channels it left.
    pub fn remove_user_everywhere(&mut self, nick: &str) -> Vec<String> {
        self.active
            .values_mut()
            .filter_map(|channel| channel.users.remove(nick).then(|| channel.name.clone()))
            .collect()
    }

    pub fn rename_user(&mut self, old: &str, new: &str) {
        for channel in self.active.values_mut() {
            if channel.users.remove(old) {
                channel.users.insert(new.to_string());
            }
        }
    }

    /// Flag a rejected join. Waiters are released with the failure.
    pub fn mark_failed(&mut self, name: &str) -> bool {
        match self.active.get(&key(name)) {
            Some(channel) => {
                channel.set_state(JoinState::Failed);
                true
            }
            None => false,
        }
    }

    pub fn set_topic(&mut self, name: &str, topic: &str) -> bool {
        match self.active.get_mut(&key(name)) {
            Some(channel) => {
                channel.topic = Some(topic.to_string());
                true
            }
            None => false,
        }
    }

    /// Append to the history of an active channel.
    pub fn record_message(&mut self, name: &str, record: ChannelMessage) -> bool {
        match self.active.get_mut(&key(name)) {
            Some(channel) => {
                channel.messages.push(record);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<JoinState>> {
        self.active.get(&key(name)).map(Channel::subscribe)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active.contains_key(&key(name))
    }

    /// An active channel.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.active.get(&key(name))
    }

    pub fn archived(&self, name: &str) -> Option<&Channel> {
        self.archive.get(&key(name))
    }

    pub fn active(&self) -> impl Iterator<Item = &Channel> {
        self.active.values()
    }

    pub fn archive(&self) -> impl Iterator<Item = &Channel> {
        self.archive.values()
    }

    pub(crate) fn log_users(&self, name: &str) {
        if let Some(channel) = self.get(name) {
            let mut users: Vec<&str> = channel.users.iter().map(String::as_str).collect();
            users.sort_unstable();
            info!("Users in {}: {}", channel.name, users.join(" "));
        }
    }
}
