//! Numeric reply handlers that build [`ServerInfo`](crate::app::state::ServerInfo)
//! and channel member lists.
//!
//! Payload layouts are positional and follow common ircd formatting, e.g.
//!
//! ```text
//! 250 bot :Highest connection count: 10 (9 clients) (100 connections received)
//! 251 bot :There are 5 users and 10 invisible on 2 servers
//! 255 bot :I have 7 clients and 1 servers
//! 265 bot 3 9 :Current local users 3, max 9
//! ```
//!
//! Every field of a reply is parsed before any is stored, so a malformed
//! reply leaves the record untouched.

use crate::app::dispatch::{source, Context, Handler};
use crate::app::handler::param;
use crate::app::hooks::Event;
use crate::error::HandlerError;
use crate::irc::message::Message;
use crate::irc::numeric::*;
use tracing::{debug, info, warn};

pub const REPLIES: &[(&str, Handler)] = &[
    (RPL_WELCOME, handle_welcome),
    (RPL_YOURHOST, handle_your_host),
    (RPL_CREATED, handle_created),
    (RPL_MYINFO, handle_my_info),
    (RPL_ISUPPORT, handle_isupport),
    (RPL_STATSCONN, handle_stats_conn),
    (RPL_LUSERCLIENT, handle_luser_client),
    (RPL_LUSEROP, handle_luser_op),
    (RPL_LUSERUNKNOWN, handle_luser_unknown),
    (RPL_LUSERCHANNELS, handle_luser_channels),
    (RPL_LUSERME, handle_luser_me),
    (RPL_LOCALUSERS, handle_local_users),
    (RPL_GLOBALUSERS, handle_global_users),
    (RPL_NAMREPLY, handle_names),
    (RPL_ENDOFNAMES, handle_end_of_names),
    (RPL_MOTDSTART, handle_motd_start),
    (RPL_MOTD, handle_motd),
    (RPL_ENDOFMOTD, handle_end_of_motd),
    (ERR_NOMOTD, handle_no_motd),
    (ERR_CHANNELISFULL, handle_join_failed),
    (ERR_INVITEONLYCHAN, handle_join_failed),
    (ERR_BANNEDFROMCHAN, handle_join_failed),
    (ERR_BADCHANNELKEY, handle_join_failed),
    (ERR_NEEDREGGEDNICK, handle_join_failed),
];

/// Space-separated token `index` of `text`.
fn token(text: &str, index: usize) -> Result<&str, HandlerError> {
    text.split(' ')
        .nth(index)
        .ok_or_else(|| HandlerError::MissingToken {
            index,
            text: text.to_string(),
        })
}

fn number(value: &str) -> Result<u64, HandlerError> {
    value.parse().map_err(|_| HandlerError::InvalidNumber {
        value: value.to_string(),
    })
}

/// A number wrapped in a one-character marker, as in `(9`.
fn marked_number(value: &str) -> Result<u64, HandlerError> {
    let mut chars = value.chars();
    chars.next();
    number(chars.as_str())
}

fn handle_welcome(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let welcome = param(msg, 1)?;
    info!("[{}] Welcome message: {}", source(msg), welcome);
    ctx.state.server_info.welcome_message = Some(welcome.to_string());
    ctx.state.registered = true;
    Ok(())
}

fn handle_your_host(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let host = param(msg, 1)?;
    info!("[{}] Your host is: {}", source(msg), host);
    ctx.state.server_info.host = Some(host.to_string());
    Ok(())
}

fn handle_created(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let created = param(msg, 1)?;
    info!("[{}] Server creation time: {}", source(msg), created);
    ctx.state.server_info.creation_time = Some(created.to_string());
    Ok(())
}

fn handle_my_info(_ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    debug!("[{}] Server info: {:?}", source(msg), msg.params());
    Ok(())
}

/// 005: everything between our nick and the trailing "are supported" text.
fn handle_isupport(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let params = msg.params();
    let features = params.get(1..params.len().saturating_sub(1)).unwrap_or_default();
    debug!("[{}] Supported features: {}", source(msg), features.join(" "));
    ctx.state
        .server_info
        .supported_features
        .extend(features.iter().cloned());
    Ok(())
}

fn handle_stats_conn(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let text = param(msg, 1)?;
    let connections = number(token(text, 3)?)?;
    let clients = marked_number(token(text, 4)?)?;
    let received = marked_number(token(text, 6)?)?;
    info!(
        "[{}] Highest connection count: {} ({} clients) - total connections: {}",
        source(msg),
        connections,
        clients,
        received
    );
    let info = &mut ctx.state.server_info;
    info.max_connection_count = Some(connections);
    info.max_client_count = Some(clients);
    info.total_connections_received = Some(received);
    Ok(())
}

fn handle_luser_client(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let text = param(msg, 1)?;
    let users = number(token(text, 2)?)?;
    let invisible = number(token(text, 5)?)?;
    let servers = number(token(text, 8)?)?;
    info!(
        "[{}] There are {} users and {} invisible on {} servers",
        source(msg),
        users,
        invisible,
        servers
    );
    let info = &mut ctx.state.server_info;
    info.user_count = Some(users);
    info.invisible_count = Some(invisible);
    info.server_count = Some(servers);
    Ok(())
}

fn handle_luser_op(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let count = number(param(msg, 1)?)?;
    info!("[{}] Operators online: {}", source(msg), count);
    ctx.state.server_info.operator_count = Some(count);
    Ok(())
}

fn handle_luser_unknown(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let count = number(param(msg, 1)?)?;
    info!("[{}] Unknown connections: {}", source(msg), count);
    ctx.state.server_info.unknown_count = Some(count);
    Ok(())
}

fn handle_luser_channels(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let count = number(param(msg, 1)?)?;
    info!("[{}] Channels: {}", source(msg), count);
    ctx.state.server_info.channel_count = Some(count);
    Ok(())
}

fn handle_luser_me(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let text = param(msg, 1)?;
    let clients = number(token(text, 2)?)?;
    let servers = number(token(text, 5)?)?;
    info!("[{}] There are {} clients on {} server(s)", source(msg), clients, servers);
    let info = &mut ctx.state.server_info;
    info.local_client_count = Some(clients);
    info.local_server_count = Some(servers);
    Ok(())
}

fn handle_local_users(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let current = number(param(msg, 1)?)?;
    let max = number(param(msg, 2)?)?;
    info!("[{}] Local user count: {} / {}", source(msg), current, max);
    ctx.state.server_info.local_user_count = Some(current);
    ctx.state.server_info.max_local_user_count = Some(max);
    Ok(())
}

fn handle_global_users(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let current = number(param(msg, 1)?)?;
    let max = number(param(msg, 2)?)?;
    info!("[{}] Global user count: {} / {}", source(msg), current, max);
    ctx.state.server_info.global_user_count = Some(current);
    ctx.state.server_info.max_global_user_count = Some(max);
    Ok(())
}

/// 353 `<nick> <type> <channel> :<names>`. Long member lists span several
/// replies, so names are merged into the existing set.
fn handle_names(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 2)?;
    let names = param(msg, 3)?;
    debug!("[{}] Users in channel {}: {}", source(msg), channel, names);
    ctx.state
        .registry
        .record_users(channel, names.split_whitespace())?;
    Ok(())
}

fn handle_end_of_names(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 1)?;
    ctx.state.registry.log_users(channel);
    Ok(())
}

fn handle_motd_start(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let header = param(msg, 1)?;
    info!("[{}] Message of the day header: {}", source(msg), header);
    let info = &mut ctx.state.server_info;
    info.motd_header = Some(header.to_string());
    info.motd_open = true;
    Ok(())
}

/// Open the MOTD block if the server skipped 375.
fn ensure_motd_open(ctx: &mut Context<'_>, msg: &Message) {
    let info = &mut ctx.state.server_info;
    if !info.motd_open {
        warn!("[{}] MOTD {} without a MOTD header", source(msg), msg.command());
        info.motd_header = Some(String::new());
        info.motd_open = true;
    }
}

fn handle_motd(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let line = param(msg, 1)?;
    ensure_motd_open(ctx, msg);
    debug!("[{}] MOTD: {}", source(msg), line);
    ctx.state.server_info.motd.push(line.to_string());
    Ok(())
}

fn handle_end_of_motd(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    ensure_motd_open(ctx, msg);
    let info = &mut ctx.state.server_info;
    info.motd_open = false;
    info!(
        "[{}] MOTD: {}\n{}",
        source(msg),
        info.motd_header.as_deref().unwrap_or_default(),
        info.motd.join("\n")
    );
    Ok(())
}

fn handle_no_motd(_ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    info!("[{}] No MOTD: {}", source(msg), msg.param(1).unwrap_or_default());
    Ok(())
}

/// 471/473/474/475/477 `<nick> <channel> :<reason>`.
fn handle_join_failed(ctx: &mut Context<'_>, msg: &Message) -> Result<(), HandlerError> {
    let channel = param(msg, 1)?;
    let reason = msg.param(2).unwrap_or_default();
    warn!("[{}({})] {}", source(msg), channel, reason);
    if !ctx.state.registry.mark_failed(channel) {
        return Err(HandlerError::UnknownChannel(channel.to_string()));
    }
    ctx.emit(Event::JoinFailed(channel.to_string()));
    Ok(())
}
