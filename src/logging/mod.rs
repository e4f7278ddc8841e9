//! Chat transcript logging to disk.
//!
//! When enabled, writes channel and private messages to daily log files named
//! `<target>_<date>.log` in the configured log directory (default:
//! `~/.local/share/crabirc/logs/`).

use crate::app::state::{ChannelMessage, MessageKind};
use crate::config::{expand_home, LoggingConfig};
use irc::proto::ChannelExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Writes chat records to per-target daily log files.
///
/// File handles are cached for the lifetime of the logger. A target whose
/// file cannot be opened is skipped until the next day's file.
pub struct ChatLogger {
    enabled: bool,
    log_dir: PathBuf,
    log_channels: bool,
    log_queries: bool,
    file_handles: HashMap<String, Option<fs::File>>,
}

impl ChatLogger {
    pub fn new(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.enabled,
            log_dir: expand_home(&config.log_dir),
            log_channels: config.log_channels,
            log_queries: config.log_queries,
            file_handles: HashMap::new(),
        }
    }

    /// Append `record` to the log for `target`, a channel or a nick. No-op if
    /// logging is disabled for that kind of target.
    pub fn log_message(&mut self, target: &str, record: &ChannelMessage) {
        if !self.enabled {
            return;
        }
        let wanted = if target.is_channel_name() {
            self.log_channels
        } else {
            self.log_queries
        };
        if !wanted {
            return;
        }

        let time = record.timestamp.format("%H:%M:%S");
        let line = match record.kind {
            MessageKind::Message | MessageKind::Notice | MessageKind::Outgoing => {
                format!("[{}] <{}> {}", time, record.sender, record.text)
            }
            MessageKind::Join | MessageKind::Part | MessageKind::Kick | MessageKind::Quit => {
                format!("[{}] *** {} {}", time, record.sender, record.text)
            }
        };

        let filename = format!(
            "{}_{}.log",
            sanitize(target),
            record.timestamp.format("%Y-%m-%d")
        );
        let log_dir = &self.log_dir;
        let handle = self
            .file_handles
            .entry(filename)
            .or_insert_with_key(|filename| open_log(log_dir, filename));

        if let Some(file) = handle {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write transcript for {}: {}", target, e);
            }
        }
    }
}

fn sanitize(target: &str) -> String {
    target
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect()
}

fn open_log(log_dir: &Path, filename: &str) -> Option<fs::File> {
    if let Err(e) = fs::create_dir_all(log_dir) {
        warn!("Failed to create log directory {}: {}", log_dir.display(), e);
        return None;
    }
    let path = log_dir.join(filename);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| warn!("Failed to open log file {}: {}", path.display(), e))
        .ok()
}
