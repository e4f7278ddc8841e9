use anyhow::{Context, Result};
use clap::Parser;
use crabirc::app::{ChannelMessage, Hooks, MessageKind};
use crabirc::logging::ChatLogger;
use crabirc::{config, Engine};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file location
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log protocol traffic
    #[arg(short, long)]
    debug: bool,

    /// Log raw socket data
    #[arg(short, long)]
    verbose: bool,
}

/// Prints chat to stdout and mirrors it into transcript files.
struct ConsoleHooks {
    logger: Mutex<ChatLogger>,
}

impl ConsoleHooks {
    fn log(&self, target: &str, record: &ChannelMessage) {
        self.logger
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .log_message(target, record);
    }
}

impl Hooks for ConsoleHooks {
    fn on_join(&self, channel: &str, nick: &str) {
        self.log(channel, &ChannelMessage::new(nick, "joined", MessageKind::Join));
    }

    fn on_part(&self, channel: &str, nick: &str) {
        self.log(channel, &ChannelMessage::new(nick, "left", MessageKind::Part));
    }

    fn on_message(&self, target: &str, record: &ChannelMessage) {
        println!("[{}] <{}> {}", target, record.sender, record.text);
        self.log(target, record);
    }

    fn on_join_failed(&self, channel: &str) {
        eprintln!("Could not join {}", channel);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let cfg = config::load_config(args.config.as_deref())?;
    cfg.require_channels()?;

    let hooks = ConsoleHooks {
        logger: Mutex::new(ChatLogger::new(&cfg.logging)),
    };
    let mut engine = Engine::builder(cfg)
        .hooks(hooks)
        .build()
        .context("Failed to set up client")?;

    let client = engine.client();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, restarting session");
            client.interrupt();
        }
    });

    engine.run().await?;
    Ok(())
}
