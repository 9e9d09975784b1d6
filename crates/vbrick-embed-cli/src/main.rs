//! Vbrick Embed CLI - build and check player embeds without a browser
//!
//! Features:
//! - Embed URL construction from flags or a JSON config file
//! - Ready-to-paste iframe snippets
//! - Event catalog listing
//! - Handshake simulation against a scripted in-memory player

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vbrick_embed_core::{ContentKind, EmbedConfig, EmbedToken, Family, TokenType};

mod commands;
mod output;

/// Vbrick Embed CLI
#[derive(Parser)]
#[command(name = "vbrick-embed")]
#[command(version)]
#[command(about = "Build and check Vbrick player embeds", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the player URL for a video or webcast
    Url {
        #[arg(value_enum)]
        kind: KindArg,

        /// Video or webcast id
        id: String,

        #[command(flatten)]
        options: EmbedOptions,
    },

    /// Print an iframe snippet for a video or webcast
    Snippet {
        #[arg(value_enum)]
        kind: KindArg,

        /// Video or webcast id
        id: String,

        #[command(flatten)]
        options: EmbedOptions,
    },

    /// List the events a player can emit
    Events {
        /// Only show one family
        #[arg(long, value_enum)]
        family: Option<FamilyArg>,
    },

    /// Run the embed handshake against a scripted in-memory player
    Simulate {
        #[arg(value_enum)]
        kind: KindArg,

        /// Video or webcast id
        id: String,

        /// How the scripted player answers
        #[arg(long, value_enum, default_value = "load")]
        reply: Reply,

        /// Error code sent when replying with an error
        #[arg(long, default_value = "NotFound")]
        error_code: String,

        #[command(flatten)]
        options: EmbedOptions,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Video,
    Webcast,
}

impl From<KindArg> for ContentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Video => ContentKind::Video,
            KindArg::Webcast => ContentKind::Webcast,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
    Lifecycle,
    Video,
    Webcast,
}

impl From<FamilyArg> for Family {
    fn from(family: FamilyArg) -> Self {
        match family {
            FamilyArg::Lifecycle => Family::Lifecycle,
            FamilyArg::Video => Family::Video,
            FamilyArg::Webcast => Family::Webcast,
        }
    }
}

/// Scripted player behavior for `simulate`
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Reply {
    /// Load, report metadata and start playing
    Load,
    /// Send an error before loading
    Error,
    /// Never answer; the handshake times out
    Silent,
}

/// Embed options; flags override values from `--config`
#[derive(Args)]
struct EmbedOptions {
    /// JSON file with an embed config (camelCase keys)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the Vbrick tenant
    #[arg(long)]
    base_url: Option<String>,

    /// Token value
    #[arg(long)]
    token: Option<String>,

    /// Token type (JWT, AccessToken)
    #[arg(long, default_value = "JWT")]
    token_type: String,

    /// Token issuer
    #[arg(long)]
    issuer: Option<String>,

    #[arg(long)]
    width: Option<String>,

    #[arg(long)]
    height: Option<String>,

    #[arg(long)]
    class_name: Option<String>,

    /// Handshake timeout in seconds (0 disables)
    #[arg(long)]
    timeout: Option<f64>,

    #[arg(long)]
    popup_auth: bool,

    /// Player accent color
    #[arg(long)]
    accent_color: Option<String>,

    #[arg(long)]
    autoplay: bool,

    #[arg(long)]
    force_closed_captions: bool,

    #[arg(long)]
    loop_video: bool,

    /// Start position in seconds
    #[arg(long)]
    start_at: Option<f64>,

    #[arg(long)]
    hide_chapters: bool,

    #[arg(long)]
    hide_fullscreen: bool,

    #[arg(long)]
    hide_overlay_controls: bool,

    #[arg(long)]
    hide_play_controls: bool,

    #[arg(long)]
    hide_settings: bool,

    #[arg(long)]
    hide_chat: bool,

    #[arg(long)]
    hide_qa: bool,

    #[arg(long)]
    hide_polls: bool,
}

impl EmbedOptions {
    fn into_config(self) -> anyhow::Result<EmbedConfig> {
        let mut config = match (&self.config, &self.base_url) {
            (Some(path), _) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str::<EmbedConfig>(&text)?
            }
            (None, Some(base_url)) => EmbedConfig::new(base_url.clone()),
            (None, None) => anyhow::bail!("either --base-url or --config is required"),
        };

        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(value) = self.token {
            config.token = Some(EmbedToken {
                kind: TokenType::from(self.token_type),
                value,
                issuer: self.issuer,
            });
        }
        if let Some(timeout) = self.timeout {
            config.timeout_seconds = timeout;
        }
        config.width = self.width.or(config.width);
        config.height = self.height.or(config.height);
        config.class_name = self.class_name.or(config.class_name);
        config.accent_color = self.accent_color.or(config.accent_color);
        config.start_at = self.start_at.or(config.start_at);

        config.popup_auth |= self.popup_auth;
        config.autoplay |= self.autoplay;
        config.force_closed_captions |= self.force_closed_captions;
        config.loop_video |= self.loop_video;
        config.hide_chapters |= self.hide_chapters;
        config.hide_fullscreen |= self.hide_fullscreen;
        config.hide_overlay_controls |= self.hide_overlay_controls;
        config.hide_play_controls |= self.hide_play_controls;
        config.hide_settings |= self.hide_settings;
        config.hide_chat |= self.hide_chat;
        config.hide_qa |= self.hide_qa;
        config.hide_polls |= self.hide_polls;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Url { kind, id, options } => {
            commands::url(kind.into(), &id, &options.into_config()?, &cli.format)?;
        }
        Commands::Snippet { kind, id, options } => {
            commands::snippet(kind.into(), &id, &options.into_config()?, &cli.format)?;
        }
        Commands::Events { family } => {
            commands::events(family.map(Family::from), &cli.format);
        }
        Commands::Simulate { kind, id, reply, error_code, options } => {
            let config = options.into_config()?;
            let script = commands::Script { reply, error_code };
            commands::simulate(kind.into(), &id, config, script, &cli.format).await?;
        }
    }

    Ok(())
}
