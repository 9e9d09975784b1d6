//! Vbrick Embed Core - embed lifecycle and event bus for iframe-hosted players
//!
//! This crate provides the platform-independent core of the embedding SDK:
//! - Event bus over a single cross-document message channel
//! - Load and authentication handshake with timeout and failure semantics
//! - Cached player state (status, volume, subtitles, metadata)
//! - Typed event catalog for video and webcast players
//! - Embed URL construction from configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Vbrick Embed Core                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   embed_video() / embed_webcast()                               │
//! │                 │                                               │
//! │          ┌──────┴──────┐        ┌──────────────┐                │
//! │          │    Embed    │───────►│  Embed URL   │                │
//! │          │ <Video|Web> │        │   Builder    │                │
//! │          └──────┬──────┘        └──────────────┘                │
//! │                 │ owns                                          │
//! │          ┌──────┴──────┐        ┌──────────────┐                │
//! │          │  Event Bus  │───────►│ Event Catalog│                │
//! │          └──────┬──────┘        └──────────────┘                │
//! │                 │                                               │
//! ├─────────────────┼───────────────────────────────────────────────┤
//! │   Platform: MessageChannel · Scheduler · frame mounting         │
//! │   (browser in vbrick-embed-wasm, in-memory in `memory`)         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use vbrick_embed_core::{embed_video, memory::MemoryPlatform, EmbedConfig, PlayerStatus};
//!
//! # async fn run() -> vbrick_embed_core::Result<()> {
//! let platform = MemoryPlatform::new();
//! platform.add_container("#player");
//!
//! let embed = embed_video(platform, "#player".into(), "video-id", EmbedConfig::new("https://acme.rev.vbrick.com"))?;
//! embed.on::<vbrick_embed_core::events::PlayerStatusChanged>(|payload| {
//!     println!("status: {}", payload.status);
//! });
//! embed.initialize().await?;
//! assert_eq!(embed.player_status(), PlayerStatus::Paused);
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod embed;
pub mod embed_url;
pub mod error;
pub mod events;
pub mod platform;
pub mod types;

#[cfg(feature = "runtime")]
pub mod memory;

pub use bus::{EventBus, LocalError};
pub use config::{EmbedConfig, EmbedToken, ResolvedToken, TokenType};
pub use embed::{Embed, EmbedKind, Video, VideoEmbed, Webcast, WebcastEmbed};
pub use embed_url::{build_embed_url, ContentKind};
pub use error::{EmbedError, ErrorCode, Result};
pub use events::{EmbedEvent, Envelope, Family};
pub use platform::{ContainerRef, FrameSpec, MessageChannel, Platform, Scheduler, Subscription};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create a video embed attached to `container`.
///
/// The frame is not created until [`Embed::initialize`] is called.
pub fn embed_video<P: Platform>(
    platform: P,
    container: ContainerRef<P::Element>,
    video_id: &str,
    config: EmbedConfig,
) -> Result<VideoEmbed<P>> {
    Embed::create(platform, container, video_id, config)
}

/// Create a webcast embed attached to `container`.
pub fn embed_webcast<P: Platform>(
    platform: P,
    container: ContainerRef<P::Element>,
    webcast_id: &str,
    config: EmbedConfig,
) -> Result<WebcastEmbed<P>> {
    Embed::create(platform, container, webcast_id, config)
}

/// Log library initialization
pub fn init() {
    tracing::info!(version = VERSION, "Vbrick Embed Core initialized");
}
