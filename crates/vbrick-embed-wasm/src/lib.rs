//! Vbrick Embed WASM - browser bindings for the embed SDK
//!
//! Mounts Vbrick players in iframes and talks to them over `postMessage`:
//! - `embedVideo` / `embedWebcast` factories
//! - Promise-based handshake and token refresh
//! - Player commands and cached state getters
//! - Event listeners by name
//!
//! ## Usage
//!
//! ```javascript
//! import init, { embedVideo } from '@vbrick/embed-wasm';
//!
//! await init();
//! const player = embedVideo('#player', videoId, {
//!   baseUrl: 'https://acme.rev.vbrick.com',
//!   token: { type: 'JWT', value: jwt },
//! });
//! player.on('playerStatusChanged', ({ status }) => console.log(status));
//! await player.initialize();
//! player.play();
//! ```

use wasm_bindgen::prelude::*;

mod bindings;
mod logging;
mod platform;

pub use bindings::{embed_video, embed_webcast, VideoEmbed, WebcastEmbed};
pub use platform::{BrowserChannel, BrowserPlatform, BrowserScheduler, FrameWindow};

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    vbrick_embed_core::init();
}

/// Library version
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Names of every event a player can emit
#[wasm_bindgen(js_name = eventNames)]
pub fn event_names() -> Vec<JsValue> {
    vbrick_embed_core::events::CATALOG
        .iter()
        .map(|(name, _)| JsValue::from_str(name))
        .collect()
}

/// Turn on console logging for all embeds
#[wasm_bindgen(js_name = enableLogging)]
pub fn enable_logging() {
    logging::enable();
}
