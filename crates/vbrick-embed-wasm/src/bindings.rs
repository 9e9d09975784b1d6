//! JavaScript classes for video and webcast embeds
//!
//! Both classes share one surface, generated by [`embed_binding!`]. Listener removal
//! uses JS function identity: the function passed to `off` must be the one passed to `on`.

use crate::logging;
use crate::platform::{js_error_message, BrowserPlatform};
use js_sys::{Function, Object, Promise, Reflect};
use serde::Serialize;
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use vbrick_embed_core::{ContainerRef, EmbedConfig, EmbedError, ListenerId, LocalError};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::Element;

/// `Error` carrying the SDK error code in `code`
pub(crate) fn to_js_error(error: &EmbedError) -> JsValue {
    let js_error = js_sys::Error::new(&error.to_string());
    let _ = Reflect::set(&js_error, &"code".into(), &error.error_code().into());
    js_error.into()
}

pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> JsValue {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or(JsValue::UNDEFINED)
}

pub(crate) fn parse_container(container: JsValue) -> Result<ContainerRef<Element>, JsValue> {
    if let Some(selector) = container.as_string() {
        return Ok(ContainerRef::Selector(selector));
    }
    container
        .dyn_into::<Element>()
        .map(ContainerRef::Element)
        .map_err(|_| js_sys::TypeError::new("container must be an Element or a selector string").into())
}

pub(crate) fn parse_config(config: JsValue) -> Result<EmbedConfig, JsValue> {
    let config: EmbedConfig = serde_wasm_bindgen::from_value(config)?;
    if config.log {
        logging::enable();
    }
    Ok(config)
}

fn call_listener(listener: &Function, value: &JsValue) {
    if let Err(e) = listener.call1(&JsValue::NULL, value) {
        tracing::warn!(error = %js_error_message(&e), "Embed listener threw");
    }
}

fn local_error_to_js(error: &LocalError) -> JsValue {
    let object = Object::new();
    let _ = Reflect::set(&object, &"message".into(), &error.message.as_str().into());
    if let Some(cause) = &error.cause {
        let _ = Reflect::set(&object, &"cause".into(), &to_js_error(cause));
    }
    object.into()
}

/// JS functions registered through `on`, keyed by the id the embed handed out
#[derive(Default)]
pub(crate) struct JsListeners {
    entries: Vec<(String, Function, ListenerId)>,
}

impl JsListeners {
    fn insert(&mut self, event: &str, listener: Function, id: ListenerId) {
        self.entries.push((event.to_string(), listener, id));
    }

    /// Remove every registration of `listener` for `event`
    fn remove(&mut self, event: &str, listener: &Function) -> Vec<ListenerId> {
        let mut removed = Vec::new();
        self.entries.retain(|(name, existing, id)| {
            let matches = name == event && Object::is(existing, listener);
            if matches {
                removed.push(*id);
            }
            !matches
        });
        removed
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

macro_rules! embed_binding {
    ($class:ident, $core:ty, $factory:ident, $js_factory:tt, $id_arg:ident) => {
        #[wasm_bindgen]
        pub struct $class {
            embed: $core,
            listeners: Rc<RefCell<JsListeners>>,
        }

        #[wasm_bindgen]
        impl $class {
            /// Mount the player and run the handshake; resolves once, for every caller
            pub fn initialize(&self) -> Promise {
                let handshake = self.embed.initialize();
                future_to_promise(async move {
                    handshake
                        .await
                        .map(|_| JsValue::UNDEFINED)
                        .map_err(|e| to_js_error(&e))
                })
            }

            /// Replace the token and resolve when the player confirms it. A token that
            /// cannot be decoded rejects the returned promise.
            #[wasm_bindgen(js_name = updateToken)]
            pub fn update_token(&self, token: JsValue) -> Promise {
                let token = match serde_wasm_bindgen::from_value(token) {
                    Ok(token) => token,
                    Err(e) => return Promise::reject(&e.into()),
                };
                let update = self.embed.update_token(token);
                future_to_promise(async move {
                    update
                        .await
                        .map(|_| JsValue::UNDEFINED)
                        .map_err(|e| to_js_error(&e))
                })
            }

            pub fn play(&self) {
                self.embed.play();
            }

            pub fn pause(&self) {
                self.embed.pause();
            }

            #[wasm_bindgen(js_name = setVolume)]
            pub fn set_volume(&self, volume: f64) {
                self.embed.set_volume(volume);
            }

            #[wasm_bindgen(js_name = setSubtitles)]
            pub fn set_subtitles(&self, subtitles: JsValue) -> Result<(), JsValue> {
                let subtitles = serde_wasm_bindgen::from_value(subtitles)?;
                self.embed.set_subtitles(&subtitles);
                Ok(())
            }

            /// Listen for a player event by name
            pub fn on(&self, event: &str, listener: Function) -> Result<(), JsValue> {
                let callback = listener.clone();
                let id = self
                    .embed
                    .on_named(event, move |data: Option<&Value>| {
                        let value = data.map(to_js).unwrap_or(JsValue::UNDEFINED);
                        call_listener(&callback, &value);
                    })
                    .map_err(|e| to_js_error(&e))?;
                self.listeners.borrow_mut().insert(event, listener, id);
                Ok(())
            }

            pub fn off(&self, event: &str, listener: &Function) {
                let removed = self.listeners.borrow_mut().remove(event, listener);
                for id in removed {
                    self.embed.off(event, id);
                }
            }

            /// Listen for failures detected on the page side of the channel
            #[wasm_bindgen(js_name = onLocalError)]
            pub fn on_local_error(&self, listener: Function) {
                self.embed.on_local_error(move |error| {
                    call_listener(&listener, &local_error_to_js(error));
                });
            }

            /// Remove the player frame and stop all messaging
            pub fn destroy(&self) {
                self.embed.destroy();
                self.listeners.borrow_mut().clear();
            }

            #[wasm_bindgen(getter, js_name = playerStatus)]
            pub fn player_status(&self) -> String {
                self.embed.player_status().to_string()
            }

            #[wasm_bindgen(getter)]
            pub fn volume(&self) -> f64 {
                self.embed.volume()
            }

            #[wasm_bindgen(getter, js_name = currentSubtitles)]
            pub fn current_subtitles(&self) -> JsValue {
                to_js(&self.embed.current_subtitles())
            }

            #[wasm_bindgen(getter)]
            pub fn info(&self) -> JsValue {
                self.embed.info().map(|info| to_js(&info)).unwrap_or(JsValue::UNDEFINED)
            }

            #[wasm_bindgen(getter, js_name = isLive)]
            pub fn is_live(&self) -> bool {
                self.embed.is_live()
            }

            #[wasm_bindgen(getter)]
            pub fn token(&self) -> JsValue {
                self.embed.token().map(|token| to_js(&token)).unwrap_or(JsValue::UNDEFINED)
            }
        }

        #[wasm_bindgen(js_name = $js_factory)]
        pub fn $factory(container: JsValue, $id_arg: &str, config: JsValue) -> Result<$class, JsValue> {
            let platform = BrowserPlatform::new().map_err(|e| to_js_error(&e))?;
            let container = parse_container(container)?;
            let config = parse_config(config)?;
            let embed = vbrick_embed_core::$factory(platform, container, $id_arg, config)
                .map_err(|e| to_js_error(&e))?;
            Ok($class {
                embed,
                listeners: Rc::new(RefCell::new(JsListeners::default())),
            })
        }
    };
}

embed_binding!(
    VideoEmbed,
    vbrick_embed_core::VideoEmbed<BrowserPlatform>,
    embed_video,
    "embedVideo",
    video_id
);

embed_binding!(
    WebcastEmbed,
    vbrick_embed_core::WebcastEmbed<BrowserPlatform>,
    embed_webcast,
    "embedWebcast",
    webcast_id
);
