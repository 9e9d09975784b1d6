//! Embed lifecycle
//!
//! An [`Embed`] owns one frame and the [`EventBus`] over it. It drives the load and
//! authentication handshake, keeps a cached view of the player (status, volume, subtitles,
//! metadata) up to date from bus events, and exposes the control surface to the host page.
//!
//! # Handshake
//!
//! ```text
//!  initialize()
//!      │
//!      ├─ mount frame, bind bus, register internal listeners
//!      │
//!      ├─ resolve token ──┐
//!      │                  ├─ both ok ──► status Paused, publish `authenticated`,
//!      ├─ await `load` ───┘              watch for `authChanged` (not awaited)
//!      │
//!      └─ any failure ──► status Error, synthetic `error`, local error, Err
//! ```
//!
//! # Listener ordering
//!
//! Listeners registered through [`Embed::on`] run on a later scheduling turn than the
//! embed's own handlers for the same event, so the cached state they read is already
//! updated.

use crate::bus::{EventBus, LocalError};
use crate::config::{resolve_token, EmbedConfig, EmbedToken};
use crate::embed_url::{build_embed_url, ContentKind};
use crate::error::{EmbedError, ErrorCode, Result};
use crate::events::{
    self, commands, decode_payload, EmbedEvent, Family, PlayerStatusChanged, Supports,
    SubtitlesChanged, VolumeChanged,
};
use crate::platform::{ContainerRef, FrameSpec, Platform, Scheduler};
use crate::types::*;
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use tracing::{debug, info, instrument, warn};

/// Initial volume before the player reports one
pub const DEFAULT_VOLUME: f64 = 1.0;

/// Variant-specific behavior of an embed
pub trait EmbedKind: Sized + 'static {
    /// Metadata snapshot cached from the loaded event
    type Info: Clone + Debug + Serialize + 'static;

    const CONTENT: ContentKind;

    /// Event carrying the metadata snapshot
    const LOADED_EVENT: &'static str;

    fn parse_info(data: Option<&Value>) -> Result<Self::Info>;

    fn is_live(info: &Self::Info) -> bool;

    /// Whether events of `family` can arrive from this player
    fn supports(family: Family) -> bool;

    /// Whether `event` is a catalogued event this player can send. Each player reports
    /// only its own loaded event.
    fn accepts(event: &str) -> bool {
        match events::family_of(event) {
            Some(_) if event == events::VideoLoaded::NAME || event == events::WebcastLoaded::NAME => {
                event == Self::LOADED_EVENT
            }
            Some(family) => Self::supports(family),
            None => false,
        }
    }
}

/// On-demand video player
#[derive(Debug, Clone, Copy)]
pub struct Video;

/// Webcast player
#[derive(Debug, Clone, Copy)]
pub struct Webcast;

impl EmbedKind for Video {
    type Info = VideoInfo;

    const CONTENT: ContentKind = ContentKind::Video;
    const LOADED_EVENT: &'static str = events::VideoLoaded::NAME;

    fn parse_info(data: Option<&Value>) -> Result<VideoInfo> {
        decode_payload(Self::LOADED_EVENT, data)
    }

    fn is_live(info: &VideoInfo) -> bool {
        info.is_live
    }

    fn supports(family: Family) -> bool {
        matches!(family, Family::Lifecycle | Family::Video)
    }
}

impl EmbedKind for Webcast {
    type Info = WebcastInfo;

    const CONTENT: ContentKind = ContentKind::Webcast;
    const LOADED_EVENT: &'static str = events::WebcastLoaded::NAME;

    /// `status` is dropped: it changes far more often than the rest of the snapshot and
    /// is tracked through the status events instead.
    fn parse_info(data: Option<&Value>) -> Result<WebcastInfo> {
        let mut value = data.cloned().unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("status");
        }
        decode_payload(Self::LOADED_EVENT, Some(&value))
    }

    fn is_live(info: &WebcastInfo) -> bool {
        info.is_live
    }

    fn supports(family: Family) -> bool {
        matches!(family, Family::Lifecycle | Family::Webcast)
    }
}

#[derive(Debug, Clone)]
struct PlayerState<I> {
    status: PlayerStatus,
    volume: f64,
    subtitles: Subtitles,
    info: Option<I>,
}

impl<I> Default for PlayerState<I> {
    fn default() -> Self {
        Self {
            status: PlayerStatus::Initializing,
            volume: DEFAULT_VOLUME,
            subtitles: Subtitles::default(),
            info: None,
        }
    }
}

type Listener = Rc<dyn Fn(Option<&Value>)>;
type LocalErrorListener = Rc<dyn Fn(&LocalError)>;
type Handshake = Shared<LocalBoxFuture<'static, Result<()>>>;

/// Page-level listeners; they outlive bus re-binding and can be added before `initialize`
#[derive(Default)]
struct ExternalListeners {
    by_event: HashMap<String, Vec<(ListenerId, Listener)>>,
    local_errors: Vec<(ListenerId, LocalErrorListener)>,
}

impl ExternalListeners {
    fn contains(&self, event: &str, id: ListenerId) -> bool {
        self.by_event
            .get(event)
            .is_some_and(|entries| entries.iter().any(|(existing, _)| *existing == id))
    }
}

struct EmbedInner<K: EmbedKind, P: Platform> {
    platform: P,
    scheduler: Rc<dyn Scheduler>,
    content_id: String,
    container: P::Element,
    config: RefCell<EmbedConfig>,
    state: RefCell<PlayerState<K::Info>>,
    frame: RefCell<Option<P::Frame>>,
    bus: RefCell<Option<EventBus<P::Channel>>>,
    external: RefCell<ExternalListeners>,
    handshake: RefCell<Option<Handshake>>,
    destroyed: Cell<bool>,
    _kind: PhantomData<K>,
}

impl<K: EmbedKind, P: Platform> EmbedInner<K, P> {
    fn bus(&self) -> Option<EventBus<P::Channel>> {
        self.bus.borrow().clone()
    }

    #[instrument(skip_all, fields(kind = %K::CONTENT, content_id = %self.content_id))]
    fn start(self: &Rc<Self>) -> LocalBoxFuture<'static, Result<()>> {
        if self.destroyed.get() {
            return future::ready(Err(EmbedError::Destroyed)).boxed_local();
        }
        info!("Initializing embed");

        let bus = match self.open() {
            Ok(bus) => bus,
            Err(e) => {
                self.fail(&e);
                return future::ready(Err(e)).boxed_local();
            }
        };

        // Internal listeners go in before anything is sent
        self.register_internal(&bus);

        let timeout = self.config.borrow().timeout();
        let load = bus.await_event(events::Load::NAME, events::Error::NAME, timeout);
        let weak = Rc::downgrade(self);

        async move {
            // Read at this step; a token replaced earlier wins
            let token = match weak.upgrade() {
                Some(inner) => {
                    let token = inner.config.borrow().token.clone();
                    token
                }
                None => return Err(EmbedError::Destroyed),
            };

            let outcome = future::try_join(resolve_token(token), load).await;

            let Some(inner) = weak.upgrade() else {
                return Err(EmbedError::Destroyed);
            };
            match outcome {
                Ok((token, _)) => {
                    inner.on_loaded(&bus, token.map(serde_json::to_value).transpose()?);
                    Ok(())
                }
                Err(e) => {
                    inner.fail(&e);
                    Err(e)
                }
            }
        }
        .boxed_local()
    }

    /// Mount the frame and bind the bus to its window
    fn open(&self) -> Result<EventBus<P::Channel>> {
        let (spec, origin) = {
            let config = self.config.borrow();
            let src = build_embed_url(K::CONTENT, &self.content_id, &config)?;
            let spec = FrameSpec::new(src, config.width(), config.height(), config.class_name.clone());
            (spec, config.origin()?)
        };

        let frame = self.platform.mount(&self.container, &spec)?;
        let channel = match self.platform.open_channel(&frame) {
            Ok(channel) => channel,
            Err(e) => {
                self.platform.unmount(&frame);
                return Err(e);
            }
        };
        debug!(src = %spec.src, "Frame mounted");

        let bus = EventBus::new(channel, origin, self.scheduler.clone());
        *self.frame.borrow_mut() = Some(frame);
        *self.bus.borrow_mut() = Some(bus.clone());
        Ok(bus)
    }

    fn register_internal(self: &Rc<Self>, bus: &EventBus<P::Channel>) {
        let weak = Rc::downgrade(self);
        bus.on(K::LOADED_EVENT, move |data| {
            let Some(inner) = weak.upgrade() else { return };
            match K::parse_info(data) {
                Ok(info) => inner.update(|state| state.info = Some(info)),
                Err(e) => inner.emit_local_error("Unexpected metadata from embed", Some(e)),
            }
        });

        let weak = Rc::downgrade(self);
        bus.on_event::<PlayerStatusChanged>(move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_status(payload.status);
            }
        });

        let weak = Rc::downgrade(self);
        bus.on_event::<SubtitlesChanged>(move |subtitles| {
            if let Some(inner) = weak.upgrade() {
                inner.update(|state| state.subtitles = subtitles);
            }
        });

        let weak = Rc::downgrade(self);
        bus.on_event::<VolumeChanged>(move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.update(|state| state.volume = payload.volume);
            }
        });

        // Page listeners see every event after the handlers above have run
        let weak: Weak<Self> = Rc::downgrade(self);
        bus.on_any(move |event, data| {
            if let Some(inner) = weak.upgrade() {
                inner.forward_external(event, data);
            }
        });

        let weak: Weak<Self> = Rc::downgrade(self);
        bus.on_local_error(move |error| {
            if let Some(inner) = weak.upgrade() {
                inner.notify_local_error(error);
            }
        });
    }

    fn update(&self, apply: impl FnOnce(&mut PlayerState<K::Info>)) {
        if self.destroyed.get() {
            return;
        }
        apply(&mut *self.state.borrow_mut());
    }

    fn apply_status(&self, status: PlayerStatus) {
        if self.destroyed.get() {
            return;
        }
        let mut state = self.state.borrow_mut();
        if state.status.is_terminal() {
            debug!(ignored = %status, "Player status is terminal");
            return;
        }
        if state.status != status {
            info!(from = %state.status, to = %status, "Player status changed");
        }
        state.status = status;
    }

    fn on_loaded(self: &Rc<Self>, bus: &EventBus<P::Channel>, token: Option<Value>) {
        if self.destroyed.get() {
            return;
        }
        if self.state.borrow().status == PlayerStatus::Initializing {
            self.apply_status(PlayerStatus::Paused);
        }
        info!(authenticated = token.is_some(), "Embed loaded");

        let confirm = bus.await_event(
            events::AuthChanged::NAME,
            events::Error::NAME,
            self.config.borrow().timeout(),
        );
        bus.publish(commands::AUTHENTICATED, token);

        // Confirmation is observed, not awaited by initialize()
        let weak = Rc::downgrade(self);
        self.scheduler.spawn(
            async move {
                match confirm.await {
                    Ok(_) => debug!("Authorization confirmed"),
                    Err(EmbedError::Destroyed) => {}
                    Err(e) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.emit_local_error("Authorization was not confirmed", Some(e));
                        }
                    }
                }
            }
            .boxed_local(),
        );
    }

    fn fail(self: &Rc<Self>, error: &EmbedError) {
        if self.destroyed.get() {
            return;
        }
        warn!(error = %error, code = error.error_code(), "Embed failed to initialize");
        self.state.borrow_mut().status = PlayerStatus::Error;

        match self.bus() {
            Some(bus) => bus.publish_error(error.synthetic_code()),
            None => {
                let payload = ErrorPayload {
                    code: error.synthetic_code().to_string(),
                    message: None,
                };
                let data = serde_json::to_value(payload).ok();
                self.forward_external(events::Error::NAME, data.as_ref());
            }
        }
        self.emit_local_error("Embed failed to initialize", Some(error.clone()));
    }

    /// Schedule page listeners for `event` on a later turn
    fn forward_external(self: &Rc<Self>, event: &str, data: Option<&Value>) {
        if self.destroyed.get() {
            return;
        }
        let listeners: Vec<(ListenerId, Listener)> = self
            .external
            .borrow()
            .by_event
            .get(event)
            .cloned()
            .unwrap_or_default();

        for (id, listener) in listeners {
            let weak = Rc::downgrade(self);
            let event = event.to_string();
            let data = data.cloned();
            self.scheduler.defer(Box::new(move || {
                let Some(inner) = weak.upgrade() else { return };
                // Removed or torn down while queued
                if inner.destroyed.get() || !inner.external.borrow().contains(&event, id) {
                    return;
                }
                listener(data.as_ref());
            }));
        }
    }

    fn emit_local_error(&self, message: &str, cause: Option<EmbedError>) {
        match self.bus() {
            Some(bus) if !bus.is_destroyed() => bus.emit_local_error(message, cause),
            _ => {
                let error = LocalError {
                    message: message.to_string(),
                    cause,
                };
                warn!(error = %error, "Local embed error");
                self.notify_local_error(&error);
            }
        }
    }

    fn notify_local_error(&self, error: &LocalError) {
        if self.destroyed.get() {
            return;
        }
        let listeners: Vec<LocalErrorListener> = self
            .external
            .borrow()
            .local_errors
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(error);
        }
    }
}

/// One embedded player instance
pub struct Embed<K: EmbedKind, P: Platform> {
    inner: Rc<EmbedInner<K, P>>,
}

impl<K: EmbedKind, P: Platform> Clone for Embed<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: EmbedKind, P: Platform> Embed<K, P> {
    /// Validate arguments and resolve the container. Nothing is mounted until
    /// [`Embed::initialize`].
    pub fn create(
        platform: P,
        container: ContainerRef<P::Element>,
        content_id: &str,
        config: EmbedConfig,
    ) -> Result<Self> {
        if content_id.trim().is_empty() {
            return Err(EmbedError::EmptyContentId);
        }
        config.validate()?;
        let container = platform.resolve_container(container)?;
        let scheduler = platform.scheduler();

        debug!(kind = %K::CONTENT, content_id, "Embed created");

        Ok(Self {
            inner: Rc::new(EmbedInner {
                platform,
                scheduler,
                content_id: content_id.to_string(),
                container,
                config: RefCell::new(config),
                state: RefCell::new(PlayerState::default()),
                frame: RefCell::new(None),
                bus: RefCell::new(None),
                external: RefCell::new(ExternalListeners::default()),
                handshake: RefCell::new(None),
                destroyed: Cell::new(false),
                _kind: PhantomData,
            }),
        })
    }

    /// Mount the frame and run the handshake.
    ///
    /// The handshake starts immediately and runs once; every call returns the same
    /// outcome. Resolves when the player has loaded and the token was sent. Fails on a
    /// load error, a remote `error`, an unsupported token type or the configured timeout,
    /// leaving the status at [`PlayerStatus::Error`].
    pub fn initialize(&self) -> Handshake {
        if let Some(handshake) = self.inner.handshake.borrow().as_ref() {
            return handshake.clone();
        }

        let handshake = self.inner.start().shared();
        *self.inner.handshake.borrow_mut() = Some(handshake.clone());

        let driver = handshake.clone();
        self.inner.scheduler.spawn(
            async move {
                let _ = driver.await;
            }
            .boxed_local(),
        );
        handshake
    }

    /// Request playback
    pub fn play(&self) {
        self.publish(commands::PLAY, None);
    }

    /// Request pause
    pub fn pause(&self) {
        self.publish(commands::PAUSE, None);
    }

    /// Request a volume between 0 and 1. Not validated here.
    pub fn set_volume(&self, volume: f64) {
        self.publish_with(commands::SET_VOLUME, &VolumePayload { volume });
    }

    pub fn set_subtitles(&self, subtitles: &Subtitles) {
        self.publish_with(commands::SET_SUBTITLES, subtitles);
    }

    fn publish(&self, event: &str, data: Option<Value>) {
        match self.inner.bus() {
            Some(bus) => bus.publish(event, data),
            None => debug!(event, "Embed not initialized, dropping command"),
        }
    }

    fn publish_with<T: Serialize>(&self, event: &str, data: &T) {
        match self.inner.bus() {
            Some(bus) => bus.publish_with(event, data),
            None => debug!(event, "Embed not initialized, dropping command"),
        }
    }

    /// Replace the token and wait for the player to confirm it.
    ///
    /// The stored token is replaced before anything else happens and is not rolled back on
    /// failure, which is also reported to the player as `TokenRefreshFailed`. Before
    /// `initialize` the new token is simply used by the handshake.
    pub fn update_token(&self, token: EmbedToken) -> LocalBoxFuture<'static, Result<()>> {
        if self.inner.destroyed.get() {
            return future::ready(Err(EmbedError::Destroyed)).boxed_local();
        }
        self.inner.config.borrow_mut().token = Some(token.clone());

        let Some(bus) = self.inner.bus() else {
            debug!("Token stored for the upcoming handshake");
            return future::ready(Ok(())).boxed_local();
        };

        let timeout = self.inner.config.borrow().timeout();
        let confirm = bus.await_event(events::AuthChanged::NAME, events::Error::NAME, timeout);

        async move {
            let resolved = resolve_token(Some(token)).await?;
            bus.publish_with(commands::AUTH_CHANGED, &resolved);
            match confirm.await {
                Ok(_) => {
                    info!("Token update confirmed");
                    Ok(())
                }
                Err(EmbedError::Destroyed) => Err(EmbedError::Destroyed),
                Err(e) => {
                    warn!(error = %e, "Token update failed");
                    bus.publish_error(ErrorCode::TokenRefreshFailed);
                    Err(e)
                }
            }
        }
        .boxed_local()
    }

    /// Register a page listener for `E`. It runs on a later turn than the embed's own
    /// state updates for the same event.
    pub fn on<E>(&self, listener: impl Fn(E::Payload) + 'static) -> ListenerId
    where
        E: EmbedEvent,
        K: Supports<E>,
    {
        let weak = Rc::downgrade(&self.inner);
        self.register(
            E::NAME,
            Rc::new(move |data: Option<&Value>| match decode_payload::<E::Payload>(E::NAME, data) {
                Ok(payload) => listener(payload),
                Err(e) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.emit_local_error("Unexpected payload from embed", Some(e));
                    }
                }
            }),
        )
    }

    /// Register a page listener by event name, with the raw payload
    pub fn on_named(
        &self,
        event: &str,
        listener: impl Fn(Option<&Value>) + 'static,
    ) -> Result<ListenerId> {
        if !K::accepts(event) {
            return Err(EmbedError::UnknownEvent(event.to_string()));
        }
        Ok(self.register(event, Rc::new(listener)))
    }

    fn register(&self, event: &str, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .external
            .borrow_mut()
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a page listener. Returns false if it was not registered for `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut external = self.inner.external.borrow_mut();
        let Some(entries) = external.by_event.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            external.by_event.remove(event);
        }
        removed
    }

    /// Observe failures detected on this side of the channel
    pub fn on_local_error(&self, listener: impl Fn(&LocalError) + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .external
            .borrow_mut()
            .local_errors
            .push((id, Rc::new(listener)));
        id
    }

    pub fn off_local_error(&self, id: ListenerId) -> bool {
        let mut external = self.inner.external.borrow_mut();
        let before = external.local_errors.len();
        external.local_errors.retain(|(existing, _)| *existing != id);
        external.local_errors.len() != before
    }

    /// Remove the frame and tear down the bus. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        if let Some(bus) = self.inner.bus.borrow_mut().take() {
            bus.destroy();
        }
        if let Some(frame) = self.inner.frame.borrow_mut().take() {
            self.inner.platform.unmount(&frame);
        }
        let listeners = std::mem::take(&mut *self.inner.external.borrow_mut());
        drop(listeners);
        info!(kind = %K::CONTENT, content_id = %self.inner.content_id, "Embed destroyed");
    }

    pub fn content_id(&self) -> &str {
        &self.inner.content_id
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> EmbedConfig {
        self.inner.config.borrow().clone()
    }

    pub fn token(&self) -> Option<EmbedToken> {
        self.inner.config.borrow().token.clone()
    }

    pub fn player_status(&self) -> PlayerStatus {
        self.inner.state.borrow().status
    }

    pub fn volume(&self) -> f64 {
        self.inner.state.borrow().volume
    }

    pub fn current_subtitles(&self) -> Subtitles {
        self.inner.state.borrow().subtitles.clone()
    }

    pub fn info(&self) -> Option<K::Info> {
        self.inner.state.borrow().info.clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner
            .state
            .borrow()
            .info
            .as_ref()
            .is_some_and(K::is_live)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// The mounted frame, if initialized and not destroyed
    pub fn frame(&self) -> Option<P::Frame>
    where
        P::Frame: Clone,
    {
        self.inner.frame.borrow().clone()
    }
}

/// Video embed on platform `P`
pub type VideoEmbed<P> = Embed<Video, P>;

/// Webcast embed on platform `P`
pub type WebcastEmbed<P> = Embed<Webcast, P>;
