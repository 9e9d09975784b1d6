//! Event bus over a single cross-document message channel
//!
//! The bus is bound to one frame window at construction. Inbound messages are accepted
//! only from that window and from the configured origin; everything else the host window
//! receives is dropped without comment. Local listeners are keyed by event name.
//!
//! After [`EventBus::destroy`] nothing is dispatched locally and nothing is posted.

use crate::error::{EmbedError, ErrorCode, Result};
use crate::events::{commands, decode_payload, EmbedEvent, Envelope};
use crate::platform::{InboundMessage, MessageChannel, Scheduler, Subscription};
use crate::types::{ErrorPayload, ListenerId};
use futures::future::{self, Either, LocalBoxFuture};
use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

type Listener = Rc<dyn Fn(Option<&Value>)>;
type AnyListener = Rc<dyn Fn(&str, Option<&Value>)>;
type LocalErrorListener = Rc<dyn Fn(&LocalError)>;

/// A failure detected on this side of the channel, never sent to the frame
#[derive(Debug, Clone, PartialEq)]
pub struct LocalError {
    pub message: String,
    pub cause: Option<EmbedError>,
}

impl std::fmt::Display for LocalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

struct Entry {
    id: ListenerId,
    once: bool,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    by_event: HashMap<String, Vec<Entry>>,
    any: Vec<(ListenerId, AnyListener)>,
    local_errors: Vec<(ListenerId, LocalErrorListener)>,
}

impl Registry {
    fn add(&mut self, event: &str, once: bool, listener: Listener) -> ListenerId {
        let id = ListenerId::next();
        self.by_event
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, listener });
        id
    }

    fn remove(&mut self, event: &str, id: ListenerId) -> Option<Entry> {
        let entries = self.by_event.get_mut(event)?;
        let index = entries.iter().position(|entry| entry.id == id)?;
        let entry = entries.remove(index);
        if entries.is_empty() {
            self.by_event.remove(event);
        }
        Some(entry)
    }

    /// Snapshot the listeners for one dispatch, dropping one-shot entries
    fn take_for_dispatch(&mut self, event: &str) -> (Vec<Listener>, Vec<AnyListener>) {
        let mut named = Vec::new();
        if let Some(entries) = self.by_event.get_mut(event) {
            named = entries.iter().map(|entry| entry.listener.clone()).collect();
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                self.by_event.remove(event);
            }
        }
        let any = self.any.iter().map(|(_, listener)| listener.clone()).collect();
        (named, any)
    }
}

struct BusInner<C: MessageChannel> {
    channel: C,
    origin: String,
    scheduler: Rc<dyn Scheduler>,
    registry: RefCell<Registry>,
    subscription: RefCell<Option<Subscription>>,
    destroyed: Cell<bool>,
}

impl<C: MessageChannel> BusInner<C> {
    fn receive(&self, message: InboundMessage<C::Window>) {
        if self.destroyed.get() {
            return;
        }
        if message.origin != self.origin {
            trace!(origin = %message.origin, "Dropping message from foreign origin");
            return;
        }
        if message.source.as_ref() != Some(self.channel.window()) {
            trace!("Dropping message from unbound window");
            return;
        }

        let data = match message.data {
            Ok(data) => data,
            Err(reason) => {
                self.emit_local_error(
                    "Failed to read message from embed",
                    Some(EmbedError::MalformedPayload {
                        event: "message".to_string(),
                        reason,
                    }),
                );
                return;
            }
        };

        match serde_json::from_value::<Envelope>(data) {
            Ok(envelope) => self.dispatch(&envelope.event, envelope.data.as_ref()),
            Err(e) => self.emit_local_error(
                "Unexpected message shape from embed",
                Some(EmbedError::MalformedPayload {
                    event: "message".to_string(),
                    reason: e.to_string(),
                }),
            ),
        }
    }

    fn dispatch(&self, event: &str, data: Option<&Value>) {
        if self.destroyed.get() {
            return;
        }
        let (named, any) = self.registry.borrow_mut().take_for_dispatch(event);
        debug!(event, listeners = named.len(), "Dispatching event");

        for listener in named {
            listener(data);
        }
        for listener in any {
            listener(event, data);
        }
    }

    fn emit_local_error(&self, message: &str, cause: Option<EmbedError>) {
        let error = LocalError {
            message: message.to_string(),
            cause,
        };
        warn!(error = %error, "Local embed error");

        if self.destroyed.get() {
            return;
        }
        let listeners: Vec<LocalErrorListener> = self
            .registry
            .borrow()
            .local_errors
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&error);
        }
    }

    fn publish(&self, event: &str, data: Option<Value>) {
        if self.destroyed.get() {
            trace!(event, "Bus destroyed, not publishing");
            return;
        }
        debug!(event, "Publishing event");

        let message = match serde_json::to_value(Envelope::new(event, data)) {
            Ok(message) => message,
            Err(e) => {
                self.emit_local_error("Failed to encode message", Some(e.into()));
                return;
            }
        };
        if let Err(e) = self.channel.post(&message, &self.origin) {
            self.emit_local_error("Failed to post message to embed", Some(e));
        }
    }
}

/// Removes the listeners of a pending [`EventBus::await_event`] however it ends
struct AwaitGuard<C: MessageChannel> {
    bus: Weak<BusInner<C>>,
    listeners: [(String, ListenerId); 2],
}

impl<C: MessageChannel> Drop for AwaitGuard<C> {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            let removed: Vec<Entry> = {
                let mut registry = inner.registry.borrow_mut();
                self.listeners
                    .iter()
                    .filter_map(|(event, id)| registry.remove(event, *id))
                    .collect()
            };
            drop(removed);
        }
    }
}

/// Typed publish/subscribe over one frame's message channel
pub struct EventBus<C: MessageChannel> {
    inner: Rc<BusInner<C>>,
}

impl<C: MessageChannel> Clone for EventBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<C: MessageChannel> EventBus<C> {
    /// Bind a bus to `channel`, accepting messages from `origin` only
    pub fn new(channel: C, origin: impl Into<String>, scheduler: Rc<dyn Scheduler>) -> Self {
        let inner = Rc::new(BusInner {
            channel,
            origin: origin.into(),
            scheduler,
            registry: RefCell::new(Registry::default()),
            subscription: RefCell::new(None),
            destroyed: Cell::new(false),
        });

        let weak = Rc::downgrade(&inner);
        let subscription = inner.channel.listen(Box::new(move |message| {
            if let Some(inner) = weak.upgrade() {
                inner.receive(message);
            }
        }));
        *inner.subscription.borrow_mut() = Some(subscription);

        debug!(origin = %inner.origin, "Event bus bound");
        Self { inner }
    }

    /// Origin messages are accepted from and posted to
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Send `event` to the frame. Fire-and-forget; a no-op once destroyed.
    pub fn publish(&self, event: &str, data: Option<Value>) {
        self.inner.publish(event, data);
    }

    /// Serialize `data` and publish it
    pub fn publish_with<T: Serialize>(&self, event: &str, data: &T) {
        match serde_json::to_value(data) {
            Ok(value) => self.inner.publish(event, Some(value)),
            Err(e) => self
                .inner
                .emit_local_error("Failed to encode message", Some(e.into())),
        }
    }

    /// Publish a synthetic `error` event with a fixed diagnostic code.
    ///
    /// Local `error` listeners receive it as well, so page-level error handlers see
    /// failures detected on this side alongside those reported by the frame.
    pub fn publish_error(&self, code: ErrorCode) {
        let payload = ErrorPayload {
            code: code.to_string(),
            message: None,
        };
        let data = serde_json::to_value(&payload).ok();
        self.inner.publish(commands::ERROR, data.clone());
        self.inner.dispatch(commands::ERROR, data.as_ref());
    }

    /// Register a listener for `event`
    pub fn on(&self, event: &str, listener: impl Fn(Option<&Value>) + 'static) -> ListenerId {
        self.inner
            .registry
            .borrow_mut()
            .add(event, false, Rc::new(listener))
    }

    /// Register a listener that is removed after its first invocation
    pub fn once(&self, event: &str, listener: impl Fn(Option<&Value>) + 'static) -> ListenerId {
        self.inner
            .registry
            .borrow_mut()
            .add(event, true, Rc::new(listener))
    }

    /// Register a listener with a decoded payload.
    ///
    /// Payloads that do not match `E::Payload` are reported as local errors and the
    /// listener is not invoked.
    pub fn on_event<E: EmbedEvent>(&self, listener: impl Fn(E::Payload) + 'static) -> ListenerId {
        let weak = Rc::downgrade(&self.inner);
        self.on(E::NAME, move |data| match decode_payload::<E::Payload>(E::NAME, data) {
            Ok(payload) => listener(payload),
            Err(e) => {
                if let Some(inner) = weak.upgrade() {
                    inner.emit_local_error("Unexpected payload from embed", Some(e));
                }
            }
        })
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let removed = self.inner.registry.borrow_mut().remove(event, id);
        removed.is_some()
    }

    /// Register a listener for every dispatched event, invoked after the named listeners
    pub fn on_any(&self, listener: impl Fn(&str, Option<&Value>) + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .registry
            .borrow_mut()
            .any
            .push((id, Rc::new(listener)));
        id
    }

    pub fn off_any(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.registry.borrow_mut();
        let before = registry.any.len();
        registry.any.retain(|(existing, _)| *existing != id);
        registry.any.len() != before
    }

    /// Observe local errors
    pub fn on_local_error(&self, listener: impl Fn(&LocalError) + 'static) -> ListenerId {
        let id = ListenerId::next();
        self.inner
            .registry
            .borrow_mut()
            .local_errors
            .push((id, Rc::new(listener)));
        id
    }

    pub fn off_local_error(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.registry.borrow_mut();
        let before = registry.local_errors.len();
        registry.local_errors.retain(|(existing, _)| *existing != id);
        registry.local_errors.len() != before
    }

    /// Notify local error observers; nothing is sent to the frame
    pub fn emit_local_error(&self, message: &str, cause: Option<EmbedError>) {
        self.inner.emit_local_error(message, cause);
    }

    /// Number of listeners currently registered for `event`
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .registry
            .borrow()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Number of named listeners across all events
    pub fn total_listener_count(&self) -> usize {
        self.inner
            .registry
            .borrow()
            .by_event
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Wait for the next `success` event.
    ///
    /// Resolves with its data, fails with [`EmbedError::Remote`] if `error` fires first, or
    /// with [`EmbedError::Timeout`] once `timeout` elapses. `None` or a zero timeout waits
    /// indefinitely. Both listeners are registered before this returns and are removed
    /// whichever way the wait ends, including when the returned future is dropped.
    pub fn await_event(
        &self,
        success: &str,
        error: &str,
        timeout: Option<Duration>,
    ) -> LocalBoxFuture<'static, Result<Option<Value>>> {
        if self.is_destroyed() {
            return Box::pin(future::ready(Err(EmbedError::Destroyed)));
        }

        let (tx, rx) = oneshot::channel::<Result<Option<Value>>>();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let success_id = {
            let tx = tx.clone();
            self.once(success, move |data| settle(&tx, Ok(data.cloned())))
        };
        let error_id = {
            let tx = tx.clone();
            let error_name = error.to_string();
            self.once(error, move |data| {
                let outcome = match decode_payload::<ErrorPayload>(&error_name, data) {
                    Ok(payload) => Err(EmbedError::Remote {
                        code: payload.code,
                        message: payload.message,
                    }),
                    Err(e) => Err(e),
                };
                settle(&tx, outcome);
            })
        };

        let guard = AwaitGuard {
            bus: Rc::downgrade(&self.inner),
            listeners: [(success.to_string(), success_id), (error.to_string(), error_id)],
        };
        let timer = timeout
            .filter(|duration| !duration.is_zero())
            .map(|duration| (duration, self.inner.scheduler.sleep(duration)));
        let event = success.to_string();

        Box::pin(async move {
            let _guard = guard;
            let received = match timer {
                Some((duration, timer)) => match future::select(rx, timer).await {
                    Either::Left((received, _)) => received,
                    Either::Right(((), _)) => {
                        warn!(event = %event, timeout_ms = duration.as_millis() as u64, "Timed out waiting for event");
                        return Err(EmbedError::Timeout {
                            event,
                            after_ms: duration.as_millis() as u64,
                        });
                    }
                },
                None => rx.await,
            };
            received.unwrap_or(Err(EmbedError::Destroyed))
        })
    }

    /// Stop dispatching and publishing and detach from the host window. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        if let Some(subscription) = self.inner.subscription.borrow_mut().take() {
            subscription.cancel();
        }
        // Dropped outside the borrow: pending awaits observe their senders closing
        let registry = std::mem::take(&mut *self.inner.registry.borrow_mut());
        drop(registry);
        info!(origin = %self.inner.origin, "Event bus destroyed");
    }
}

type PendingSender = Rc<RefCell<Option<oneshot::Sender<Result<Option<Value>>>>>>;

fn settle(tx: &PendingSender, outcome: Result<Option<Value>>) {
    if let Some(tx) = tx.borrow_mut().take() {
        let _ = tx.send(outcome);
    }
}
