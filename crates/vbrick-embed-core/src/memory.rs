//! In-memory platform
//!
//! A headless [`Platform`] for tests and non-browser hosts. Containers are registered by
//! selector, mounted frames are recorded with their attributes, every posted message is kept
//! in an outbox, and inbound messages are injected with [`MemoryPlatform::deliver`] as if the
//! host window had received them.
//!
//! Scheduling goes through tokio local tasks, so embeds and buses created on this platform
//! must run inside a [`tokio::task::LocalSet`].

use crate::error::{EmbedError, Result};
use crate::events::Envelope;
use crate::platform::{
    ContainerRef, FrameSpec, InboundHandler, InboundMessage, MessageChannel, Platform, Scheduler,
    Subscription,
};
use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

/// Scheduler backed by the current tokio `LocalSet`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { task() });
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }
}

/// A container element
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryElement {
    id: u64,
    selector: String,
}

impl MemoryElement {
    pub fn selector(&self) -> &str {
        &self.selector
    }
}

/// Identity of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryWindow(u64);

/// A mounted frame
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFrame {
    pub id: u64,
    pub window: MemoryWindow,
    pub container: MemoryElement,
    pub spec: FrameSpec,
}

/// A message posted to a frame window
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub window: MemoryWindow,
    pub target_origin: String,
    pub message: Value,
}

impl PostedMessage {
    /// The event name of the posted envelope
    pub fn event(&self) -> Option<String> {
        serde_json::from_value::<Envelope>(self.message.clone())
            .ok()
            .map(|envelope| envelope.event)
    }
}

type SharedHandler = Rc<dyn Fn(InboundMessage<MemoryWindow>)>;

#[derive(Default)]
struct MemoryState {
    next_id: Cell<u64>,
    containers: RefCell<HashMap<String, MemoryElement>>,
    frames: RefCell<Vec<MemoryFrame>>,
    outbox: RefCell<Vec<PostedMessage>>,
    handlers: RefCell<Vec<(u64, SharedHandler)>>,
    fail_next_mount: Cell<bool>,
}

impl MemoryState {
    fn next_id(&self) -> u64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }
}

/// Headless document with frames and a message hub
#[derive(Clone, Default)]
pub struct MemoryPlatform {
    state: Rc<MemoryState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an element reachable through `selector`
    pub fn add_container(&self, selector: &str) -> MemoryElement {
        let element = MemoryElement {
            id: self.state.next_id(),
            selector: selector.to_string(),
        };
        self.state
            .containers
            .borrow_mut()
            .insert(selector.to_string(), element.clone());
        element
    }

    /// Make the next `mount` fail
    pub fn fail_next_mount(&self) {
        self.state.fail_next_mount.set(true);
    }

    /// A window with no frame, e.g. another embed on the page or the page itself
    pub fn new_window(&self) -> MemoryWindow {
        MemoryWindow(self.state.next_id())
    }

    /// A channel to an arbitrary window, without mounting a frame
    pub fn channel_for(&self, window: MemoryWindow) -> MemoryChannel {
        MemoryChannel {
            window,
            state: self.state.clone(),
        }
    }

    /// Frames currently attached to the document
    pub fn frames(&self) -> Vec<MemoryFrame> {
        self.state.frames.borrow().clone()
    }

    /// The most recently mounted frame still attached
    pub fn last_frame(&self) -> Option<MemoryFrame> {
        self.state.frames.borrow().last().cloned()
    }

    /// Every message posted to `window`, oldest first
    pub fn posted(&self, window: MemoryWindow) -> Vec<PostedMessage> {
        self.state
            .outbox
            .borrow()
            .iter()
            .filter(|posted| posted.window == window)
            .cloned()
            .collect()
    }

    /// Event names posted to `window`, oldest first
    pub fn posted_events(&self, window: MemoryWindow) -> Vec<String> {
        self.posted(window)
            .iter()
            .filter_map(PostedMessage::event)
            .collect()
    }

    /// Number of installed host-window message handlers
    pub fn handler_count(&self) -> usize {
        self.state.handlers.borrow().len()
    }

    /// Deliver a raw message to every installed handler
    pub fn deliver(&self, origin: &str, source: Option<MemoryWindow>, data: Value) {
        self.deliver_message(InboundMessage {
            origin: origin.to_string(),
            source,
            data: Ok(data),
        });
    }

    /// Deliver an envelope sent by `source`
    pub fn deliver_event(&self, origin: &str, source: MemoryWindow, event: &str, data: Option<Value>) {
        let message = serde_json::to_value(Envelope::new(event, data)).unwrap_or(Value::Null);
        self.deliver(origin, Some(source), message);
    }

    /// Deliver a message whose data could not be decoded by the host
    pub fn deliver_undecodable(&self, origin: &str, source: MemoryWindow, reason: &str) {
        self.deliver_message(InboundMessage {
            origin: origin.to_string(),
            source: Some(source),
            data: Err(reason.to_string()),
        });
    }

    fn deliver_message(&self, message: InboundMessage<MemoryWindow>) {
        let handlers: Vec<SharedHandler> = self
            .state
            .handlers
            .borrow()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(message.clone());
        }
    }
}

impl Platform for MemoryPlatform {
    type Element = MemoryElement;
    type Frame = MemoryFrame;
    type Channel = MemoryChannel;

    fn resolve_container(&self, container: ContainerRef<MemoryElement>) -> Result<MemoryElement> {
        let containers = self.state.containers.borrow();
        match container {
            ContainerRef::Selector(selector) => containers
                .get(&selector)
                .cloned()
                .ok_or(EmbedError::ContainerNotFound(selector)),
            ContainerRef::Element(element) => {
                if containers.values().any(|known| *known == element) {
                    Ok(element)
                } else {
                    Err(EmbedError::ContainerNotFound(element.selector))
                }
            }
        }
    }

    fn mount(&self, container: &MemoryElement, spec: &FrameSpec) -> Result<MemoryFrame> {
        if self.state.fail_next_mount.replace(false) {
            return Err(EmbedError::Mount("frame creation failed".to_string()));
        }
        let frame = MemoryFrame {
            id: self.state.next_id(),
            window: self.new_window(),
            container: container.clone(),
            spec: spec.clone(),
        };
        self.state.frames.borrow_mut().push(frame.clone());
        Ok(frame)
    }

    fn open_channel(&self, frame: &MemoryFrame) -> Result<MemoryChannel> {
        let attached = self.state.frames.borrow().iter().any(|f| f.id == frame.id);
        if !attached {
            return Err(EmbedError::Mount("frame has no content window".to_string()));
        }
        Ok(self.channel_for(frame.window))
    }

    fn unmount(&self, frame: &MemoryFrame) {
        self.state.frames.borrow_mut().retain(|f| f.id != frame.id);
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::new(TokioScheduler)
    }
}

/// Channel to one in-memory window
pub struct MemoryChannel {
    window: MemoryWindow,
    state: Rc<MemoryState>,
}

impl MessageChannel for MemoryChannel {
    type Window = MemoryWindow;

    fn window(&self) -> &MemoryWindow {
        &self.window
    }

    fn post(&self, message: &Value, target_origin: &str) -> Result<()> {
        self.state.outbox.borrow_mut().push(PostedMessage {
            window: self.window,
            target_origin: target_origin.to_string(),
            message: message.clone(),
        });
        Ok(())
    }

    fn listen(&self, handler: InboundHandler<MemoryWindow>) -> Subscription {
        let id = self.state.next_id();
        self.state
            .handlers
            .borrow_mut()
            .push((id, Rc::from(handler)));

        let state = Rc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state.handlers.borrow_mut().retain(|(existing, _)| *existing != id);
            }
        })
    }
}
