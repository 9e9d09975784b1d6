//! Platform seams
//!
//! The embed and its bus never touch a DOM or an executor directly. A [`Platform`] mounts
//! frames and opens a [`MessageChannel`] to each frame's content window, and a [`Scheduler`]
//! provides deferral, timers and local task spawning. The browser implementation lives in
//! the wasm crate; [`crate::memory`] provides a headless one.

use crate::error::Result;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::rc::Rc;
use std::time::Duration;
use url::Url;

/// Cooperative single-threaded scheduling primitives
pub trait Scheduler {
    /// Run `task` on a later scheduling turn
    fn defer(&self, task: Box<dyn FnOnce()>);

    /// Timer future; dropping it cancels the timer
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    /// Drive a future to completion without awaiting it
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// A message received by the host window
#[derive(Debug, Clone)]
pub struct InboundMessage<W> {
    /// Origin reported by the messaging primitive
    pub origin: String,
    /// Window that sent the message, if known
    pub source: Option<W>,
    /// Decoded message data, or why it could not be decoded
    pub data: std::result::Result<Value, String>,
}

/// Handler invoked for each inbound message
pub type InboundHandler<W> = Box<dyn Fn(InboundMessage<W>)>;

/// Detaches a message handler when cancelled or dropped
#[must_use = "dropping a subscription detaches the handler"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Bidirectional channel to exactly one peer window
pub trait MessageChannel: 'static {
    /// Window identity; equality means "the same window"
    type Window: PartialEq + 'static;

    /// The peer window this channel is bound to
    fn window(&self) -> &Self::Window;

    /// Send one message to the peer window
    fn post(&self, message: &Value, target_origin: &str) -> Result<()>;

    /// Install a handler for every message the host window receives
    fn listen(&self, handler: InboundHandler<Self::Window>) -> Subscription;
}

/// Where to attach the frame
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerRef<E> {
    Element(E),
    Selector(String),
}

impl<E> From<&str> for ContainerRef<E> {
    fn from(selector: &str) -> Self {
        ContainerRef::Selector(selector.to_string())
    }
}

impl<E> From<String> for ContainerRef<E> {
    fn from(selector: String) -> Self {
        ContainerRef::Selector(selector)
    }
}

/// Attributes of the embed iframe
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpec {
    pub src: Url,
    pub width: String,
    pub height: String,
    pub class_name: Option<String>,
    /// Value of the `allow` attribute
    pub allow: String,
    pub frame_border: String,
    pub allow_fullscreen: bool,
}

impl FrameSpec {
    pub fn new(src: Url, width: &str, height: &str, class_name: Option<String>) -> Self {
        Self {
            src,
            width: width.to_string(),
            height: height.to_string(),
            class_name,
            allow: "autoplay".to_string(),
            frame_border: "0".to_string(),
            allow_fullscreen: true,
        }
    }

    /// Render as an HTML `<iframe>` tag
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<iframe src=\"{}\" width=\"{}\" height=\"{}\"",
            escape_attr(self.src.as_str()),
            escape_attr(&self.width),
            escape_attr(&self.height)
        );
        if let Some(class) = &self.class_name {
            html.push_str(&format!(" class=\"{}\"", escape_attr(class)));
        }
        html.push_str(&format!(
            " allow=\"{}\" frameborder=\"{}\"",
            escape_attr(&self.allow),
            escape_attr(&self.frame_border)
        ));
        if self.allow_fullscreen {
            html.push_str(" allowfullscreen");
        }
        html.push_str("></iframe>");
        html
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Host environment for embeds
pub trait Platform: 'static {
    type Element: Clone + 'static;
    type Frame: 'static;
    type Channel: MessageChannel;

    /// Resolve an element handle or selector against the document
    fn resolve_container(&self, container: ContainerRef<Self::Element>) -> Result<Self::Element>;

    /// Create the frame and append it to `container`
    fn mount(&self, container: &Self::Element, spec: &FrameSpec) -> Result<Self::Frame>;

    /// Open a channel bound to the frame's content window
    fn open_channel(&self, frame: &Self::Frame) -> Result<Self::Channel>;

    /// Remove the frame from the document
    fn unmount(&self, frame: &Self::Frame);

    fn scheduler(&self) -> Rc<dyn Scheduler>;
}
