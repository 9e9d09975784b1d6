//! Browser platform - frames, `postMessage` and the page event loop

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;
use vbrick_embed_core::platform::{InboundHandler, InboundMessage};
use vbrick_embed_core::{
    ContainerRef, EmbedError, FrameSpec, MessageChannel, Platform, Result, Scheduler, Subscription,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlIFrameElement, MessageEvent, Window};

/// Best-effort message from a thrown JS value
pub(crate) fn js_error_message(value: &JsValue) -> String {
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// The host page
#[derive(Clone)]
pub struct BrowserPlatform {
    window: Window,
    document: Document,
}

impl BrowserPlatform {
    pub fn new() -> Result<Self> {
        let window = web_sys::window()
            .ok_or_else(|| EmbedError::Mount("no global window".to_string()))?;
        let document = window
            .document()
            .ok_or_else(|| EmbedError::Mount("window has no document".to_string()))?;
        Ok(Self { window, document })
    }
}

impl Platform for BrowserPlatform {
    type Element = Element;
    type Frame = HtmlIFrameElement;
    type Channel = BrowserChannel;

    fn resolve_container(&self, container: ContainerRef<Element>) -> Result<Element> {
        match container {
            ContainerRef::Element(element) => Ok(element),
            ContainerRef::Selector(selector) => match self.document.query_selector(&selector) {
                Ok(Some(element)) => Ok(element),
                Ok(None) => Err(EmbedError::ContainerNotFound(selector)),
                Err(e) => Err(EmbedError::InvalidConfig(format!(
                    "invalid selector '{}': {}",
                    selector,
                    js_error_message(&e)
                ))),
            },
        }
    }

    fn mount(&self, container: &Element, spec: &FrameSpec) -> Result<HtmlIFrameElement> {
        let mount_err = |e: JsValue| EmbedError::Mount(js_error_message(&e));

        let frame: HtmlIFrameElement = self
            .document
            .create_element("iframe")
            .map_err(mount_err)?
            .dyn_into()
            .map_err(|_| EmbedError::Mount("created element is not an iframe".to_string()))?;

        frame.set_src(spec.src.as_str());
        frame.set_width(&spec.width);
        frame.set_height(&spec.height);
        frame.set_frame_border(&spec.frame_border);
        frame.set_allow_fullscreen(spec.allow_fullscreen);
        frame.set_attribute("allow", &spec.allow).map_err(mount_err)?;
        if let Some(class_name) = &spec.class_name {
            frame.set_class_name(class_name);
        }

        container.append_child(&frame).map_err(mount_err)?;
        Ok(frame)
    }

    fn open_channel(&self, frame: &HtmlIFrameElement) -> Result<BrowserChannel> {
        let target = frame
            .content_window()
            .ok_or_else(|| EmbedError::Mount("frame has no content window".to_string()))?;
        Ok(BrowserChannel {
            target: FrameWindow(target),
            host: self.window.clone(),
        })
    }

    fn unmount(&self, frame: &HtmlIFrameElement) {
        frame.remove();
    }

    fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::new(BrowserScheduler {
            window: self.window.clone(),
        })
    }
}

/// A window compared by identity
#[derive(Debug, Clone)]
pub struct FrameWindow(Window);

impl PartialEq for FrameWindow {
    fn eq(&self, other: &Self) -> bool {
        js_sys::Object::is(&self.0, &other.0)
    }
}

/// `postMessage` to a frame, `message` events from the host window
pub struct BrowserChannel {
    target: FrameWindow,
    host: Window,
}

impl MessageChannel for BrowserChannel {
    type Window = FrameWindow;

    fn window(&self) -> &FrameWindow {
        &self.target
    }

    fn post(&self, message: &Value, target_origin: &str) -> Result<()> {
        // Objects, not Maps, on the receiving side
        let value = message
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| EmbedError::Serialization(e.to_string()))?;
        self.target
            .0
            .post_message(&value, target_origin)
            .map_err(|e| EmbedError::Serialization(js_error_message(&e)))
    }

    fn listen(&self, handler: InboundHandler<FrameWindow>) -> Subscription {
        let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
            let source = event
                .source()
                .map(|source| FrameWindow(source.unchecked_into::<Window>()));
            let data = serde_wasm_bindgen::from_value::<Value>(event.data()).map_err(|e| e.to_string());
            handler(InboundMessage {
                origin: event.origin(),
                source,
                data,
            });
        }) as Box<dyn FnMut(MessageEvent)>);

        if let Err(e) = self
            .host
            .add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
        {
            tracing::error!(error = %js_error_message(&e), "Failed to install message listener");
        }

        let host = self.host.clone();
        Subscription::new(move || {
            let _ = host.remove_event_listener_with_callback("message", closure.as_ref().unchecked_ref());
            drop(closure);
        })
    }
}

/// Microtasks for deferral, `setTimeout` for timers
pub struct BrowserScheduler {
    window: Window,
}

impl Scheduler for BrowserScheduler {
    fn defer(&self, task: Box<dyn FnOnce()>) {
        wasm_bindgen_futures::spawn_local(async move { task() });
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        let callback = Closure::once(move || {
            let _ = tx.send(());
        });
        let millis = i32::try_from(duration.as_millis()).unwrap_or(i32::MAX);

        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), millis)
        {
            Ok(handle) => Timeout {
                rx,
                handle,
                window: self.window.clone(),
                _callback: callback,
            }
            .boxed_local(),
            Err(e) => {
                // A timer that cannot be armed never fires
                tracing::warn!(error = %js_error_message(&e), "Failed to start timer");
                future::pending().boxed_local()
            }
        }
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

/// Pending `setTimeout`, cleared when dropped
struct Timeout {
    rx: oneshot::Receiver<()>,
    handle: i32,
    window: Window,
    _callback: Closure<dyn FnMut()>,
}

impl Future for Timeout {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.rx.poll_unpin(cx).map(|_| ())
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        self.window.clear_timeout_with_handle(self.handle);
    }
}
