//! Console logging for the `log` option

use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

static INIT: Once = Once::new();

/// Install a `tracing` subscriber that writes to the browser console. Later calls are no-ops.
pub fn enable() {
    INIT.call_once(|| {
        let result = tracing_subscriber::fmt()
            .with_writer(ConsoleWriter)
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .try_init();
        if result.is_err() {
            web_sys::console::warn_1(&"[Vbrick Embed] A tracing subscriber is already installed".into());
        }
    });
}

#[derive(Clone, Copy)]
struct ConsoleWriter;

impl<'a> MakeWriter<'a> for ConsoleWriter {
    type Writer = ConsoleLine;

    fn make_writer(&'a self) -> Self::Writer {
        ConsoleLine::default()
    }
}

/// Buffers one formatted event and logs it on drop
#[derive(Default)]
struct ConsoleLine {
    buffer: Vec<u8>,
}

impl io::Write for ConsoleLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ConsoleLine {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buffer);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let message: wasm_bindgen::JsValue = format!("[Vbrick Embed] {}", line).into();
        if line.starts_with("ERROR") || line.starts_with("WARN") {
            web_sys::console::warn_1(&message);
        } else {
            web_sys::console::log_1(&message);
        }
    }
}
