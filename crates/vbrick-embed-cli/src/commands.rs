//! CLI command implementations

use crate::output::{format_rows, to_json, OutputFormat};
use crate::Reply;
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use tabled::Tabled;
use tokio::task::LocalSet;
use vbrick_embed_core::events::CATALOG;
use vbrick_embed_core::memory::MemoryPlatform;
use vbrick_embed_core::{
    build_embed_url, ContentKind, Embed, EmbedConfig, EmbedKind, Family, FrameSpec, Video, Webcast,
};

/// Print the player URL
pub fn url(kind: ContentKind, id: &str, config: &EmbedConfig, format: &str) -> anyhow::Result<()> {
    let url = build_embed_url(kind, id, config)?;

    match OutputFormat::from(format) {
        OutputFormat::Json => println!(
            "{}",
            to_json(&json!({ "kind": kind.to_string(), "id": id, "url": url.as_str() }))
        ),
        _ => println!("{}", url),
    }
    Ok(())
}

/// Print an iframe snippet
pub fn snippet(kind: ContentKind, id: &str, config: &EmbedConfig, format: &str) -> anyhow::Result<()> {
    let src = build_embed_url(kind, id, config)?;
    let spec = FrameSpec::new(src, config.width(), config.height(), config.class_name.clone());
    let html = spec.to_html();

    match OutputFormat::from(format) {
        OutputFormat::Json => println!(
            "{}",
            to_json(&json!({ "kind": kind.to_string(), "id": id, "src": spec.src.as_str(), "html": html }))
        ),
        _ => println!("{}", html),
    }
    Ok(())
}

#[derive(Serialize, Tabled)]
struct EventRow {
    name: &'static str,
    family: Family,
}

/// Catalogued events, optionally restricted to one family
fn event_rows(family: Option<Family>) -> Vec<EventRow> {
    CATALOG
        .iter()
        .filter(|(_, f)| family.map_or(true, |wanted| wanted == *f))
        .map(|(name, family)| EventRow { name, family: *family })
        .collect()
}

/// List player events
pub fn events(family: Option<Family>, format: &str) {
    let rows = event_rows(family);
    println!(
        "{}",
        format_rows(&rows, OutputFormat::from(format), |row| format!("{:<24} {}", row.name, row.family))
    );
}

/// How the scripted player behaves in `simulate`
pub struct Script {
    pub reply: Reply,
    pub error_code: String,
}

/// Outcome of a simulated handshake
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub initialized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    pub player_status: String,
    pub volume: f64,
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    /// Messages the embed posted to the player
    pub posted: Vec<Value>,
    /// Events delivered to page listeners, in order
    pub observed: Vec<String>,
}

/// Run the handshake against a scripted in-memory player
pub async fn simulate(
    kind: ContentKind,
    id: &str,
    config: EmbedConfig,
    script: Script,
    format: &str,
) -> anyhow::Result<()> {
    let local = LocalSet::new();
    let report = match kind {
        ContentKind::Video => local.run_until(run_script::<Video>(id, config, &script)).await?,
        ContentKind::Webcast => local.run_until(run_script::<Webcast>(id, config, &script)).await?,
    };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&report)),
        _ => print_report(&report),
    }
    Ok(())
}

/// Sample metadata the scripted player reports after loading
fn sample_info(kind: ContentKind, id: &str) -> Value {
    match kind {
        ContentKind::Video => json!({
            "id": id,
            "title": "Simulated video",
            "isLive": false,
            "duration": 120.0,
            "subtitles": [{ "language": "en", "label": "English" }]
        }),
        ContentKind::Webcast => json!({
            "id": id,
            "title": "Simulated webcast",
            "isLive": true,
            "status": "InProgress"
        }),
    }
}

async fn run_script<K: EmbedKind>(id: &str, config: EmbedConfig, script: &Script) -> anyhow::Result<SimulationReport> {
    let origin = config.origin()?;
    let platform = MemoryPlatform::new();
    platform.add_container("#player");
    let embed = Embed::<K, MemoryPlatform>::create(platform.clone(), "#player".into(), id, config)?;

    let observed = Rc::new(RefCell::new(Vec::new()));
    for (name, _) in CATALOG {
        if K::accepts(name) {
            let sink = observed.clone();
            embed.on_named(name, move |_| sink.borrow_mut().push(name.to_string()))?;
        }
    }

    let init = embed.initialize();
    let window = platform
        .last_frame()
        .map(|frame| frame.window)
        .ok_or_else(|| anyhow::anyhow!("the embed did not mount a frame"))?;

    match script.reply {
        Reply::Load => {
            platform.deliver_event(&origin, window, "load", None);
            platform.deliver_event(&origin, window, K::LOADED_EVENT, Some(sample_info(K::CONTENT, id)));
        }
        Reply::Error => {
            platform.deliver_event(&origin, window, "error", Some(json!({ "code": script.error_code })));
        }
        Reply::Silent => {
            tracing::info!(timeout_seconds = embed.config().timeout_seconds, "Waiting for the handshake to time out");
        }
    }

    let outcome = init.await;
    if outcome.is_ok() {
        platform.deliver_event(&origin, window, "authChanged", Some(json!({ "isAuthenticated": true })));
        platform.deliver_event(&origin, window, "playerStatusChanged", Some(json!({ "status": "Playing" })));
    }

    // Page listeners run on later turns
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    let report = SimulationReport {
        initialized: outcome.is_ok(),
        error: outcome.as_ref().err().map(|e| e.to_string()),
        error_code: outcome.as_ref().err().map(|e| e.error_code()),
        player_status: embed.player_status().to_string(),
        volume: embed.volume(),
        is_live: embed.is_live(),
        info: embed.info().and_then(|info| serde_json::to_value(info).ok()),
        posted: platform.posted(window).into_iter().map(|posted| posted.message).collect(),
        observed: observed.borrow().clone(),
    };
    embed.destroy();
    Ok(report)
}

fn print_report(report: &SimulationReport) {
    println!("Handshake:");
    match &report.error {
        None => println!("  Result: initialized"),
        Some(error) => println!("  Result: failed ({}: {})", report.error_code.unwrap_or("UNKNOWN"), error),
    }
    println!("  Status: {}", report.player_status);
    println!("  Volume: {}", report.volume);
    println!("  Live: {}", report.is_live);
    if let Some(info) = &report.info {
        println!("  Info: {}", info);
    }

    println!("\nPosted to player:");
    for message in &report.posted {
        println!("  {}", message);
    }

    println!("\nDelivered to page listeners:");
    for event in &report.observed {
        println!("  {}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: &str = "https://acme.rev.vbrick.com";

    fn script(reply: Reply) -> Script {
        Script {
            reply,
            error_code: "NotFound".to_string(),
        }
    }

    #[test]
    fn test_event_rows_filter() {
        assert_eq!(event_rows(None).len(), CATALOG.len());
        let video = event_rows(Some(Family::Video));
        assert!(video.iter().all(|row| row.family == Family::Video));
        assert!(video.iter().any(|row| row.name == "seeked"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_simulated_video_load() {
        let report = LocalSet::new()
            .run_until(run_script::<Video>("v1", EmbedConfig::new(ORIGIN), &script(Reply::Load)))
            .await
            .unwrap();

        assert!(report.initialized);
        assert_eq!(report.player_status, "Playing");
        assert_eq!(report.posted[0]["event"], "authenticated");
        assert_eq!(report.info.unwrap()["title"], "Simulated video");
        assert_eq!(
            report.observed,
            vec!["load", "videoLoaded", "authChanged", "playerStatusChanged"]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_simulated_webcast_error() {
        let report = LocalSet::new()
            .run_until(run_script::<Webcast>("w1", EmbedConfig::new(ORIGIN), &script(Reply::Error)))
            .await
            .unwrap();

        assert!(!report.initialized);
        assert_eq!(report.error_code, Some("REMOTE"));
        assert_eq!(report.player_status, "Error");
        assert_eq!(report.posted, vec![json!({ "event": "error", "data": { "code": "RemoteError" } })]);
        assert_eq!(report.observed, vec!["error", "error"]);
    }
}
