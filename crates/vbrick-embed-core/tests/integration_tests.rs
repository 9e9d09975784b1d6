//! Integration tests for Vbrick Embed Core

use serde_json::json;
use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;
use vbrick_embed_core::events::{self, EmbedEvent, PlayerStatusChanged, WebcastLoaded, CATALOG};
use vbrick_embed_core::memory::{MemoryPlatform, MemoryWindow};
use vbrick_embed_core::{
    embed_video, embed_webcast, Embed, EmbedConfig, EmbedError, EmbedKind, EmbedToken, ErrorPayload,
    LocalError, Platform, PlayerStatus, Subtitles, TokenType, Video, VideoEmbed, WebcastEmbed,
};

const ORIGIN: &str = "https://acme.rev.vbrick.com";

async fn run_local<F: Future<Output = ()>>(test: F) {
    LocalSet::new().run_until(test).await;
}

/// Let deferred listeners and spawned tasks run
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn config() -> EmbedConfig {
    EmbedConfig::new(ORIGIN)
}

fn video(config: EmbedConfig) -> (MemoryPlatform, VideoEmbed<MemoryPlatform>) {
    let platform = MemoryPlatform::new();
    platform.add_container("#player");
    let embed = embed_video(platform.clone(), "#player".into(), "video-1", config).unwrap();
    (platform, embed)
}

fn webcast(config: EmbedConfig) -> (MemoryPlatform, WebcastEmbed<MemoryPlatform>) {
    let platform = MemoryPlatform::new();
    platform.add_container("#player");
    let embed = embed_webcast(platform.clone(), "#player".into(), "webcast-1", config).unwrap();
    (platform, embed)
}

fn frame_window(platform: &MemoryPlatform) -> MemoryWindow {
    platform.last_frame().expect("frame mounted").window
}

fn local_errors<K: EmbedKind, P: Platform>(embed: &Embed<K, P>) -> Rc<RefCell<Vec<LocalError>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    embed.on_local_error(move |error| sink.borrow_mut().push(error.clone()));
    errors
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_initialize_runs_handshake_once() {
    run_local(async {
        let (platform, embed) = video(config().with_token(EmbedToken::jwt("t-1")));

        let first = embed.initialize();
        let second = embed.initialize();
        assert_eq!(platform.frames().len(), 1);

        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);

        assert_eq!(first.await, Ok(()));
        assert_eq!(second.await, Ok(()));
        assert_eq!(embed.initialize().await, Ok(()));

        assert_eq!(platform.frames().len(), 1);
        assert_eq!(embed.player_status(), PlayerStatus::Paused);

        let posted = platform.posted(window);
        assert_eq!(posted.len(), 1);
        assert_eq!(
            posted[0].message,
            json!({ "event": "authenticated", "data": { "type": "JWT", "token": "t-1" } })
        );
        assert_eq!(posted[0].target_origin, ORIGIN);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_initialize_without_token_publishes_bare_authenticated() {
    run_local(async {
        let (platform, embed) = video(config());
        let init = embed.initialize();
        let window = frame_window(&platform);

        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        assert_eq!(platform.posted(window)[0].message, json!({ "event": "authenticated" }));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_frame_attributes() {
    run_local(async {
        let mut config = config();
        config.width = Some("640".into());
        config.class_name = Some("vb-player".into());
        config.autoplay = true;
        let (platform, embed) = video(config);

        let _init = embed.initialize();
        let frame = platform.last_frame().unwrap();

        assert_eq!(frame.container.selector(), "#player");
        assert_eq!(frame.spec.src.as_str(), "https://acme.rev.vbrick.com/embed?id=video-1&autoplay=true");
        assert_eq!(frame.spec.width, "640");
        assert_eq!(frame.spec.height, "100%");
        assert_eq!(frame.spec.class_name.as_deref(), Some("vb-player"));
        assert_eq!(frame.spec.allow, "autoplay");
        assert_eq!(frame.spec.frame_border, "0");
        assert!(frame.spec.allow_fullscreen);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_initialize_times_out() {
    run_local(async {
        let (platform, embed) = video(config().with_timeout_seconds(0.5));
        let errors = local_errors(&embed);
        let start = tokio::time::Instant::now();

        let err = embed.initialize().await.unwrap_err();

        assert_eq!(err, EmbedError::Timeout { event: "load".into(), after_ms: 500 });
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(embed.player_status(), PlayerStatus::Error);
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(errors.borrow()[0].cause, Some(err.clone()));

        let window = frame_window(&platform);
        assert_eq!(platform.posted_events(window), vec!["error"]);
        assert_eq!(platform.posted(window)[0].message["data"]["code"], "Timeout");

        // Late traffic finds nobody waiting and cannot revive the instance
        platform.deliver_event(ORIGIN, window, "load", None);
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Playing" })));
        settle().await;

        assert_eq!(embed.player_status(), PlayerStatus::Error);
        assert_eq!(platform.posted_events(window), vec!["error"]);
        assert_eq!(embed.initialize().await, Err(err));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_remote_error_before_load_rejects() {
    run_local(async {
        let (platform, embed) = video(config());
        let codes = Rc::new(RefCell::new(Vec::new()));
        let sink = codes.clone();
        embed.on::<events::Error>(move |payload: ErrorPayload| sink.borrow_mut().push(payload.code));

        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "error", Some(json!({ "code": "Forbidden" })));
        platform.deliver_event(ORIGIN, window, "load", None);

        let err = init.await.unwrap_err();
        assert_eq!(err, EmbedError::Remote { code: "Forbidden".into(), message: None });
        assert_eq!(embed.player_status(), PlayerStatus::Error);

        settle().await;
        // The remote error and the synthetic one both reach page listeners
        assert_eq!(*codes.borrow(), vec!["Forbidden".to_string(), "RemoteError".to_string()]);
        assert!(!platform.posted_events(window).contains(&"authenticated".to_string()));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_load_wins_over_pending_timer() {
    run_local(async {
        let (platform, embed) = video(config().with_timeout_seconds(5.0));
        let init = embed.initialize();
        let window = frame_window(&platform);

        tokio::time::sleep(Duration::from_secs(4)).await;
        platform.deliver_event(ORIGIN, window, "load", None);
        assert_eq!(init.await, Ok(()));

        // Past the original deadline nothing fires
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(embed.player_status(), PlayerStatus::Paused);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_unsupported_token_fails_fast() {
    run_local(async {
        let token = EmbedToken {
            kind: TokenType::Other("Cookie".into()),
            value: "c".into(),
            issuer: None,
        };
        let (platform, embed) = video(config().with_token(token));
        let start = tokio::time::Instant::now();

        let err = embed.initialize().await.unwrap_err();

        assert_eq!(err, EmbedError::UnsupportedTokenType("Cookie".into()));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(embed.player_status(), PlayerStatus::Error);

        let window = frame_window(&platform);
        assert_eq!(platform.posted_events(window), vec!["error"]);
        assert_eq!(platform.posted(window)[0].message["data"]["code"], "UnsupportedToken");
    })
    .await;
}

#[test]
fn test_out_of_range_timeout_is_rejected_at_construction() {
    let platform = MemoryPlatform::new();
    platform.add_container("#player");

    let err = embed_video(platform.clone(), "#player".into(), "video-1", config().with_timeout_seconds(1e20))
        .err()
        .unwrap();

    assert_eq!(err.error_code(), "INVALID_CONFIG");
    assert!(platform.frames().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_mount_failure() {
    run_local(async {
        let (platform, embed) = video(config());
        let errors = local_errors(&embed);
        let codes = Rc::new(RefCell::new(Vec::new()));
        let sink = codes.clone();
        embed.on::<events::Error>(move |payload| sink.borrow_mut().push(payload.code));
        platform.fail_next_mount();

        let err = embed.initialize().await.unwrap_err();
        settle().await;

        assert_eq!(err.error_code(), "MOUNT");
        assert_eq!(embed.player_status(), PlayerStatus::Error);
        assert!(platform.frames().is_empty());
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(*codes.borrow(), vec!["LoadFailed".to_string()]);
        assert_eq!(embed.initialize().await, Err(err));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_unconfirmed_authorization_is_a_local_error() {
    run_local(async {
        let (platform, embed) = video(config().with_token(EmbedToken::access_token("a")));
        let errors = local_errors(&embed);
        let init = embed.initialize();
        let window = frame_window(&platform);

        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();
        platform.deliver_event(ORIGIN, window, "error", Some(json!({ "code": "Unauthorized" })));
        settle().await;

        let errors = errors.borrow();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].cause,
            Some(EmbedError::Remote { code: "Unauthorized".into(), message: None })
        );
        // Not a handshake failure
        assert_eq!(embed.player_status(), PlayerStatus::Paused);
        assert_eq!(platform.posted_events(window), vec!["authenticated"]);
    })
    .await;
}

// =============================================================================
// Message filtering
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_foreign_messages_never_reach_listeners() {
    run_local(async {
        let (platform, embed) = video(config());
        let hits = Rc::new(RefCell::new(Vec::new()));

        let video_events: Vec<&str> = CATALOG
            .iter()
            .filter(|(name, _)| Video::accepts(name))
            .map(|(name, _)| *name)
            .collect();
        for name in &video_events {
            let sink = hits.clone();
            let event = name.to_string();
            embed.on_named(name, move |_| sink.borrow_mut().push(event.clone())).unwrap();
        }

        let init = embed.initialize();
        let window = frame_window(&platform);
        let other_frame = platform.new_window();

        for name in &video_events {
            platform.deliver_event(ORIGIN, other_frame, name, Some(json!({})));
            platform.deliver_event("https://evil.example.com", window, name, Some(json!({})));
            platform.deliver(ORIGIN, None, json!({ "event": name }));
        }
        settle().await;

        assert!(hits.borrow().is_empty());
        assert_eq!(embed.player_status(), PlayerStatus::Initializing);

        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();
        settle().await;
        assert_eq!(*hits.borrow(), vec!["load".to_string()]);
    })
    .await;
}

// =============================================================================
// Derived state and ordering
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_page_listeners_see_updated_status() {
    run_local(async {
        let (platform, embed) = video(config());
        let observed = Rc::new(RefCell::new(Vec::new()));

        let sink = observed.clone();
        let probe = embed.clone();
        embed.on::<PlayerStatusChanged>(move |payload| {
            sink.borrow_mut().push((payload.status, probe.player_status()));
        });

        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Playing" })));
        settle().await;

        // Registered after events have already flowed
        let sink = observed.clone();
        let probe = embed.clone();
        embed.on::<PlayerStatusChanged>(move |payload| {
            sink.borrow_mut().push((payload.status, probe.player_status()));
        });

        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Buffering" })));
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Seeking" })));
        settle().await;

        let observed = observed.borrow();
        assert_eq!(observed.len(), 5);
        assert_eq!(observed[0], (PlayerStatus::Playing, PlayerStatus::Playing));
        for (reported, cached) in observed.iter() {
            assert!(
                *reported == *cached || *cached == PlayerStatus::Seeking,
                "listener saw stale status {cached} for {reported}"
            );
        }
        assert_eq!(embed.player_status(), PlayerStatus::Seeking);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_listener_runs_after_internal_update() {
    run_local(async {
        let (platform, embed) = video(config());
        let seen = Rc::new(RefCell::new(None));
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        let sink = seen.clone();
        let probe = embed.clone();
        embed.on::<events::VolumeChanged>(move |payload| {
            *sink.borrow_mut() = Some((payload.volume, probe.volume()));
        });

        platform.deliver_event(ORIGIN, window, "volumeChanged", Some(json!({ "volume": 0.3 })));
        // Not yet: page listeners run on a later turn
        assert!(seen.borrow().is_none());
        assert_eq!(embed.volume(), 0.3);

        settle().await;
        assert_eq!(*seen.borrow(), Some((0.3, 0.3)));
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_cached_state_tracks_events() {
    run_local(async {
        let (platform, embed) = video(config());
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        platform.deliver_event(
            ORIGIN,
            window,
            "videoLoaded",
            Some(json!({ "id": "video-1", "title": "Town hall", "isLive": true, "subtitles": [{ "language": "en" }] })),
        );
        platform.deliver_event(ORIGIN, window, "subtitlesChanged", Some(json!({ "enabled": true, "language": "fr" })));
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Ended" })));

        let info = embed.info().unwrap();
        assert_eq!(info.title, "Town hall");
        assert_eq!(info.subtitles[0].language, "en");
        assert!(embed.is_live());
        assert_eq!(embed.current_subtitles(), Subtitles::language("fr"));
        assert_eq!(embed.player_status(), PlayerStatus::Ended);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_bad_payload_is_local_only() {
    run_local(async {
        let (platform, embed) = video(config());
        let errors = local_errors(&embed);
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Exploded" })));
        platform.deliver_event(ORIGIN, window, "videoLoaded", Some(json!("nope")));

        assert_eq!(errors.borrow().len(), 2);
        assert_eq!(embed.player_status(), PlayerStatus::Paused);
        assert!(embed.info().is_none());
        assert_eq!(platform.posted_events(window), vec!["authenticated"]);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_webcast_info_has_no_status() {
    run_local(async {
        let (platform, embed) = webcast(config());
        let raw = Rc::new(RefCell::new(None));
        let sink = raw.clone();
        embed.on::<WebcastLoaded>(move |payload| *sink.borrow_mut() = Some(payload));

        let init = embed.initialize();
        let window = frame_window(&platform);
        assert_eq!(
            platform.last_frame().unwrap().spec.src.as_str(),
            "https://acme.rev.vbrick.com/embed/webcast/webcast-1"
        );
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        platform.deliver_event(
            ORIGIN,
            window,
            WebcastLoaded::NAME,
            Some(json!({ "status": "InProgress", "title": "X", "isLive": true })),
        );
        settle().await;

        let info = embed.info().unwrap();
        assert_eq!(info.title, "X");
        assert!(serde_json::to_value(&info).unwrap().get("status").is_none());
        assert!(embed.is_live());
        // Page listeners get the event as sent
        assert_eq!(raw.borrow().as_ref().unwrap()["status"], "InProgress");
    })
    .await;
}

// =============================================================================
// Commands
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_commands_are_published() {
    run_local(async {
        let (platform, embed) = video(config());
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        embed.play();
        embed.pause();
        embed.set_volume(0.75);
        embed.set_subtitles(&Subtitles::language("de"));
        embed.set_subtitles(&Subtitles::off());

        let messages: Vec<_> = platform.posted(window).into_iter().skip(1).map(|p| p.message).collect();
        assert_eq!(
            messages,
            vec![
                json!({ "event": "playVideo" }),
                json!({ "event": "pauseVideo" }),
                json!({ "event": "setVolume", "data": { "volume": 0.75 } }),
                json!({ "event": "setSubtitles", "data": { "enabled": true, "language": "de" } }),
                json!({ "event": "setSubtitles", "data": { "enabled": false } }),
            ]
        );
        // Requests are not confirmations
        assert_eq!(embed.volume(), 1.0);
    })
    .await;
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_destroy_is_idempotent_and_isolating() {
    run_local(async {
        let (platform, embed) = video(config());
        let calls = Rc::new(RefCell::new(0));
        let sink = calls.clone();
        embed.on::<PlayerStatusChanged>(move |_| *sink.borrow_mut() += 1);

        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();
        let posted_before = platform.posted(window).len();

        // Queue a page listener invocation, then tear down before it runs
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Playing" })));
        embed.destroy();
        embed.destroy();
        settle().await;

        assert_eq!(*calls.borrow(), 0);
        assert!(embed.is_destroyed());
        assert!(platform.frames().is_empty());
        assert_eq!(platform.handler_count(), 0);

        embed.play();
        embed.set_volume(0.1);
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Paused" })));
        settle().await;

        assert_eq!(platform.posted(window).len(), posted_before);
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(embed.player_status(), PlayerStatus::Playing);
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_destroy_during_handshake() {
    run_local(async {
        let (platform, embed) = video(config());
        let errors = local_errors(&embed);
        let init = embed.initialize();

        embed.destroy();

        assert_eq!(init.await, Err(EmbedError::Destroyed));
        assert!(platform.frames().is_empty());
        assert!(errors.borrow().is_empty());
        assert_eq!(embed.update_token(EmbedToken::jwt("x")).await, Err(EmbedError::Destroyed));
    })
    .await;
}

// =============================================================================
// Token refresh
// =============================================================================

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_token_confirmed() {
    run_local(async {
        let (platform, embed) = video(config().with_token(EmbedToken::jwt("old")));
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        let update = embed.update_token(EmbedToken::jwt("new").with_issuer("acme"));
        let pending = tokio::task::spawn_local(update);
        settle().await;
        platform.deliver_event(ORIGIN, window, "authChanged", Some(json!({ "isAuthenticated": true })));

        assert_eq!(pending.await.unwrap(), Ok(()));
        assert_eq!(embed.token(), Some(EmbedToken::jwt("new").with_issuer("acme")));
        assert_eq!(
            platform.posted(window).last().unwrap().message,
            json!({ "event": "authChanged", "data": { "type": "JWT", "token": "new", "issuer": "acme" } })
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_token_timeout_keeps_new_token() {
    run_local(async {
        let (platform, embed) = video(config().with_token(EmbedToken::jwt("old")).with_timeout_seconds(1.0));
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        let err = embed.update_token(EmbedToken::jwt("new")).await.unwrap_err();

        assert_eq!(err, EmbedError::Timeout { event: "authChanged".into(), after_ms: 1000 });
        assert_eq!(embed.token(), Some(EmbedToken::jwt("new")));
        assert_eq!(platform.posted_events(window), vec!["authenticated", "authChanged", "error"]);
        assert_eq!(
            platform.posted(window).last().unwrap().message,
            json!({ "event": "error", "data": { "code": "TokenRefreshFailed" } })
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_token_remote_error_keeps_new_token() {
    run_local(async {
        let (platform, embed) = video(config().with_token(EmbedToken::jwt("old")));
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();
        platform.deliver_event(ORIGIN, window, "playerStatusChanged", Some(json!({ "status": "Playing" })));
        settle().await;

        let pending = tokio::task::spawn_local(embed.update_token(EmbedToken::jwt("new")));
        settle().await;
        platform.deliver_event(ORIGIN, window, "error", Some(json!({ "code": "Unauthorized" })));

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, EmbedError::Remote { ref code, .. } if code == "Unauthorized"));
        assert_eq!(embed.token(), Some(EmbedToken::jwt("new")));
        assert_eq!(embed.player_status(), PlayerStatus::Playing);
        assert_eq!(
            platform.posted(window).last().unwrap().message,
            json!({ "event": "error", "data": { "code": "TokenRefreshFailed" } })
        );
    })
    .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_update_token_before_initialize_feeds_handshake() {
    run_local(async {
        let (platform, embed) = video(config());

        embed.update_token(EmbedToken::access_token("early")).await.unwrap();
        let init = embed.initialize();
        let window = frame_window(&platform);
        platform.deliver_event(ORIGIN, window, "load", None);
        init.await.unwrap();

        assert_eq!(
            platform.posted(window)[0].message,
            json!({ "event": "authenticated", "data": { "type": "AccessToken", "token": "early" } })
        );
    })
    .await;
}
