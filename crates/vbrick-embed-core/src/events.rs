//! Typed event catalog
//!
//! Every message exchanged with the player is an [`Envelope`]. Inbound event names are
//! modelled as marker types implementing [`EmbedEvent`], grouped into three families:
//! lifecycle events (consumed by the embed itself), video events and webcast events.
//! An embed variant only accepts listeners for the families it [`Supports`].

use crate::types::*;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire format for every cross-document message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Event family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Lifecycle,
    Video,
    Webcast,
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::Lifecycle => write!(f, "lifecycle"),
            Family::Video => write!(f, "video"),
            Family::Webcast => write!(f, "webcast"),
        }
    }
}

/// An inbound event with a typed payload
pub trait EmbedEvent: 'static {
    const NAME: &'static str;
    const FAMILY: Family;
    type Payload: DeserializeOwned + 'static;
}

/// Implemented by an embed kind for each event it can emit
pub trait Supports<E: EmbedEvent> {}

/// Outbound command names
pub mod commands {
    pub const AUTHENTICATED: &str = "authenticated";
    pub const AUTH_CHANGED: &str = "authChanged";
    pub const PLAY: &str = "playVideo";
    pub const PAUSE: &str = "pauseVideo";
    pub const SET_VOLUME: &str = "setVolume";
    pub const SET_SUBTITLES: &str = "setSubtitles";
    pub const ERROR: &str = "error";
}

macro_rules! impl_supports {
    ($name:ident, [$($kind:ty),+]) => {
        $(impl Supports<$name> for $kind {})+
    };
}

macro_rules! define_events {
    ($family:ident => $kinds:tt { $($(#[$meta:meta])* $name:ident = $wire:literal : $payload:ty;)+ }) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl EmbedEvent for $name {
                const NAME: &'static str = $wire;
                const FAMILY: Family = Family::$family;
                type Payload = $payload;
            }

            impl_supports!($name, $kinds);
        )+
    };
}

define_events!(Lifecycle => [crate::embed::Video, crate::embed::Webcast] {
    /// The player finished loading inside the frame
    Load = "load": IgnoredAny;
    AuthChanged = "authChanged": AuthChangedPayload;
    /// Remote or synthetic failure
    Error = "error": ErrorPayload;
    PlayerStatusChanged = "playerStatusChanged": StatusPayload;
    VolumeChanged = "volumeChanged": VolumePayload;
    SubtitlesChanged = "subtitlesChanged": Subtitles;
});

// Lifecycle for the video player only; webcasts report `webcastLoaded`
define_events!(Lifecycle => [crate::embed::Video] {
    VideoLoaded = "videoLoaded": VideoInfo;
});

define_events!(Video => [crate::embed::Video] {
    PlaybackSpeedChanged = "playbackSpeedChanged": PlaybackSpeedPayload;
    Seeked = "seeked": TimePayload;
    CurrentTime = "currentTime": TimePayload;
});

define_events!(Webcast => [crate::embed::Webcast] {
    /// Raw webcast metadata, including the transient `status`
    WebcastLoaded = "webcastLoaded": Value;
    WebcastStarted = "webcastStarted": IgnoredAny;
    BroadcastStarted = "broadcastStarted": IgnoredAny;
    BroadcastStopped = "broadcastStopped": IgnoredAny;
    WebcastEnded = "webcastEnded": IgnoredAny;
    LayoutChanged = "layoutChanged": LayoutPayload;
    CommentAdded = "commentAdded": CommentPayload;
    SlideChanged = "slideChanged": SlidePayload;
    PollOpened = "pollOpened": PollPayload;
    PollClosed = "pollClosed": PollPayload;
    PollPublished = "pollPublished": PollPayload;
    PollUnpublished = "pollUnpublished": PollPayload;
});

/// Every catalogued event name with its family
pub const CATALOG: &[(&str, Family)] = &[
    (Load::NAME, Family::Lifecycle),
    (AuthChanged::NAME, Family::Lifecycle),
    (Error::NAME, Family::Lifecycle),
    (VideoLoaded::NAME, Family::Lifecycle),
    (PlayerStatusChanged::NAME, Family::Lifecycle),
    (VolumeChanged::NAME, Family::Lifecycle),
    (SubtitlesChanged::NAME, Family::Lifecycle),
    (PlaybackSpeedChanged::NAME, Family::Video),
    (Seeked::NAME, Family::Video),
    (CurrentTime::NAME, Family::Video),
    (WebcastLoaded::NAME, Family::Webcast),
    (WebcastStarted::NAME, Family::Webcast),
    (BroadcastStarted::NAME, Family::Webcast),
    (BroadcastStopped::NAME, Family::Webcast),
    (WebcastEnded::NAME, Family::Webcast),
    (LayoutChanged::NAME, Family::Webcast),
    (CommentAdded::NAME, Family::Webcast),
    (SlideChanged::NAME, Family::Webcast),
    (PollOpened::NAME, Family::Webcast),
    (PollClosed::NAME, Family::Webcast),
    (PollPublished::NAME, Family::Webcast),
    (PollUnpublished::NAME, Family::Webcast),
];

/// Look up the family of a catalogued event name
pub fn family_of(name: &str) -> Option<Family> {
    CATALOG
        .iter()
        .find(|(event, _)| *event == name)
        .map(|(_, family)| *family)
}

/// Decode an event payload; a missing `data` field decodes as `null`
pub fn decode_payload<T: DeserializeOwned>(event: &str, data: Option<&Value>) -> crate::Result<T> {
    let value = data.unwrap_or(&Value::Null);
    T::deserialize(value).map_err(|e| crate::EmbedError::MalformedPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::new(commands::PLAY, None);
        assert_eq!(serde_json::to_value(&env).unwrap(), json!({ "event": "playVideo" }));

        let env: Envelope =
            serde_json::from_value(json!({ "event": "volumeChanged", "data": { "volume": 0.5 } }))
                .unwrap();
        assert_eq!(env.event, "volumeChanged");
        assert_eq!(env.data, Some(json!({ "volume": 0.5 })));
    }

    #[test]
    fn test_family_lookup() {
        assert_eq!(family_of("load"), Some(Family::Lifecycle));
        assert_eq!(family_of("seeked"), Some(Family::Video));
        assert_eq!(family_of("pollUnpublished"), Some(Family::Webcast));
        assert_eq!(family_of("playVideo"), None);
        assert_eq!(CATALOG.len(), 22);
    }

    #[test]
    fn test_decode_payload() {
        let status: StatusPayload =
            decode_payload(PlayerStatusChanged::NAME, Some(&json!({ "status": "Playing" }))).unwrap();
        assert_eq!(status.status, PlayerStatus::Playing);

        // Events without data accept anything
        let _: IgnoredAny = decode_payload(Load::NAME, None).unwrap();
        let _: IgnoredAny = decode_payload(Load::NAME, Some(&json!({ "extra": 1 }))).unwrap();

        let err = decode_payload::<VolumePayload>(VolumeChanged::NAME, Some(&json!("loud"))).unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_PAYLOAD");
    }
}
