//! Embed URL construction
//!
//! Maps the configuration onto the player's query string. Only options that are set are
//! emitted, in a fixed order, so the same configuration always yields the same URL.

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use url::form_urlencoded::Serializer;
use url::{Url, UrlQuery};

/// Which player the frame hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Webcast,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentKind::Video => write!(f, "video"),
            ContentKind::Webcast => write!(f, "webcast"),
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "video" => Ok(ContentKind::Video),
            "webcast" => Ok(ContentKind::Webcast),
            other => Err(EmbedError::InvalidConfig(format!("unknown content kind '{other}'"))),
        }
    }
}

/// Build the iframe `src` for `content_id`
pub fn build_embed_url(kind: ContentKind, content_id: &str, config: &EmbedConfig) -> Result<Url> {
    if content_id.trim().is_empty() {
        return Err(EmbedError::EmptyContentId);
    }

    let mut url = config.parsed_base_url()?;
    url.set_query(None);
    url.set_fragment(None);

    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| EmbedError::InvalidConfig(format!("baseUrl '{}' cannot be a base", config.base_url)))?;
        segments.pop_if_empty().push("embed");
        if kind == ContentKind::Webcast {
            segments.push("webcast").push(content_id);
        }
    }

    let mut query = url.query_pairs_mut();
    if kind == ContentKind::Video {
        query.append_pair("id", content_id);
    }
    if config.token.is_some() {
        query.append_pair("tk", "true");
    }

    flag(&mut query, "popupAuth", config.popup_auth);
    if let Some(accent) = config.accent_color.as_deref().map(|c| c.trim_start_matches('#')) {
        if !accent.is_empty() {
            query.append_pair("accent", accent);
        }
    }
    flag(&mut query, "autoplay", config.autoplay);
    flag(&mut query, "forceClosedCaptions", config.force_closed_captions);
    flag(&mut query, "loopVideo", config.loop_video);
    if let Some(start) = config.start_at {
        query.append_pair("startAt", &start.to_string());
    }

    match kind {
        ContentKind::Video => {
            flag(&mut query, "noChapters", config.hide_chapters);
            flag(&mut query, "noFullscreen", config.hide_fullscreen);
            flag(&mut query, "noCenterButtons", config.hide_overlay_controls);
            flag(&mut query, "noPlayBar", config.hide_play_controls);
            flag(&mut query, "noSettings", config.hide_settings);
        }
        ContentKind::Webcast => {
            flag(&mut query, "hideChat", config.hide_chat);
            flag(&mut query, "hideQa", config.hide_qa);
            flag(&mut query, "hidePolls", config.hide_polls);
        }
    }
    drop(query);

    // An empty serializer still leaves a bare "?"
    if url.query() == Some("") {
        url.set_query(None);
    }

    Ok(url)
}

fn flag(query: &mut Serializer<'_, UrlQuery<'_>>, name: &str, set: bool) {
    if set {
        query.append_pair(name, "true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedToken;

    #[test]
    fn test_video_url_minimal() {
        let config = EmbedConfig::new("https://acme.rev.vbrick.com");
        let url = build_embed_url(ContentKind::Video, "abc-123", &config).unwrap();
        assert_eq!(url.as_str(), "https://acme.rev.vbrick.com/embed?id=abc-123");
    }

    #[test]
    fn test_video_url_flags_in_order() {
        let mut config = EmbedConfig::new("https://acme.rev.vbrick.com/").with_token(EmbedToken::jwt("t"));
        config.accent_color = Some("#ff0000".into());
        config.autoplay = true;
        config.hide_settings = true;
        config.hide_chat = true; // webcast only

        let url = build_embed_url(ContentKind::Video, "v1", &config).unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.rev.vbrick.com/embed?id=v1&tk=true&accent=ff0000&autoplay=true&noSettings=true"
        );
    }

    #[test]
    fn test_webcast_url_path() {
        let mut config = EmbedConfig::new("https://acme.rev.vbrick.com/tenant?x=1");
        config.hide_qa = true;
        config.popup_auth = true;

        let url = build_embed_url(ContentKind::Webcast, "w 1", &config).unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.rev.vbrick.com/tenant/embed/webcast/w%201?popupAuth=true&hideQa=true"
        );
    }

    #[test]
    fn test_webcast_url_without_query() {
        let config = EmbedConfig::new("https://acme.rev.vbrick.com");
        let url = build_embed_url(ContentKind::Webcast, "w1", &config).unwrap();
        assert_eq!(url.as_str(), "https://acme.rev.vbrick.com/embed/webcast/w1");
    }

    #[test]
    fn test_empty_content_id() {
        let config = EmbedConfig::new("https://acme.rev.vbrick.com");
        assert_eq!(
            build_embed_url(ContentKind::Video, "  ", &config).unwrap_err(),
            EmbedError::EmptyContentId
        );
    }

    #[test]
    fn test_content_kind_parse() {
        assert_eq!("Webcast".parse::<ContentKind>().unwrap(), ContentKind::Webcast);
        assert!("podcast".parse::<ContentKind>().is_err());
    }
}
