//! Embed configuration
//!
//! One flat record for both variants. Options a variant does not consume are ignored,
//! e.g. `hideChat` on a video embed.

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Default handshake timeout
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;

/// Default iframe width and height
pub const DEFAULT_DIMENSION: &str = "100%";

/// Authentication token type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TokenType {
    Jwt,
    AccessToken,
    /// Anything else; rejected before any round-trip
    Other(String),
}

impl From<String> for TokenType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "JWT" => TokenType::Jwt,
            "AccessToken" => TokenType::AccessToken,
            _ => TokenType::Other(s),
        }
    }
}

impl From<TokenType> for String {
    fn from(t: TokenType) -> Self {
        t.to_string()
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Jwt => f.write_str("JWT"),
            TokenType::AccessToken => f.write_str("AccessToken"),
            TokenType::Other(s) => f.write_str(s),
        }
    }
}

/// Authentication payload supplied by the host page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedToken {
    #[serde(rename = "type")]
    pub kind: TokenType,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

impl EmbedToken {
    pub fn jwt(value: impl Into<String>) -> Self {
        Self {
            kind: TokenType::Jwt,
            value: value.into(),
            issuer: None,
        }
    }

    pub fn access_token(value: impl Into<String>) -> Self {
        Self {
            kind: TokenType::AccessToken,
            value: value.into(),
            issuer: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }
}

/// Token as sent with `authenticated` / `authChanged`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedToken {
    #[serde(rename = "type")]
    pub kind: TokenType,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

/// Turn the configured token into the payload the player expects.
///
/// `None` means the embed proceeds unauthenticated.
pub async fn resolve_token(token: Option<EmbedToken>) -> Result<Option<ResolvedToken>> {
    let Some(token) = token else {
        return Ok(None);
    };

    match token.kind {
        TokenType::Jwt | TokenType::AccessToken => Ok(Some(ResolvedToken {
            kind: token.kind,
            token: token.value,
            issuer: token.issuer,
        })),
        TokenType::Other(other) => Err(EmbedError::UnsupportedTokenType(other)),
    }
}

/// Configuration for an embed instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedConfig {
    /// Origin the player is served from
    pub base_url: String,
    /// Authentication payload; replaced wholesale by `update_token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<EmbedToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Use the popup authentication flow
    #[serde(default)]
    pub popup_auth: bool,
    /// Handshake timeout; `0` disables the timeout
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Enable diagnostic logging
    #[serde(default)]
    pub log: bool,

    // Player appearance and behavior, consumed by the URL builder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accent_color: Option<String>,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub force_closed_captions: bool,
    #[serde(default)]
    pub loop_video: bool,
    /// Start position in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<f64>,
    #[serde(default)]
    pub hide_chapters: bool,
    #[serde(default)]
    pub hide_fullscreen: bool,
    #[serde(default)]
    pub hide_overlay_controls: bool,
    #[serde(default)]
    pub hide_play_controls: bool,
    #[serde(default)]
    pub hide_settings: bool,

    // Webcast only
    #[serde(default)]
    pub hide_chat: bool,
    #[serde(default)]
    pub hide_qa: bool,
    #[serde(default)]
    pub hide_polls: bool,
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl EmbedConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            width: None,
            height: None,
            class_name: None,
            popup_auth: false,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            log: false,
            accent_color: None,
            autoplay: false,
            force_closed_captions: false,
            loop_video: false,
            start_at: None,
            hide_chapters: false,
            hide_fullscreen: false,
            hide_overlay_controls: false,
            hide_play_controls: false,
            hide_settings: false,
            hide_chat: false,
            hide_qa: false,
            hide_polls: false,
        }
    }

    pub fn with_token(mut self, token: EmbedToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Check the options that would otherwise fail late
    pub fn validate(&self) -> Result<()> {
        self.parsed_base_url()?;

        if Duration::try_from_secs_f64(self.timeout_seconds).is_err() {
            return Err(EmbedError::InvalidConfig(format!(
                "timeoutSeconds must be a non-negative number of seconds a timer can hold, got {}",
                self.timeout_seconds
            )));
        }
        if let Some(start) = self.start_at {
            if !start.is_finite() || start < 0.0 {
                return Err(EmbedError::InvalidConfig(format!(
                    "startAt must be a non-negative number, got {start}"
                )));
            }
        }
        Ok(())
    }

    /// `baseUrl` parsed and checked for an http(s) scheme and a host
    pub fn parsed_base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| EmbedError::InvalidConfig(format!("baseUrl '{}': {e}", self.base_url)))?;

        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(EmbedError::InvalidConfig(format!(
                "baseUrl must be an absolute http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(url)
    }

    /// Origin that inbound messages must come from and outbound messages target
    pub fn origin(&self) -> Result<String> {
        Ok(self.parsed_base_url()?.origin().ascii_serialization())
    }

    /// Handshake timeout, `None` when disabled or out of range
    pub fn timeout(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.timeout_seconds)
            .ok()
            .filter(|timeout| !timeout.is_zero())
    }

    pub fn width(&self) -> &str {
        self.width.as_deref().unwrap_or(DEFAULT_DIMENSION)
    }

    pub fn height(&self) -> &str {
        self.height.as_deref().unwrap_or(DEFAULT_DIMENSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults_from_json() {
        let config: EmbedConfig =
            serde_json::from_value(json!({ "baseUrl": "https://acme.rev.vbrick.com" })).unwrap();

        assert_eq!(config.timeout_seconds, 30.0);
        assert_eq!(config.width(), "100%");
        assert_eq!(config.height(), "100%");
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(config.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_camel_case_keys() {
        let config: EmbedConfig = serde_json::from_value(json!({
            "baseUrl": "https://acme.rev.vbrick.com",
            "className": "player",
            "timeoutSeconds": 0,
            "hideQa": true,
            "token": { "type": "JWT", "value": "abc", "issuer": "acme" }
        }))
        .unwrap();

        assert_eq!(config.class_name.as_deref(), Some("player"));
        assert_eq!(config.timeout(), None);
        assert!(config.hide_qa);
        assert_eq!(config.token, Some(EmbedToken::jwt("abc").with_issuer("acme")));
    }

    #[test]
    fn test_origin_strips_path() {
        let config = EmbedConfig::new("https://acme.rev.vbrick.com:8443/some/path");
        assert_eq!(config.origin().unwrap(), "https://acme.rev.vbrick.com:8443");
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        assert!(EmbedConfig::new("not a url").validate().is_err());
        assert!(EmbedConfig::new("ftp://files.example.com").validate().is_err());
        assert!(EmbedConfig::new("https://ok.example.com")
            .with_timeout_seconds(-1.0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_out_of_range_timeout() {
        let config = EmbedConfig::new("https://ok.example.com").with_timeout_seconds(1e20);
        assert_eq!(config.validate().unwrap_err().error_code(), "INVALID_CONFIG");
        assert_eq!(config.timeout(), None);

        let config = config.with_timeout_seconds(f64::NAN);
        assert!(config.validate().is_err());
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_timeout_duration() {
        let config = EmbedConfig::new("https://ok.example.com");
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.clone().with_timeout_seconds(0.5).timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.with_timeout_seconds(0.0).timeout(), None);
    }

    #[test]
    fn test_unknown_token_type_round_trips() {
        let token: EmbedToken =
            serde_json::from_value(json!({ "type": "Cookie", "value": "x" })).unwrap();
        assert_eq!(token.kind, TokenType::Other("Cookie".into()));
        assert_eq!(serde_json::to_value(&token).unwrap()["type"], "Cookie");
    }

    #[tokio::test]
    async fn test_resolve_token() {
        assert_eq!(resolve_token(None).await.unwrap(), None);

        let resolved = resolve_token(Some(EmbedToken::access_token("t-1"))).await.unwrap().unwrap();
        assert_eq!(resolved.kind, TokenType::AccessToken);
        assert_eq!(resolved.token, "t-1");

        let err = resolve_token(Some(EmbedToken {
            kind: TokenType::Other("Cookie".into()),
            value: "x".into(),
            issuer: None,
        }))
        .await
        .unwrap_err();
        assert_eq!(err, EmbedError::UnsupportedTokenType("Cookie".into()));
    }
}
