//! Per-provider payload shaping and transport
//!
//! Every provider sends the same pre-rendered title/body; only the wire
//! shape and the deadline differ. Title and body are never re-interpreted
//! here (no markdown re-escaping, no truncation beyond what a provider's API
//! itself enforces) per the template contract.

use std::str::FromStr;
use std::time::Duration;

use serde_json::json;

use crate::events::Severity;

#[derive(Debug, Clone)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("missing required config field: {0}")]
    MissingConfig(&'static str),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned {0}")]
    Provider(reqwest::StatusCode),
}

pub type NotificationResult<T> = Result<T, NotificationError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Discord,
    Email,
    Telegram,
    Signal,
    Slack,
    Ntfy,
    Pushover,
    Gotify,
    Matrix,
    Webhook,
    Apprise,
}

impl FromStr for ProviderKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "discord" => ProviderKind::Discord,
            "email" => ProviderKind::Email,
            "telegram" => ProviderKind::Telegram,
            "signal" => ProviderKind::Signal,
            "slack" => ProviderKind::Slack,
            "ntfy" => ProviderKind::Ntfy,
            "pushover" => ProviderKind::Pushover,
            "gotify" => ProviderKind::Gotify,
            "matrix" => ProviderKind::Matrix,
            "webhook" => ProviderKind::Webhook,
            "apprise" => ProviderKind::Apprise,
            _ => return Err(()),
        })
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Discord => "discord",
            ProviderKind::Email => "email",
            ProviderKind::Telegram => "telegram",
            ProviderKind::Signal => "signal",
            ProviderKind::Slack => "slack",
            ProviderKind::Ntfy => "ntfy",
            ProviderKind::Pushover => "pushover",
            ProviderKind::Gotify => "gotify",
            ProviderKind::Matrix => "matrix",
            ProviderKind::Webhook => "webhook",
            ProviderKind::Apprise => "apprise",
        };
        write!(f, "{s}")
    }
}

fn config_str<'a>(config: &'a serde_json::Value, field: &'static str) -> NotificationResult<&'a str> {
    config.get(field).and_then(|v| v.as_str()).ok_or(NotificationError::MissingConfig(field))
}

impl ProviderKind {
    /// Per-send deadline, per the concurrency model: email/matrix federation
    /// can be slow, push-style transports are fast.
    pub fn send_deadline(&self) -> Duration {
        match self {
            ProviderKind::Email | ProviderKind::Matrix | ProviderKind::Apprise => Duration::from_secs(30),
            _ => Duration::from_secs(10),
        }
    }

    pub async fn send(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        match self {
            ProviderKind::Discord => self.send_discord(http, config, payload).await,
            ProviderKind::Slack => self.send_slack(http, config, payload).await,
            ProviderKind::Telegram => self.send_telegram(http, config, payload).await,
            ProviderKind::Ntfy => self.send_ntfy(http, config, payload).await,
            ProviderKind::Pushover => self.send_pushover(http, config, payload).await,
            ProviderKind::Gotify => self.send_gotify(http, config, payload).await,
            ProviderKind::Matrix => self.send_matrix(http, config, payload).await,
            ProviderKind::Webhook | ProviderKind::Apprise | ProviderKind::Signal | ProviderKind::Email => {
                self.send_generic_webhook(http, config, payload).await
            }
        }
    }

    async fn post_json(&self, http: &reqwest::Client, url: &str, body: serde_json::Value) -> NotificationResult<()> {
        let response = http.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(NotificationError::Provider(response.status()));
        }
        Ok(())
    }

    async fn send_discord(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let url = config_str(config, "webhook_url")?;
        self.post_json(http, url, json!({ "content": format!("**{}**\n{}", payload.title, payload.body) })).await
    }

    async fn send_slack(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let url = config_str(config, "webhook_url")?;
        self.post_json(http, url, json!({ "text": format!("*{}*\n{}", payload.title, payload.body) })).await
    }

    async fn send_telegram(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let bot_token = config_str(config, "bot_token")?;
        let chat_id = config_str(config, "chat_id")?;
        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        self.post_json(http, &url, json!({ "chat_id": chat_id, "text": format!("{}\n{}", payload.title, payload.body) })).await
    }

    async fn send_ntfy(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let topic_url = config_str(config, "topic_url")?;
        let response = http
            .post(topic_url)
            .header("Title", payload.title.clone())
            .header("Priority", severity_priority(payload.severity))
            .body(payload.body.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotificationError::Provider(response.status()));
        }
        Ok(())
    }

    async fn send_pushover(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let token = config_str(config, "app_token")?;
        let user = config_str(config, "user_key")?;
        let response = http
            .post("https://api.pushover.net/1/messages.json")
            .form(&[("token", token), ("user", user), ("title", &payload.title), ("message", &payload.body)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotificationError::Provider(response.status()));
        }
        Ok(())
    }

    async fn send_gotify(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let base_url = config_str(config, "base_url")?;
        let token = config_str(config, "app_token")?;
        let url = format!("{}/message?token={token}", base_url.trim_end_matches('/'));
        self.post_json(http, &url, json!({ "title": payload.title, "message": payload.body, "priority": severity_priority(payload.severity) })).await
    }

    async fn send_matrix(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let homeserver = config_str(config, "homeserver_url")?;
        let room_id = config_str(config, "room_id")?;
        let access_token = config_str(config, "access_token")?;
        let url = format!(
            "{}/_matrix/client/v3/rooms/{room_id}/send/m.room.message?access_token={access_token}",
            homeserver.trim_end_matches('/')
        );
        self.post_json(http, &url, json!({ "msgtype": "m.text", "body": format!("{}\n{}", payload.title, payload.body) })).await
    }

    /// Covers generic webhook, Apprise, Signal (via signal-cli's REST
    /// gateway) and email (via a transactional-email HTTP API) — each takes
    /// a webhook URL and tolerates a plain `{title, body, severity}` object.
    async fn send_generic_webhook(&self, http: &reqwest::Client, config: &serde_json::Value, payload: &NotificationPayload) -> NotificationResult<()> {
        let url = config_str(config, "webhook_url")?;
        self.post_json(http, url, json!({ "title": payload.title, "body": payload.body, "severity": payload.severity.to_string() })).await
    }
}

fn severity_priority(severity: Severity) -> i32 {
    match severity {
        Severity::Error => 2,
        Severity::Warning => 1,
        Severity::Success => 0,
        Severity::Info => 0,
    }
}

/// Deterministic sample payload for a channel's "send test notification"
/// action, one per notifiable event kind.
pub fn test_payload(kind: &str) -> NotificationPayload {
    match kind {
        "imageUpdate" => NotificationPayload {
            title: "Container Image Update Available".to_string(),
            body: "test-container has an update available for nginx:latest".to_string(),
            severity: Severity::Info,
        },
        "containerUpdate" => NotificationPayload {
            title: "Container Error".to_string(),
            body: "test-container: update failed, rolled back: test error".to_string(),
            severity: Severity::Error,
        },
        "vulnerabilityFound" => NotificationPayload {
            title: "Vulnerabilities Found".to_string(),
            body: "3 vulnerabilities found in nginx:latest".to_string(),
            severity: Severity::Warning,
        },
        "pruneReport" => NotificationPayload {
            title: "Prune Completed".to_string(),
            body: "reclaimed 104857600 bytes".to_string(),
            severity: Severity::Success,
        },
        _ => NotificationPayload { title: "Arcane Test Notification".to_string(), body: "this is a test notification".to_string(), severity: Severity::Info },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trips_through_str() {
        for kind in ["discord", "slack", "telegram", "ntfy", "pushover", "gotify", "matrix", "webhook", "apprise", "signal", "email"] {
            let parsed = ProviderKind::from_str(kind).unwrap();
            assert_eq!(parsed.to_string(), kind);
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        assert!(ProviderKind::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn test_deadlines_match_transport_tier() {
        assert_eq!(ProviderKind::Discord.send_deadline(), Duration::from_secs(10));
        assert_eq!(ProviderKind::Email.send_deadline(), Duration::from_secs(30));
    }
}
