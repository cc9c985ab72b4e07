//! Microsoft Graph mail adapter.
//!
//! Polls unread mail for one mailbox, replies in-thread, and marks messages
//! read. The client-credentials token is cached until shortly before expiry.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use scraper::Html;
use serde::Deserialize;
use tracing::debug;

use crate::channel::{AdapterError, Channel, ChannelAdapter, RawInbound, ReplyRoute};

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
const LOGIN_BASE: &str = "https://login.microsoftonline.com";
const FETCH_PAGE_SIZE: u32 = 25;

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct GraphMailAdapter {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    user_email: String,
    auth_base: String,
    api_base: String,
    client: reqwest::blocking::Client,
    token: Mutex<Option<CachedToken>>,
}

impl GraphMailAdapter {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_email: user_email.into(),
            auth_base: LOGIN_BASE.to_string(),
            api_base: GRAPH_API.to_string(),
            client: reqwest::blocking::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Point the adapter at different endpoints (tests).
    pub fn with_endpoints(mut self, auth_base: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.auth_base = auth_base.into();
        self.api_base = api_base.into();
        self
    }

    fn access_token(&self) -> Result<String, AdapterError> {
        {
            let cached = self.token.lock().unwrap();
            if let Some(token) = cached.as_ref() {
                if token.expires_at > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.auth_base, self.tenant_id
        );
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", "https://graph.microsoft.com/.default"),
                ("grant_type", "client_credentials"),
            ])
            .send()?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::Auth(format!("token request failed: {body}")));
        }
        let parsed: TokenResponse = response.json()?;

        // Refresh a minute early so an in-flight call never carries a token
        // that expires mid-request.
        let expires_at = Utc::now() + Duration::seconds(parsed.expires_in.saturating_sub(60));
        let mut cached = self.token.lock().unwrap();
        *cached = Some(CachedToken {
            value: parsed.access_token.clone(),
            expires_at,
        });
        debug!("refreshed graph access token");
        Ok(parsed.access_token)
    }

    fn mailbox_url(&self, suffix: &str) -> String {
        format!("{}/users/{}/messages{}", self.api_base, self.user_email, suffix)
    }
}

impl ChannelAdapter for GraphMailAdapter {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn fetch_unread(&self) -> Result<Vec<RawInbound>, AdapterError> {
        let token = self.access_token()?;
        let url = self.mailbox_url("");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("$filter", "isRead eq false"),
                ("$top", &FETCH_PAGE_SIZE.to_string()),
            ])
            .bearer_auth(&token)
            .send()?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::Api(format!("mail listing failed: {body}")));
        }
        let listing: MailListing = response.json()?;

        let mut unread = Vec::new();
        for mail in listing.value {
            let sender = mail
                .from
                .as_ref()
                .and_then(|from| from.email_address.as_ref())
                .map(|address| address.address.clone())
                .unwrap_or_default();
            if sender.is_empty() {
                continue;
            }
            let sender_name = mail
                .from
                .as_ref()
                .and_then(|from| from.email_address.as_ref())
                .and_then(|address| address.name.clone());
            let body = mail
                .body
                .as_ref()
                .map(|body| {
                    if body.content_type.eq_ignore_ascii_case("html") {
                        html_to_text(&body.content)
                    } else {
                        body.content.clone()
                    }
                })
                .unwrap_or_default();

            unread.push(RawInbound {
                external_id: mail.id.clone(),
                sender,
                sender_name,
                subject: mail.subject,
                body,
                channel_id: None,
                thread_ts: None,
                msg_id: Some(mail.id),
            });
        }
        Ok(unread)
    }

    fn send_reply(&self, route: &ReplyRoute, text: &str) -> Result<(), AdapterError> {
        let msg_id = route
            .msg_id
            .as_deref()
            .ok_or(AdapterError::MissingRoute("msg_id"))?;
        let token = self.access_token()?;
        let url = self.mailbox_url(&format!("/{msg_id}/reply"));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "comment": text }))
            .send()?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::Api(format!(
                "reply to {msg_id} failed: {body}"
            )));
        }
        Ok(())
    }

    fn mark_consumed(&self, external_id: &str) -> Result<(), AdapterError> {
        let token = self.access_token()?;
        let url = self.mailbox_url(&format!("/{external_id}"));
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "isRead": true }))
            .send()?;

        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::Api(format!(
                "mark read for {external_id} failed: {body}"
            )));
        }
        Ok(())
    }
}

/// Reduce an HTML mail body to line-oriented plain text.
pub(crate) fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    for chunk in document.root_element().text() {
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }
    lines.join("\n")
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct MailListing {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    body: Option<GraphItemBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    #[serde(default)]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItemBody {
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    content: String,
}
