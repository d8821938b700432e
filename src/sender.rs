//! Channel delivery primitives.
//!
//! Each sender wraps one external "send one message" HTTP endpoint. The
//! dispatcher only sees the `Sender` trait, so tests substitute a
//! recording implementation the same way the transports are swapped per
//! channel at runtime.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::json;
use std::fmt;
use tracing::warn;

use crate::config::Config;
use crate::error::DispatchError;
use crate::model::{ChannelKind, OutboundMessage};

/// A channel-specific delivery primitive: one call sends one batch as a
/// single logical message.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send_batch(&self, msg: &OutboundMessage, batch: &[String]) -> Result<()>;
}

fn build_http_client() -> Client {
    Client::builder()
        .user_agent("prayer-dispatch/0.1")
        .no_proxy()
        .build()
        .expect("reqwest client")
}

async fn check_response(res: Response) -> Result<()> {
    if res.status() == StatusCode::TOO_MANY_REQUESTS {
        let body = res.text().await.unwrap_or_default();
        warn!("rate limited by transport: {}", body);
        return Err(anyhow!("received 429 from transport: {}", body));
    }
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        warn!("transport error - status: {}, body: {}", status, body);
        return Err(anyhow!("transport error {}: {}", status, body));
    }
    Ok(())
}

/// Sends a batch as one email: the shared primary address is the visible
/// "To" and the batch rides in BCC so members stay hidden from each other.
pub struct HttpEmailSender {
    http: Client,
    endpoint: Url,
    api_key: String,
    primary_recipient: String,
}

impl fmt::Debug for HttpEmailSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmailSender")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpEmailSender {
    pub fn new(endpoint: Url, api_key: String, primary_recipient: String) -> Self {
        Self {
            http: build_http_client(),
            endpoint,
            api_key,
            primary_recipient,
        }
    }
}

#[async_trait]
impl Sender for HttpEmailSender {
    async fn send_batch(&self, msg: &OutboundMessage, batch: &[String]) -> Result<()> {
        let body = json!({
            "to": self.primary_recipient,
            "bcc": batch.join(","),
            "subject": msg.subject,
            "html": msg.html,
        });
        let res = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach mail endpoint")?;
        check_response(res).await
    }
}

/// Sends a batch as one gateway call carrying the recipient list and a
/// plain-text body. Used for both SMS and WhatsApp, which share a wire
/// shape and differ only in endpoint.
pub struct HttpGatewaySender {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for HttpGatewaySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGatewaySender")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpGatewaySender {
    pub fn new(endpoint: Url, api_key: String) -> Self {
        Self {
            http: build_http_client(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl Sender for HttpGatewaySender {
    async fn send_batch(&self, msg: &OutboundMessage, batch: &[String]) -> Result<()> {
        let body = json!({
            "to": batch,
            "body": msg.text,
        });
        let res = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach message gateway")?;
        check_response(res).await
    }
}

/// Sends a batch to the push relay as one call with all subscription
/// endpoints attached.
pub struct HttpPushSender {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for HttpPushSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPushSender")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpPushSender {
    pub fn new(endpoint: Url, api_key: String) -> Self {
        Self {
            http: build_http_client(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl Sender for HttpPushSender {
    async fn send_batch(&self, msg: &OutboundMessage, batch: &[String]) -> Result<()> {
        let body = json!({
            "endpoints": batch,
            "title": msg.subject,
            "body": msg.text,
        });
        let res = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to reach push relay")?;
        check_response(res).await
    }
}

fn parse_endpoint(raw: &str, which: &'static str) -> Result<Url, DispatchError> {
    Url::parse(raw).map_err(|_| DispatchError::Config(which))
}

/// Build the sender for a channel from config. Email channels always have
/// a transport; the others fail with a configuration error when their
/// gateway endpoint is unset.
pub fn for_channel(cfg: &Config, channel: ChannelKind) -> Result<Box<dyn Sender>, DispatchError> {
    match channel {
        ChannelKind::Update | ChannelKind::Urgent => {
            let endpoint = parse_endpoint(&cfg.mailer.endpoint, "mailer.endpoint is not a URL")?;
            Ok(Box::new(HttpEmailSender::new(
                endpoint,
                cfg.mailer.api_key.clone(),
                cfg.mailer.primary_recipient.clone(),
            )))
        }
        ChannelKind::Sms => {
            let gateway = cfg
                .gateways
                .sms
                .as_ref()
                .ok_or(DispatchError::Config("gateways.sms is not configured"))?;
            let endpoint = parse_endpoint(&gateway.endpoint, "gateways.sms.endpoint is not a URL")?;
            Ok(Box::new(HttpGatewaySender::new(
                endpoint,
                gateway.api_key.clone(),
            )))
        }
        ChannelKind::WhatsApp => {
            let gateway = cfg
                .gateways
                .whatsapp
                .as_ref()
                .ok_or(DispatchError::Config("gateways.whatsapp is not configured"))?;
            let endpoint =
                parse_endpoint(&gateway.endpoint, "gateways.whatsapp.endpoint is not a URL")?;
            Ok(Box::new(HttpGatewaySender::new(
                endpoint,
                gateway.api_key.clone(),
            )))
        }
        ChannelKind::Push => {
            let gateway = cfg
                .gateways
                .push
                .as_ref()
                .ok_or(DispatchError::Config("gateways.push is not configured"))?;
            let endpoint =
                parse_endpoint(&gateway.endpoint, "gateways.push.endpoint is not a URL")?;
            Ok(Box::new(HttpPushSender::new(
                endpoint,
                gateway.api_key.clone(),
            )))
        }
    }
}
