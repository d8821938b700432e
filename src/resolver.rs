//! Recipient resolution: merge the two recipient sources for a channel.
//!
//! Source (a) is approved account holders opted into the channel; source
//! (b) is channel-only registrants marked active. The merged list is (a)
//! then (b) in each query's own order, with unusable addresses dropped.
//! Addresses appearing in both sources are deliberately NOT deduplicated;
//! that mirrors the upstream sign-up flow, where holding an account and
//! registering for a channel are independent actions.

use crate::db;
use crate::error::DispatchError;
use crate::model::{AddressKind, ChannelKind, Recipient};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

/// Syntactic usability check; not full validation, just enough to drop
/// rows that could never be delivered to.
pub fn usable_address(kind: AddressKind, address: &str) -> bool {
    let address = address.trim();
    if address.is_empty() {
        return false;
    }
    match kind {
        AddressKind::Email => EMAIL_RE.is_match(address),
        AddressKind::Phone => address.chars().any(|c| c.is_ascii_digit()),
        AddressKind::PushEndpoint => {
            address.starts_with("https://") || address.starts_with("http://")
        }
    }
}

/// Produce the merged recipient list for a channel.
///
/// Either source read failing aborts the whole dispatch before any send
/// attempt; the two reads are independent and span no transaction.
#[instrument(skip_all, fields(channel = channel.as_str()))]
pub async fn resolve(
    pool: &db::Pool,
    channel: ChannelKind,
) -> Result<Vec<Recipient>, DispatchError> {
    let users = db::approved_opted_in(pool, channel)
        .await
        .map_err(DispatchError::DataUnavailable)?;
    let registrants = db::active_registrants(pool, channel)
        .await
        .map_err(DispatchError::DataUnavailable)?;

    let kind = channel.address_kind();
    let mut merged = Vec::with_capacity(users.len() + registrants.len());
    let mut dropped = 0usize;
    for recipient in users.into_iter().chain(registrants) {
        if usable_address(kind, &recipient.address) {
            merged.push(recipient);
        } else {
            dropped += 1;
        }
    }
    debug!(kept = merged.len(), dropped, "resolved recipients");
    Ok(merged)
}
