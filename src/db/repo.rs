use super::model::RunRecord;
use crate::model::{ChannelKind, Recipient};
use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs and other schemes alone.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let (path_part, query_part) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match path_part.strip_prefix("~/") {
        Some(tail) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), tail),
            Err(_) => path_part.to_string(),
        },
        None => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn optin_column(channel: ChannelKind) -> &'static str {
    match channel {
        ChannelKind::Update => "notify_updates",
        ChannelKind::Urgent => "notify_urgent",
        ChannelKind::Push => "notify_push",
        ChannelKind::Sms => "notify_sms",
        ChannelKind::WhatsApp => "notify_whatsapp",
    }
}

fn address_column(channel: ChannelKind) -> &'static str {
    match channel.address_kind() {
        crate::model::AddressKind::Email => "email",
        crate::model::AddressKind::Phone => "phone",
        crate::model::AddressKind::PushEndpoint => "push_endpoint",
    }
}

/// Source (a): approved account holders who opted into the channel.
/// Rows with a NULL address are excluded here; syntactic filtering of
/// the remainder happens in the resolver.
#[instrument(skip_all, fields(channel = channel.as_str()))]
pub async fn approved_opted_in(pool: &Pool, channel: ChannelKind) -> Result<Vec<Recipient>> {
    let sql = format!(
        "SELECT id, display_name, {addr} AS address FROM users \
         WHERE approved = 1 AND {optin} = 1 AND {addr} IS NOT NULL \
         ORDER BY id",
        addr = address_column(channel),
        optin = optin_column(channel),
    );
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .context("querying approved users")?;
    Ok(rows
        .into_iter()
        .map(|r| Recipient {
            id: r.get("id"),
            display_name: r.get("display_name"),
            address: r.get("address"),
        })
        .collect())
}

/// Source (b): channel-only registrants marked active.
#[instrument(skip_all, fields(channel = channel.as_str()))]
pub async fn active_registrants(pool: &Pool, channel: ChannelKind) -> Result<Vec<Recipient>> {
    let rows = sqlx::query(
        "SELECT id, display_name, address FROM channel_registrations \
         WHERE channel = ? AND active = 1 ORDER BY id",
    )
    .bind(channel.as_str())
    .fetch_all(pool)
    .await
    .context("querying channel registrations")?;
    Ok(rows
        .into_iter()
        .map(|r| Recipient {
            id: r.get("id"),
            display_name: r.get("display_name"),
            address: r.get("address"),
        })
        .collect())
}

/// Persist a completed run's summary. Callers treat failures here as
/// non-fatal; the run already happened.
#[instrument(skip_all, fields(run_id = %record.run_id))]
pub async fn record_run(pool: &Pool, record: &RunRecord) -> Result<()> {
    sqlx::query(
        "INSERT INTO dispatch_runs \
         (run_id, channel, title, total_recipients, successful_deliveries, \
          batch_count, error_count, cancelled, started_at, finished_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.run_id.to_string())
    .bind(record.channel.as_str())
    .bind(&record.title)
    .bind(record.total_recipients as i64)
    .bind(record.successful_deliveries as i64)
    .bind(record.batch_count as i64)
    .bind(record.error_count as i64)
    .bind(record.cancelled)
    .bind(record.started_at)
    .bind(record.finished_at)
    .execute(pool)
    .await
    .context("inserting dispatch_runs row")?;
    Ok(())
}
