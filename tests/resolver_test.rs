use anyhow::Result;
use async_trait::async_trait;
use prayer_dispatch::dispatch::{self, PacingOptions};
use prayer_dispatch::error::DispatchError;
use prayer_dispatch::model::{ChannelKind, DispatchRequest, OutboundMessage};
use prayer_dispatch::resolver;
use prayer_dispatch::sender::Sender;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

async fn insert_user(
    pool: &sqlx::SqlitePool,
    name: &str,
    email: Option<&str>,
    approved: bool,
    notify_updates: bool,
) {
    sqlx::query(
        "INSERT INTO users (display_name, email, approved, notify_updates) VALUES (?, ?, ?, ?)",
    )
    .bind(name)
    .bind(email)
    .bind(approved)
    .bind(notify_updates)
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_registrant(
    pool: &sqlx::SqlitePool,
    channel: &str,
    name: &str,
    address: &str,
    active: bool,
) {
    sqlx::query(
        "INSERT INTO channel_registrations (channel, display_name, address, active) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(channel)
    .bind(name)
    .bind(address)
    .bind(active)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn approved_users_come_before_registrants() {
    let pool = setup_pool().await;
    insert_user(&pool, "Anna", Some("anna@example.org"), true, true).await;
    insert_user(&pool, "Ben", Some("ben@example.org"), true, true).await;
    insert_registrant(&pool, "update", "Carol", "carol@example.org", true).await;

    let recipients = resolver::resolve(&pool, ChannelKind::Update).await.unwrap();
    let addresses: Vec<&str> = recipients.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(
        addresses,
        vec!["anna@example.org", "ben@example.org", "carol@example.org"]
    );
}

#[tokio::test]
async fn ineligible_and_unusable_rows_are_dropped() {
    let pool = setup_pool().await;
    insert_user(&pool, "Approved", Some("ok@example.org"), true, true).await;
    insert_user(&pool, "Pending", Some("pending@example.org"), false, true).await;
    insert_user(&pool, "OptedOut", Some("out@example.org"), true, false).await;
    insert_user(&pool, "NoEmail", None, true, true).await;
    insert_user(&pool, "BadEmail", Some("not-an-email"), true, true).await;
    insert_registrant(&pool, "update", "Inactive", "gone@example.org", false).await;
    insert_registrant(&pool, "urgent", "OtherChannel", "other@example.org", true).await;

    let recipients = resolver::resolve(&pool, ChannelKind::Update).await.unwrap();
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].address, "ok@example.org");
}

#[tokio::test]
async fn duplicate_address_across_sources_receives_twice() {
    // No dedup across the two sources: a person who both holds an account
    // and registered for the channel gets two copies.
    let pool = setup_pool().await;
    insert_user(&pool, "Anna", Some("anna@example.org"), true, true).await;
    insert_registrant(&pool, "update", "Anna again", "anna@example.org", true).await;

    let recipients = resolver::resolve(&pool, ChannelKind::Update).await.unwrap();
    assert_eq!(recipients.len(), 2);
    assert_eq!(recipients[0].address, recipients[1].address);
}

#[tokio::test]
async fn sms_channel_reads_phone_column_and_sms_registrations() {
    let pool = setup_pool().await;
    sqlx::query(
        "INSERT INTO users (display_name, phone, approved, notify_sms) \
         VALUES ('Anna', '+44 7700 900123', 1, 1)",
    )
    .execute(&pool)
    .await
    .unwrap();
    insert_registrant(&pool, "sms", "Ben", "+44 7700 900456", true).await;
    insert_registrant(&pool, "update", "NotSms", "mail@example.org", true).await;

    let recipients = resolver::resolve(&pool, ChannelKind::Sms).await.unwrap();
    let addresses: Vec<&str> = recipients.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(addresses, vec!["+44 7700 900123", "+44 7700 900456"]);
}

struct CountingSender {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Sender for CountingSender {
    async fn send_batch(&self, _msg: &OutboundMessage, _batch: &[String]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn source_failure_aborts_before_any_send() {
    let pool = setup_pool().await;
    insert_user(&pool, "Anna", Some("anna@example.org"), true, true).await;
    // Break the second source only; the first query still succeeds.
    sqlx::query("DROP TABLE channel_registrations")
        .execute(&pool)
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let sender = CountingSender {
        calls: calls.clone(),
    };
    let req = DispatchRequest {
        title: "June update".into(),
        body_html: "<p>news</p>".into(),
        timestamp_label: "1 June 2026".into(),
        channel: ChannelKind::Update,
    };
    let opts = PacingOptions {
        batch_size: NonZeroUsize::new(30).unwrap(),
        inter_batch_delay: Duration::from_secs(3),
        send_latency_allowance: Duration::from_secs(2),
        max_run_duration: Duration::from_secs(120),
    };

    let err = dispatch::run(&pool, &sender, &req, &opts, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::DataUnavailable(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
