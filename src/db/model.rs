//! Database view models used by repositories.

use crate::model::ChannelKind;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Completed-run summary persisted to `dispatch_runs`.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub channel: ChannelKind,
    pub title: String,
    pub total_recipients: usize,
    pub successful_deliveries: usize,
    pub batch_count: usize,
    pub error_count: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
