//! The dispatch run: resolve, batch, then send sequentially with pacing.
//!
//! One run is a single logical thread of control. Batches go out one at a
//! time with a fixed delay between them; the delay is backpressure against
//! the downstream transport's rate limit, not an optimization target, so
//! batches must not be parallelized. A failed batch is recorded and skipped;
//! the run always yields a summary once resolution has succeeded.

use chrono::Utc;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::batcher;
use crate::config::Config;
use crate::db::{self, RunRecord};
use crate::error::DispatchError;
use crate::model::{BatchError, ChannelKind, DispatchRequest, DispatchResult, OutboundMessage};
use crate::resolver;
use crate::sender::Sender;

/// Pacing knobs for one run, snapshotted from config per channel.
#[derive(Debug, Clone)]
pub struct PacingOptions {
    pub batch_size: NonZeroUsize,
    pub inter_batch_delay: Duration,
    /// Worst-case per-send latency assumed by the runtime projection.
    pub send_latency_allowance: Duration,
    /// Host execution ceiling; projected overruns fail fast.
    pub max_run_duration: Duration,
}

impl PacingOptions {
    pub fn from_config(cfg: &Config, channel: ChannelKind) -> Self {
        let settings = cfg.channel_settings(channel);
        Self {
            batch_size: settings.batch_size,
            inter_batch_delay: settings.delay(),
            send_latency_allowance: cfg.send_latency_allowance(),
            max_run_duration: cfg.max_run_duration(),
        }
    }
}

/// Worst-case wall-clock estimate for `batch_count` sequential sends:
/// every send takes the full latency allowance and every gap the full
/// inter-batch delay (no delay after the last batch).
pub fn projected_duration(batch_count: usize, opts: &PacingOptions) -> Duration {
    if batch_count == 0 {
        return Duration::ZERO;
    }
    let gaps = (batch_count - 1) as u32;
    opts.send_latency_allowance * batch_count as u32 + opts.inter_batch_delay * gaps
}

/// Execute one dispatch run.
///
/// Fatal errors (`DataUnavailable`, `RunTooLong`) occur only before the
/// first send. After that point the run always completes with a
/// `DispatchResult`, recording per-batch failures instead of propagating
/// them. The cancellation token is honored between batches: before each
/// send and during each delay.
#[instrument(skip_all, fields(channel = req.channel.as_str()))]
pub async fn run(
    pool: &db::Pool,
    sender: &dyn Sender,
    req: &DispatchRequest,
    opts: &PacingOptions,
    cancel: &CancellationToken,
) -> Result<DispatchResult, DispatchError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let recipients = resolver::resolve(pool, req.channel).await?;
    let total_recipients = recipients.len();
    let addresses: Vec<String> = recipients.into_iter().map(|r| r.address).collect();
    let batches = batcher::chunk(addresses, opts.batch_size);
    let batch_count = batches.len();

    let projected = projected_duration(batch_count, opts);
    if projected > opts.max_run_duration {
        return Err(DispatchError::RunTooLong {
            projected,
            ceiling: opts.max_run_duration,
        });
    }

    let message = OutboundMessage::from_request(req);
    let mut successful_deliveries = 0usize;
    let mut errors: Vec<BatchError> = Vec::new();
    let mut cancelled = false;

    for (index, batch) in batches.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            warn!(%run_id, index, "run cancelled before batch send");
            break;
        }

        match sender.send_batch(&message, batch).await {
            Ok(()) => {
                successful_deliveries += batch.len();
                info!(%run_id, index, recipients = batch.len(), "batch sent");
            }
            Err(err) => {
                warn!(%run_id, index, ?err, "batch send failed; continuing");
                errors.push(BatchError {
                    batch_index: index,
                    message: err.to_string(),
                });
            }
        }

        if index + 1 < batch_count {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    warn!(%run_id, index, "run cancelled during inter-batch delay");
                    break;
                }
                _ = tokio::time::sleep(opts.inter_batch_delay) => {}
            }
        }
    }

    let result = DispatchResult {
        total_recipients,
        successful_deliveries,
        batch_count,
        errors,
        cancelled,
    };

    let record = RunRecord {
        run_id,
        channel: req.channel,
        title: req.title.clone(),
        total_recipients: result.total_recipients,
        successful_deliveries: result.successful_deliveries,
        batch_count: result.batch_count,
        error_count: result.errors.len(),
        cancelled: result.cancelled,
        started_at,
        finished_at: Utc::now(),
    };
    if let Err(err) = db::record_run(pool, &record).await {
        // The messages already went out; a lost log row must not fail the run.
        warn!(%run_id, ?err, "failed to record dispatch run");
    }

    info!(
        %run_id,
        total = result.total_recipients,
        sent = result.successful_deliveries,
        batches = result.batch_count,
        failed_batches = result.errors.len(),
        cancelled = result.cancelled,
        "dispatch run finished"
    );
    Ok(result)
}
