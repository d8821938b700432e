//! Error taxonomy for a dispatch run.
//!
//! Only pre-send failures live here. A batch whose send attempt fails is
//! recorded in the run summary (`model::BatchError`) and never surfaces as
//! a `DispatchError`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Malformed or incomplete request; reported before any side effect.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Required endpoint/credential missing for the requested channel.
    #[error("configuration error: {0}")]
    Config(&'static str),

    /// A recipient source read failed; fatal for the run, nothing sent.
    #[error("recipient source unavailable: {0}")]
    DataUnavailable(#[source] anyhow::Error),

    /// Projected duration exceeds the host ceiling; rejected before the
    /// first send so the caller gets a clear error instead of a timeout.
    #[error("projected run time {projected:?} exceeds ceiling {ceiling:?}")]
    RunTooLong {
        projected: Duration,
        ceiling: Duration,
    },
}
