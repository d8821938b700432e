//! Notification dispatch service for the Prayer Diary application.
//!
//! Resolves recipients for a channel from two storage sources, partitions
//! them into fixed-size batches, and delivers the batches sequentially
//! with a fixed pacing delay through channel-specific HTTP transports,
//! accumulating a partial-failure summary per run.

pub mod batcher;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod resolver;
pub mod sender;
pub mod server;
