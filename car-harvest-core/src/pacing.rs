//! Delays between requests.
//!
//! Two separate mechanisms live here:
//! - [`Pacer`] is the cooperative wait used by harvesters and the chunk loop
//!   (page delay, task stagger, chunk delay). It always suspends on the tokio
//!   timer, so tests drive it with a paused clock.
//! - [`Sleeper`] is the delay function injected into retry loops, so that
//!   retry timing can be observed or skipped without touching the clock.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::PacingConfig;

#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    pub async fn between_pages(&self) {
        pause(self.config.page_delay, "page").await;
    }

    pub async fn between_tasks(&self) {
        pause(self.config.stagger_delay, "stagger").await;
    }

    pub async fn between_chunks(&self) {
        pause(self.config.chunk_delay, "chunk").await;
    }
}

async fn pause(delay: Duration, kind: &'static str) {
    if delay.is_zero() {
        return;
    }
    debug!(kind, delay_ms = delay.as_millis() as u64, "Pacing");
    tokio::time::sleep(delay).await;
}

/// Delay function for retry loops.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real sleeping on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
    }
}
