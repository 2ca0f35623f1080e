//! Timer service
//!
//! Components that sleep take an `Arc<dyn TimerService>` instead of calling
//! tokio directly, so they can be driven by a different clock.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic timer
#[async_trait]
pub trait TimerService: Send + Sync {
    /// Suspend the caller for `ms` milliseconds
    async fn wait_async(&self, ms: u64);

    /// Current monotonic time
    fn now(&self) -> Instant;

    async fn wait_for(&self, duration: Duration) {
        self.wait_async(duration.as_millis() as u64).await
    }
}

/// [`TimerService`] on the tokio clock; honours `tokio::time::pause`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl TokioTimer {
    pub fn shared() -> Arc<dyn TimerService> {
        Arc::new(TokioTimer)
    }
}

#[async_trait]
impl TimerService for TokioTimer {
    async fn wait_async(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
