// Injectable clock so pacing and cycle logic can be tested without real delays

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Wall clock plus suspension, behind a trait so tests can simulate elapsed
/// time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Production clock: `Utc::now` and `tokio::time::sleep`.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
