//! Interval-driven feed for deployments without a push endpoint.
//!
//! Every tick makes the monitor resync; no balance deltas are applied.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use satchel_core::error::IndexerError;
use satchel_core::feed::FeedEvent;
use satchel_core::traits::{FeedStream, FeedTransport};

#[derive(Clone, Copy, Debug)]
pub struct PollTransport {
    period: Duration,
}

impl PollTransport {
    pub fn new(period: Duration) -> Self {
        Self { period: period.max(Duration::from_millis(1)) }
    }
}

#[async_trait]
impl FeedTransport for PollTransport {
    async fn connect(&self, _addresses: &[String]) -> Result<Box<dyn FeedStream>, IndexerError> {
        let mut ticks = interval_at(Instant::now() + self.period, self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Box::new(PollStream { ticks }))
    }
}

struct PollStream {
    ticks: Interval,
}

#[async_trait]
impl FeedStream for PollStream {
    async fn next_event(&mut self) -> Result<Option<FeedEvent>, IndexerError> {
        self.ticks.tick().await;
        Ok(Some(FeedEvent::Tick))
    }
}
