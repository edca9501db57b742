//! Simulated workload for the `conflux` binary.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use conflux_pipeline::source;
use conflux_pipeline::{Pipeline, Priority, TaskError, TaskQueue};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemoError {
    #[error("item {0} failed on purpose")]
    Injected(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct Workload {
    pub count: u64,
    pub max_delay: Duration,
    pub fail_at: Option<u64>,
}

impl Workload {
    /// Deterministic pseudo-random delay in `[0, max_delay]`.
    pub fn delay_for(&self, value: u64) -> Duration {
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(value.wrapping_mul(7919) % max.saturating_add(1))
    }

    /// Sleep for the item's delay, then square it or fail on purpose.
    pub async fn run_item(self, value: u64, index: usize) -> Result<Delivered, DemoError> {
        tokio::time::sleep(self.delay_for(value)).await;
        if self.fail_at == Some(value) {
            return Err(DemoError::Injected(value));
        }
        Ok(Delivered {
            index,
            value,
            square: u128::from(value) * u128::from(value),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivered {
    pub index: usize,
    pub value: u64,
    /// Wide enough for any `u64` squared.
    pub square: u128,
}

/// One output line for `item`: JSON when `json` is set, a padded text row
/// otherwise.
pub fn render(item: &Delivered, json: bool) -> serde_json::Result<String> {
    if json {
        return serde_json::to_string(item);
    }
    Ok(format!("#{:<4} {:>8} -> {}", item.index, item.value, item.square))
}

pub fn pipeline(
    workload: &Workload,
    queue: &TaskQueue,
    ordered: bool,
    priority: Priority,
) -> Pipeline<u64, Delivered, DemoError> {
    let plan = *workload;
    Pipeline::builder(source::iter(0..workload.count), move |value: u64, index| {
        plan.run_item(value, index)
    })
    .queue(queue)
    .ordered(ordered)
    .priority(priority)
    .build()
}

/// Pull every result, handing each to `on_item`. Returns how many were
/// delivered, or the error that stopped the run.
pub async fn drive(
    pipeline: &mut Pipeline<u64, Delivered, DemoError>,
    mut on_item: impl FnMut(&Delivered),
) -> Result<usize, TaskError<DemoError>> {
    let mut delivered = 0;
    while let Some(outcome) = pipeline.next().await {
        on_item(&outcome?);
        delivered += 1;
    }
    Ok(delivered)
}
