//! Durable priority queue with a process-wide single-flight claim.
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::{QueueStats, WorkItem, WorkStatus};

pub const MANUAL_PRIORITY: i64 = 1;
pub const SCHEDULED_PRIORITY: i64 = 0;

/// Turns one claimed item into a finished artifact.
#[async_trait]
pub trait WorkRunner: Send + Sync {
    async fn run_item(&self, item: &WorkItem) -> Result<()>;
}

#[derive(Clone)]
pub struct JobQueue {
    pool: Pool,
    gate: Arc<Semaphore>,
}

/// A `processing` item together with the process-wide permit. At most one
/// exists at a time; the permit is released when the claim is completed.
#[derive(Debug)]
pub struct Claim {
    pub item: WorkItem,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
}

impl JobQueue {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            gate: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub async fn enqueue(
        &self,
        unit_id: i64,
        priority: i64,
        publish_at: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let id = db::enqueue_work_item(&self.pool, unit_id, priority, publish_at, Utc::now()).await?;
        info!(item_id = id, unit_id, priority, ?publish_at, "work item enqueued");
        Ok(id)
    }

    /// Take a unit's daily enqueue claim and add its scheduled items in one
    /// step. Returns `None` when the unit was already enqueued today.
    pub async fn enqueue_day(
        &self,
        unit_id: i64,
        today: NaiveDate,
        publish_at: &[Option<DateTime<Utc>>],
    ) -> Result<Option<Vec<i64>>> {
        let ids = db::claim_and_enqueue_day(
            &self.pool,
            unit_id,
            today,
            SCHEDULED_PRIORITY,
            publish_at,
            Utc::now(),
        )
        .await?;
        if let Some(ids) = &ids {
            info!(unit_id, items = ids.len(), %today, "daily work items enqueued");
        }
        Ok(ids)
    }

    /// Claim the highest-priority, oldest pending item. Returns `None` when
    /// nothing is pending or another claim is still active.
    #[instrument(skip_all)]
    pub async fn claim_next(&self) -> Result<Option<Claim>> {
        let Ok(permit) = self.gate.clone().try_acquire_owned() else {
            return Ok(None);
        };
        let item = db::claim_next_work_item(&self.pool, Utc::now()).await?;
        Ok(item.map(|item| Claim {
            item,
            _permit: permit,
        }))
    }

    #[instrument(skip_all, fields(item_id = claim.item.id))]
    pub async fn complete(&self, claim: Claim, outcome: Outcome) -> Result<()> {
        let (status, message) = match &outcome {
            Outcome::Completed => (WorkStatus::Completed, None),
            Outcome::Failed(message) => (WorkStatus::Failed, Some(message.as_str())),
        };
        let finished =
            db::finish_work_item(&self.pool, claim.item.id, status, message, Utc::now()).await?;
        if !finished {
            warn!(item_id = claim.item.id, "work item was no longer processing");
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        db::queue_stats(&self.pool).await
    }

    /// Fail items left `processing` by a previous process. Call before the
    /// worker starts.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered =
            db::fail_stale_processing(&self.pool, "interrupted by restart", Utc::now()).await?;
        if recovered > 0 {
            warn!(recovered, "failed interrupted work items");
        }
        Ok(recovered)
    }
}

/// Claim and run one item. Returns whether an item was processed.
#[instrument(skip_all)]
pub async fn process_next(queue: &JobQueue, runner: &dyn WorkRunner) -> Result<bool> {
    let Some(claim) = queue.claim_next().await? else {
        return Ok(false);
    };
    let item_id = claim.item.id;
    let unit_id = claim.item.unit_id;
    info!(item_id, unit_id, "processing work item");
    let outcome = match runner.run_item(&claim.item).await {
        Ok(()) => {
            info!(item_id, unit_id, "work item completed");
            Outcome::Completed
        }
        Err(err) => {
            warn!(item_id, unit_id, %err, "work item failed");
            Outcome::Failed(err.to_string())
        }
    };
    queue.complete(claim, outcome).await?;
    Ok(true)
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub claim_delay: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            claim_delay: Duration::from_millis(1000),
        }
    }
}

/// Worker loop: short pause after each item, longer pause when idle.
pub async fn run_worker(queue: JobQueue, runner: Arc<dyn WorkRunner>, settings: WorkerSettings) {
    loop {
        match process_next(&queue, runner.as_ref()).await {
            Ok(true) => tokio::time::sleep(settings.claim_delay).await,
            Ok(false) => tokio::time::sleep(settings.poll_interval).await,
            Err(err) => {
                error!(%err, "queue worker error");
                tokio::time::sleep(settings.poll_interval).await;
            }
        }
    }
}

/// Process pending items until none remain or `max_items` were handled.
pub async fn drain(
    queue: &JobQueue,
    runner: &dyn WorkRunner,
    max_items: Option<usize>,
) -> Result<usize> {
    let mut processed = 0;
    while max_items.map_or(true, |max| processed < max) {
        if !process_next(queue, runner).await? {
            break;
        }
        processed += 1;
    }
    Ok(processed)
}
