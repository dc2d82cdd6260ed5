//! The single scheduling authority: a daily trigger that feeds open-ended
//! calendar units into the queue, a per-minute trigger that starts portal-gap
//! publications in the background, and a warm-up run shortly after start.
//!
//! Every action on a unit is preceded by a single-row claim for the current
//! local day; a unit whose claim fails is skipped.
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use crate::db::{self, Pool};
use crate::error::Result;
use crate::model::{RunTrigger, SchedulableUnit, SchedulePolicy, UnitStatus};
use crate::pipeline::{Pipeline, PublishRequest};
use crate::queue::JobQueue;
use crate::schedule;

#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub offset: FixedOffset,
    pub daily_hour: u32,
    pub tick: Duration,
    pub warmup: Duration,
    pub publish_window: ChronoDuration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyReport {
    pub units_considered: usize,
    pub units_claimed: usize,
    pub items_enqueued: usize,
    pub failures: usize,
}

/// Outcome of one portal tick. `published` and `failures` only cover the
/// started publications once [`TickReport::wait`] has joined them.
#[derive(Debug, Default)]
pub struct TickReport {
    pub units_considered: usize,
    pub claimed: usize,
    pub published: usize,
    pub failures: usize,
    pub runs: Vec<JoinHandle<bool>>,
}

impl TickReport {
    /// Wait for every publication started by the tick and tally the results.
    pub async fn wait(mut self) -> Self {
        for run in std::mem::take(&mut self.runs) {
            match run.await {
                Ok(true) => self.published += 1,
                Ok(false) => self.failures += 1,
                Err(err) => {
                    self.failures += 1;
                    error!(%err, "portal publication task panicked");
                }
            }
        }
        self
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    pool: Pool,
    queue: JobQueue,
    pipeline: Arc<Pipeline>,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        pool: Pool,
        queue: JobQueue,
        pipeline: Arc<Pipeline>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            pool,
            queue,
            pipeline,
            settings,
        }
    }

    pub fn local(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.settings.offset)
    }

    /// Enqueue today's outstanding publications for every open-ended calendar
    /// unit. Safe to call more than once per day.
    #[instrument(skip_all)]
    pub async fn run_daily_check(&self, now: DateTime<Utc>) -> Result<DailyReport> {
        let local_now = self.local(now);
        let today = local_now.date_naive();
        let units = db::list_schedulable_units(
            &self.pool,
            SchedulePolicy::YoutubeCalendar,
            UnitStatus::Scheduled,
        )
        .await?;

        let mut report = DailyReport::default();
        for unit in units {
            if unit.total_videos.is_some()
                || !schedule::in_date_window(today, unit.start_date, unit.end_date)
            {
                continue;
            }
            report.units_considered += 1;
            match self.enqueue_today(&unit, local_now).await {
                Ok(Some(enqueued)) => {
                    report.units_claimed += 1;
                    report.items_enqueued += enqueued;
                }
                Ok(None) => {}
                Err(err) => {
                    report.failures += 1;
                    error!(unit_id = unit.id, %err, "daily enqueue failed");
                }
            }
        }
        info!(
            considered = report.units_considered,
            claimed = report.units_claimed,
            enqueued = report.items_enqueued,
            failures = report.failures,
            "daily check finished"
        );
        Ok(report)
    }

    /// Returns `None` when the unit was already claimed today.
    async fn enqueue_today(
        &self,
        unit: &SchedulableUnit,
        local_now: DateTime<FixedOffset>,
    ) -> Result<Option<usize>> {
        let today = local_now.date_naive();
        let done = db::count_successful_runs_on(&self.pool, unit.id, today).await?;
        let publish_at: Vec<_> = schedule::daily_slots(
            unit.videos_per_day,
            &unit.slot_times,
            today,
            self.settings.offset,
        )
        .into_iter()
        .skip(done as usize)
        .map(|slot| (slot > local_now).then(|| slot.with_timezone(&Utc)))
        .collect();
        let Some(ids) = self.queue.enqueue_day(unit.id, today, &publish_at).await? else {
            return Ok(None);
        };
        info!(unit_id = unit.id, enqueued = ids.len(), done, "calendar unit enqueued for today");
        Ok(Some(ids.len()))
    }

    /// Evaluate every scheduled portal-gap unit and start a publication for
    /// each eligible one. Publications run as their own tasks so a slow
    /// encode never holds up the next tick; the report carries their handles.
    #[instrument(skip_all)]
    pub async fn run_portal_tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let local_now = self.local(now);
        let today = local_now.date_naive();
        let units =
            db::list_schedulable_units(&self.pool, SchedulePolicy::PortalGap, UnitStatus::Scheduled)
                .await?;

        let mut report = TickReport::default();
        for unit in units {
            report.units_considered += 1;
            let runs_today = match db::count_successful_runs_on(&self.pool, unit.id, today).await {
                Ok(n) => n,
                Err(err) => {
                    report.failures += 1;
                    error!(unit_id = unit.id, %err, "could not read run history");
                    continue;
                }
            };
            let eligibility = schedule::portal_eligibility(
                &unit,
                local_now,
                runs_today,
                self.settings.publish_window,
            );
            if !eligibility.is_eligible() {
                continue;
            }
            match db::claim_unit_attempt(&self.pool, unit.id, today).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    report.failures += 1;
                    error!(unit_id = unit.id, %err, "could not claim unit");
                    continue;
                }
            }

            report.claimed += 1;
            info!(unit_id = unit.id, name = %unit.name, "publishing portal unit");
            let pipeline = self.pipeline.clone();
            report.runs.push(tokio::spawn(async move {
                let request = PublishRequest {
                    publish_at: None,
                    trigger: RunTrigger::Portal,
                    work_item_id: None,
                };
                match pipeline.run(&unit, request).await {
                    Ok(_) => true,
                    Err(err) => {
                        if err.is_credentials() {
                            warn!(unit_id = unit.id, %err, "channel needs re-authorisation");
                        } else {
                            error!(unit_id = unit.id, %err, "portal publication failed");
                        }
                        false
                    }
                }
            }));
        }
        Ok(report)
    }

    /// Start the daily, per-minute and warm-up tasks.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let daily = {
            let this = self.clone();
            tokio::spawn(async move {
                loop {
                    let now = schedule::local_now(this.settings.offset);
                    let next = schedule::next_daily_run(now, this.settings.daily_hour);
                    let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                    info!(next = %next, "next daily check scheduled");
                    tokio::time::sleep(wait).await;
                    if let Err(err) = this.run_daily_check(Utc::now()).await {
                        error!(%err, "daily check aborted");
                    }
                }
            })
        };

        let ticker = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(this.settings.tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    if let Err(err) = this.run_portal_tick(Utc::now()).await {
                        error!(%err, "portal tick aborted");
                    }
                }
            })
        };

        let warmup = tokio::spawn(async move {
            tokio::time::sleep(self.settings.warmup).await;
            info!("running warm-up daily check");
            if let Err(err) = self.run_daily_check(Utc::now()).await {
                error!(%err, "warm-up check aborted");
            }
        });

        vec![daily, ticker, warmup]
    }
}
