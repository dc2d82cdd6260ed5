//! Operations exposed to the outer application layer.
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use tracing::{info, instrument};

use crate::db::{self, Pool, ScheduleUpdate};
use crate::error::{CoreError, Result};
use crate::model::{QueueStats, ScheduleGap, SchedulePolicy, UnitStatus};
use crate::queue::{JobQueue, MANUAL_PRIORITY};
use crate::schedule;

/// Most items a single manual trigger may add.
pub const MAX_MANUAL_ITEMS: u32 = 100;

/// Requested schedule, as received from the outer layer (times as `HH:MM`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleRequest {
    Instant,
    PortalGap {
        publish_time: String,
        gap: Option<String>,
        videos_per_day: u32,
        start_date: Option<NaiveDate>,
    },
    YoutubeCalendar {
        total_videos: Option<u32>,
        videos_per_day: u32,
        times: Vec<String>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOutcome {
    pub policy: SchedulePolicy,
    /// Ids of the work items created right away.
    pub enqueued: Vec<i64>,
    /// Publication instants of the enqueued items, if any.
    pub slots: Vec<DateTime<FixedOffset>>,
}

#[derive(Clone)]
pub struct Engine {
    pool: Pool,
    queue: JobQueue,
    offset: FixedOffset,
}

impl Engine {
    pub fn new(pool: Pool, queue: JobQueue, offset: FixedOffset) -> Self {
        Self {
            pool,
            queue,
            offset,
        }
    }

    /// Manual trigger: `count` immediate items at manual priority.
    #[instrument(skip(self))]
    pub async fn enqueue_for_unit(&self, unit_id: i64, count: u32) -> Result<Vec<i64>> {
        if count == 0 {
            return Err(CoreError::Configuration("count must be at least 1".into()));
        }
        if count > MAX_MANUAL_ITEMS {
            return Err(CoreError::Configuration(format!(
                "count ({count}) cannot exceed {MAX_MANUAL_ITEMS}"
            )));
        }
        db::get_unit(&self.pool, unit_id).await?;
        let slots = vec![None; count as usize];
        let ids =
            db::enqueue_work_items(&self.pool, unit_id, MANUAL_PRIORITY, &slots, Utc::now())
                .await?;
        info!(unit_id, count, "manual items enqueued");
        Ok(ids)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    /// Apply a schedule to a unit. Every parameter is validated before anything
    /// is written.
    #[instrument(skip(self, request, now))]
    pub async fn configure_schedule(
        &self,
        unit_id: i64,
        request: ScheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome> {
        let local_now = now.with_timezone(&self.offset);
        let plan = plan_schedule(&request, local_now, self.offset)?;
        db::get_unit(&self.pool, unit_id).await?;

        db::update_unit_schedule(&self.pool, unit_id, &plan.update).await?;
        let publish_at: Vec<Option<DateTime<Utc>>> = match plan.update.policy {
            SchedulePolicy::Instant => vec![None],
            _ => plan
                .slots
                .iter()
                .map(|s| Some(s.with_timezone(&Utc)))
                .collect(),
        };
        let enqueued = if publish_at.is_empty() {
            Vec::new()
        } else {
            db::enqueue_work_items(&self.pool, unit_id, MANUAL_PRIORITY, &publish_at, now).await?
        };
        info!(
            unit_id,
            policy = plan.update.policy.as_str(),
            enqueued = enqueued.len(),
            "schedule configured"
        );
        Ok(ScheduleOutcome {
            policy: plan.update.policy,
            enqueued,
            slots: plan.slots,
        })
    }
}

struct SchedulePlan {
    update: ScheduleUpdate,
    slots: Vec<DateTime<FixedOffset>>,
}

fn parse_times(times: &[String]) -> Result<Vec<NaiveTime>> {
    times.iter().map(|t| schedule::parse_slot_time(t)).collect()
}

fn check_date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(CoreError::Configuration(format!(
            "end_date {e} is before start_date {s}"
        ))),
        _ => Ok(()),
    }
}

fn plan_schedule(
    request: &ScheduleRequest,
    local_now: DateTime<FixedOffset>,
    offset: FixedOffset,
) -> Result<SchedulePlan> {
    let base = ScheduleUpdate {
        policy: SchedulePolicy::Instant,
        status: UnitStatus::Scheduled,
        publish_time: None,
        gap: None,
        videos_per_day: 1,
        total_videos: None,
        slot_times: Vec::new(),
        start_date: None,
        end_date: None,
    };
    match request {
        ScheduleRequest::Instant => Ok(SchedulePlan {
            update: base,
            slots: Vec::new(),
        }),
        ScheduleRequest::PortalGap {
            publish_time,
            gap,
            videos_per_day,
            start_date,
        } => {
            let publish_time = schedule::parse_slot_time(publish_time)?;
            let gap = match gap {
                Some(g) => ScheduleGap::parse(g)
                    .ok_or_else(|| CoreError::Configuration(format!("unknown gap '{g}'")))?,
                None => ScheduleGap::Daily,
            };
            if *videos_per_day == 0 {
                return Err(CoreError::Configuration(
                    "videos_per_day must be at least 1".into(),
                ));
            }
            Ok(SchedulePlan {
                update: ScheduleUpdate {
                    policy: SchedulePolicy::PortalGap,
                    publish_time: Some(publish_time),
                    gap: Some(gap),
                    videos_per_day: *videos_per_day,
                    start_date: *start_date,
                    ..base
                },
                slots: Vec::new(),
            })
        }
        ScheduleRequest::YoutubeCalendar {
            total_videos,
            videos_per_day,
            times,
            start_date,
            end_date,
        } => {
            let slot_times = parse_times(times)?;
            schedule::validate_calendar(*total_videos, *videos_per_day, &slot_times)?;
            check_date_range(*start_date, *end_date)?;
            let slots = match total_videos {
                Some(total) => schedule::calendar_slots(
                    *total,
                    *videos_per_day,
                    &slot_times,
                    local_now.date_naive(),
                    schedule::first_slot_passed(local_now, &slot_times),
                    offset,
                )?,
                None => Vec::new(),
            };
            Ok(SchedulePlan {
                update: ScheduleUpdate {
                    policy: SchedulePolicy::YoutubeCalendar,
                    videos_per_day: *videos_per_day,
                    total_videos: *total_videos,
                    slot_times,
                    start_date: *start_date,
                    end_date: *end_date,
                    ..base
                },
                slots,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(h: u32, m: u32) -> (DateTime<FixedOffset>, FixedOffset) {
        let offset = schedule::parse_utc_offset("+05:30").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        (
            schedule::at_local(date, NaiveTime::from_hms_opt(h, m, 0).unwrap(), offset),
            offset,
        )
    }

    #[test]
    fn portal_gap_defaults_to_daily() {
        let (now, offset) = local(6, 0);
        let plan = plan_schedule(
            &ScheduleRequest::PortalGap {
                publish_time: "07:30".into(),
                gap: None,
                videos_per_day: 1,
                start_date: None,
            },
            now,
            offset,
        )
        .unwrap();
        assert_eq!(plan.update.policy, SchedulePolicy::PortalGap);
        assert_eq!(plan.update.gap, Some(ScheduleGap::Daily));
        assert_eq!(plan.update.publish_time, NaiveTime::from_hms_opt(7, 30, 0));
        assert!(plan.slots.is_empty());
    }

    #[test]
    fn bad_inputs_are_configuration_errors() {
        let (now, offset) = local(6, 0);
        let bad_gap = ScheduleRequest::PortalGap {
            publish_time: "07:30".into(),
            gap: Some("fortnightly".into()),
            videos_per_day: 1,
            start_date: None,
        };
        assert!(matches!(
            plan_schedule(&bad_gap, now, offset),
            Err(CoreError::Configuration(_))
        ));

        let bad_time = ScheduleRequest::YoutubeCalendar {
            total_videos: Some(2),
            videos_per_day: 1,
            times: vec!["25:00".into()],
            start_date: None,
            end_date: None,
        };
        assert!(matches!(
            plan_schedule(&bad_time, now, offset),
            Err(CoreError::Configuration(_))
        ));

        let reversed = ScheduleRequest::YoutubeCalendar {
            total_videos: None,
            videos_per_day: 1,
            times: vec!["09:00".into()],
            start_date: NaiveDate::from_ymd_opt(2024, 6, 1),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1),
        };
        assert!(plan_schedule(&reversed, now, offset).is_err());
    }

    #[test]
    fn finite_calendar_produces_slots() {
        let (now, offset) = local(11, 0);
        let plan = plan_schedule(
            &ScheduleRequest::YoutubeCalendar {
                total_videos: Some(3),
                videos_per_day: 2,
                times: vec!["10:00".into(), "14:00".into()],
                start_date: None,
                end_date: None,
            },
            now,
            offset,
        )
        .unwrap();
        assert_eq!(plan.slots.len(), 3);
        assert_eq!(plan.slots[0].date_naive(), NaiveDate::from_ymd_opt(2024, 5, 21).unwrap());
        assert_eq!(plan.update.total_videos, Some(3));
    }
}
