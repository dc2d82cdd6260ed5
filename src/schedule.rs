//! Schedule arithmetic for the publication policies.
//!
//! Everything here is pure: "now" and "today" are parameters, and all values
//! live in one fixed UTC offset. Only [`local_now`] reads the wall clock.
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

use crate::error::{CoreError, Result};
use crate::model::{ScheduleGap, SchedulableUnit};

pub const DEFAULT_UTC_OFFSET: &str = "+05:30";

/// Upper bound on a finite calendar; every video becomes a queued item.
pub const MAX_CALENDAR_VIDEOS: u32 = 1000;

/// Parse an offset written as `+HH:MM` or `-HH:MM`.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let invalid = || CoreError::Configuration(format!("invalid UTC offset '{s}', expected +HH:MM"));
    let s = s.trim();
    let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = s.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (h, m) = rest.split_once(':').ok_or_else(invalid)?;
    let h: i32 = h.parse().map_err(|_| invalid())?;
    let m: i32 = m.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&h) || !(0..=59).contains(&m) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(invalid)
}

/// Parse a time of day written as `HH:MM`.
pub fn parse_slot_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| {
        CoreError::Configuration(format!("invalid time of day '{s}', expected HH:MM"))
    })
}

pub fn format_slot_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn local_now(offset: FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&offset)
}

/// The instant at which the local wall clock shows `time` on `date`.
pub fn at_local(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<FixedOffset> {
    let local = date.and_time(time);
    offset.from_utc_datetime(&(local - Duration::seconds(offset.local_minus_utc() as i64)))
}

/// Days elapsed since the later of the last run and the start date, or `None`
/// when the unit has neither.
pub fn days_since_anchor(
    last_run: Option<NaiveDate>,
    start: Option<NaiveDate>,
    today: NaiveDate,
) -> Option<i64> {
    let anchor = match (last_run, start) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };
    anchor.map(|d| (today - d).num_days())
}

pub fn gap_elapsed(
    gap: ScheduleGap,
    last_run: Option<NaiveDate>,
    start: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    match days_since_anchor(last_run, start, today) {
        Some(days) => days >= gap.days(),
        None => true,
    }
}

pub fn within_publish_window(
    now: DateTime<FixedOffset>,
    publish_time: NaiveTime,
    window: Duration,
) -> bool {
    let target = now.date_naive().and_time(publish_time);
    let diff = now.naive_local() - target;
    diff.num_seconds().abs() <= window.num_seconds()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    NotConfigured,
    GapNotElapsed { days_since: i64, required: i64 },
    OutsidePublishWindow,
    DailyQuotaReached { runs_today: u32, videos_per_day: u32 },
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Decide whether a portal-gap unit should run at `now`.
pub fn portal_eligibility(
    unit: &SchedulableUnit,
    now: DateTime<FixedOffset>,
    successful_runs_today: u32,
    window: Duration,
) -> Eligibility {
    let Some(publish_time) = unit.publish_time else {
        return Eligibility::NotConfigured;
    };
    let gap = unit.gap.unwrap_or(ScheduleGap::Daily);
    let today = now.date_naive();

    if let Some(days_since) = days_since_anchor(unit.last_run_date, unit.start_date, today) {
        if days_since < gap.days() {
            return Eligibility::GapNotElapsed {
                days_since,
                required: gap.days(),
            };
        }
    }
    if !within_publish_window(now, publish_time, window) {
        return Eligibility::OutsidePublishWindow;
    }
    let videos_per_day = unit.videos_per_day.max(1);
    if successful_runs_today >= videos_per_day {
        return Eligibility::DailyQuotaReached {
            runs_today: successful_runs_today,
            videos_per_day,
        };
    }
    Eligibility::Eligible
}

/// Reject calendar parameters that cannot be honoured as given.
pub fn validate_calendar(total: Option<u32>, per_day: u32, times: &[NaiveTime]) -> Result<()> {
    if times.is_empty() {
        return Err(CoreError::Configuration(
            "calendar needs at least one time of day".into(),
        ));
    }
    if per_day == 0 {
        return Err(CoreError::Configuration(
            "videos_per_day must be at least 1".into(),
        ));
    }
    if per_day as usize > times.len() {
        return Err(CoreError::Configuration(format!(
            "videos_per_day ({per_day}) cannot exceed number of times ({})",
            times.len()
        )));
    }
    match total {
        Some(0) => Err(CoreError::Configuration(
            "total_videos must be at least 1".into(),
        )),
        Some(n) if n > MAX_CALENDAR_VIDEOS => Err(CoreError::Configuration(format!(
            "total_videos ({n}) cannot exceed {MAX_CALENDAR_VIDEOS}"
        ))),
        _ => Ok(()),
    }
}

/// True once the first slot of the day is behind the local clock.
pub fn first_slot_passed(now: DateTime<FixedOffset>, times: &[NaiveTime]) -> bool {
    times.first().is_some_and(|first| now.time() > *first)
}

/// Lay `total` publications over consecutive days, `per_day` at a time.
pub fn calendar_slots(
    total: u32,
    per_day: u32,
    times: &[NaiveTime],
    today: NaiveDate,
    first_slot_passed: bool,
    offset: FixedOffset,
) -> Result<Vec<DateTime<FixedOffset>>> {
    validate_calendar(Some(total), per_day, times)?;
    let start = if first_slot_passed {
        today + Duration::days(1)
    } else {
        today
    };
    let days = total.div_ceil(per_day);
    let mut slots = Vec::with_capacity(total as usize);
    for day in 0..days {
        let date = start + Duration::days(day as i64);
        for slot in 0..per_day as usize {
            if slots.len() == total as usize {
                break;
            }
            slots.push(at_local(date, times[slot % times.len()], offset));
        }
    }
    Ok(slots)
}

/// The `per_day` slots of a single day for an open-ended calendar unit.
pub fn daily_slots(
    per_day: u32,
    times: &[NaiveTime],
    date: NaiveDate,
    offset: FixedOffset,
) -> Vec<DateTime<FixedOffset>> {
    if times.is_empty() {
        return Vec::new();
    }
    (0..per_day as usize)
        .map(|slot| at_local(date, times[slot % times.len()], offset))
        .collect()
}

pub fn in_date_window(today: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
    start.map_or(true, |s| today >= s) && end.map_or(true, |e| today <= e)
}

/// Next occurrence of `hour:00` local time strictly after `now`.
pub fn next_daily_run(now: DateTime<FixedOffset>, hour: u32) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today_run = at_local(now.date_naive(), at, offset);
    if now < today_run {
        today_run
    } else {
        at_local(now.date_naive() + Duration::days(1), at, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{UnitContent, UnitKind, UnitStatus};

    fn ist() -> FixedOffset {
        parse_utc_offset(DEFAULT_UTC_OFFSET).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn portal_unit(gap: ScheduleGap, last_run: Option<NaiveDate>) -> SchedulableUnit {
        SchedulableUnit {
            id: 1,
            project_id: 1,
            kind: UnitKind::Single,
            name: "morning".into(),
            policy: Some(crate::model::SchedulePolicy::PortalGap),
            publish_time: Some(hm(7, 0)),
            gap: Some(gap),
            videos_per_day: 1,
            total_videos: None,
            slot_times: vec![],
            start_date: None,
            end_date: None,
            last_run_date: last_run,
            last_attempt_date: None,
            status: UnitStatus::Scheduled,
            remote_id: None,
            content: UnitContent::default(),
        }
    }

    #[test]
    fn offset_parsing() {
        assert_eq!(ist().local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(parse_utc_offset("-03:00").unwrap().local_minus_utc(), -3 * 3600);
        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn at_local_uses_fixed_offset() {
        let dt = at_local(date(2024, 3, 10), hm(7, 0), ist());
        assert_eq!(dt.with_timezone(&Utc).to_rfc3339(), "2024-03-10T01:30:00+00:00");
        assert_eq!(dt.time(), hm(7, 0));
    }

    #[test]
    fn weekly_gap_needs_seven_days() {
        let now = at_local(date(2024, 5, 20), hm(7, 0), ist());
        let six = portal_unit(ScheduleGap::Weekly, Some(date(2024, 5, 14)));
        assert_eq!(
            portal_eligibility(&six, now, 0, Duration::minutes(1)),
            Eligibility::GapNotElapsed { days_since: 6, required: 7 }
        );
        let seven = portal_unit(ScheduleGap::Weekly, Some(date(2024, 5, 13)));
        assert!(portal_eligibility(&seven, now, 0, Duration::minutes(1)).is_eligible());
    }

    #[test]
    fn unit_without_dates_is_eligible_at_publish_time() {
        let now = at_local(date(2024, 5, 20), hm(7, 0), ist()) + Duration::seconds(30);
        let unit = portal_unit(ScheduleGap::ThreeDays, None);
        assert!(portal_eligibility(&unit, now, 0, Duration::minutes(1)).is_eligible());
    }

    #[test]
    fn start_date_is_the_anchor_when_later_than_last_run() {
        let today = date(2024, 5, 20);
        assert_eq!(
            days_since_anchor(Some(date(2024, 5, 1)), Some(date(2024, 5, 19)), today),
            Some(1)
        );
        assert!(!gap_elapsed(ScheduleGap::TwoDays, Some(date(2024, 5, 1)), Some(date(2024, 5, 19)), today));
        assert!(gap_elapsed(ScheduleGap::TwoDays, None, None, today));
    }

    #[test]
    fn publish_window_is_one_minute_each_side() {
        let unit = portal_unit(ScheduleGap::Daily, None);
        let base = at_local(date(2024, 5, 20), hm(7, 0), ist());
        let window = Duration::minutes(1);
        assert!(portal_eligibility(&unit, base - Duration::seconds(60), 0, window).is_eligible());
        assert!(portal_eligibility(&unit, base + Duration::seconds(59), 0, window).is_eligible());
        assert_eq!(
            portal_eligibility(&unit, base + Duration::minutes(2), 0, window),
            Eligibility::OutsidePublishWindow
        );
    }

    #[test]
    fn daily_quota_blocks_further_runs() {
        let unit = portal_unit(ScheduleGap::Daily, None);
        let now = at_local(date(2024, 5, 20), hm(7, 0), ist());
        assert_eq!(
            portal_eligibility(&unit, now, 1, Duration::minutes(1)),
            Eligibility::DailyQuotaReached { runs_today: 1, videos_per_day: 1 }
        );
    }

    #[test]
    fn missing_publish_time_is_not_configured() {
        let mut unit = portal_unit(ScheduleGap::Daily, None);
        unit.publish_time = None;
        let now = at_local(date(2024, 5, 20), hm(7, 0), ist());
        assert_eq!(
            portal_eligibility(&unit, now, 0, Duration::minutes(1)),
            Eligibility::NotConfigured
        );
    }

    #[test]
    fn calendar_starts_tomorrow_when_first_slot_passed() {
        let today = date(2024, 5, 20);
        let times = [hm(10, 0), hm(14, 0)];
        let slots = calendar_slots(5, 2, &times, today, true, ist()).unwrap();
        let local: Vec<String> = slots
            .iter()
            .map(|s| s.format("%Y-%m-%d %H:%M").to_string())
            .collect();
        assert_eq!(
            local,
            vec![
                "2024-05-21 10:00",
                "2024-05-21 14:00",
                "2024-05-22 10:00",
                "2024-05-22 14:00",
                "2024-05-23 10:00",
            ]
        );
    }

    #[test]
    fn calendar_starts_today_before_first_slot() {
        let today = date(2024, 5, 20);
        let times = [hm(10, 0), hm(14, 0), hm(18, 0)];
        let slots = calendar_slots(2, 1, &times, today, false, ist()).unwrap();
        assert_eq!(slots[0], at_local(today, hm(10, 0), ist()));
        assert_eq!(slots[1], at_local(date(2024, 5, 21), hm(10, 0), ist()));
    }

    #[test]
    fn first_slot_passed_compares_local_time() {
        let times = [hm(10, 0)];
        let before = at_local(date(2024, 5, 20), hm(9, 59), ist());
        let after = at_local(date(2024, 5, 20), hm(10, 1), ist());
        assert!(!first_slot_passed(before, &times));
        assert!(first_slot_passed(after, &times));
        assert!(!first_slot_passed(after, &[]));
    }

    #[test]
    fn more_videos_per_day_than_times_is_rejected() {
        let times = [hm(9, 0), hm(12, 0)];
        let err = validate_calendar(Some(10), 3, &times).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(msg) if msg.contains("cannot exceed")));
        assert!(calendar_slots(10, 3, &times, date(2024, 5, 20), false, ist()).is_err());
        assert!(validate_calendar(Some(1), 1, &[]).is_err());
        assert!(validate_calendar(Some(0), 1, &times).is_err());
    }

    #[test]
    fn oversized_calendar_is_rejected_without_allocating() {
        let times = [hm(9, 0), hm(12, 0)];
        let today = date(2024, 5, 20);
        let err = calendar_slots(u32::MAX, 2, &times, today, false, ist()).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("cannot exceed"));

        let slots = calendar_slots(MAX_CALENDAR_VIDEOS, 2, &times, today, false, ist()).unwrap();
        assert_eq!(slots.len(), MAX_CALENDAR_VIDEOS as usize);
        assert!(validate_calendar(Some(MAX_CALENDAR_VIDEOS + 1), 1, &times).is_err());
    }

    #[test]
    fn daily_slots_and_window() {
        let today = date(2024, 5, 20);
        let slots = daily_slots(2, &[hm(9, 0), hm(12, 0)], today, ist());
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].time(), hm(12, 0));
        assert!(in_date_window(today, Some(today), None));
        assert!(!in_date_window(today, Some(date(2024, 5, 21)), None));
        assert!(!in_date_window(today, None, Some(date(2024, 5, 19))));
    }

    #[test]
    fn next_daily_run_rolls_over() {
        let early = at_local(date(2024, 5, 20), hm(0, 30), ist());
        assert_eq!(next_daily_run(early, 1), at_local(date(2024, 5, 20), hm(1, 0), ist()));
        let late = at_local(date(2024, 5, 20), hm(1, 0), ist());
        assert_eq!(next_daily_run(late, 1), at_local(date(2024, 5, 21), hm(1, 0), ist()));
    }

    #[test]
    fn slot_time_round_trip() {
        assert_eq!(format_slot_time(parse_slot_time("07:05").unwrap()), "07:05");
        assert!(parse_slot_time("7pm").is_err());
    }
}
