//! Insert and update payloads accepted by the repositories.
//!
//! Read-side entities live in [`crate::model`]; the structs here only carry
//! what a write needs.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::model::{
    Credentials, RunStatus, RunTrigger, ScheduleGap, SchedulePolicy, UnitContent, UnitKind,
    UnitStatus,
};

#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct NewUnit {
    pub project_id: i64,
    pub kind: UnitKind,
    pub name: String,
    pub status: UnitStatus,
    pub content: UnitContent,
}

impl NewUnit {
    pub fn single(project_id: i64, name: impl Into<String>, content: UnitContent) -> Self {
        Self {
            project_id,
            kind: UnitKind::Single,
            name: name.into(),
            status: UnitStatus::Saved,
            content,
        }
    }

    /// `members` are unit ids in playback order.
    pub fn merged(project_id: i64, name: impl Into<String>, members: Vec<i64>) -> Self {
        Self {
            project_id,
            kind: UnitKind::Merged,
            name: name.into(),
            status: UnitStatus::Saved,
            content: UnitContent {
                members,
                ..UnitContent::default()
            },
        }
    }
}

/// Full replacement of a unit's scheduling columns.
#[derive(Debug, Clone)]
pub struct ScheduleUpdate {
    pub policy: SchedulePolicy,
    pub status: UnitStatus,
    pub publish_time: Option<NaiveTime>,
    pub gap: Option<ScheduleGap>,
    pub videos_per_day: u32,
    pub total_videos: Option<u32>,
    pub slot_times: Vec<NaiveTime>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct NewRun {
    pub unit_id: i64,
    pub work_item_id: Option<i64>,
    pub trigger: RunTrigger,
    pub status: RunStatus,
    pub remote_id: Option<String>,
    pub url: Option<String>,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub run_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}
