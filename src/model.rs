use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A timed piece of source footage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSegment {
    pub path: PathBuf,
    pub duration: f64,
    pub has_audio: bool,
}

impl MediaSegment {
    pub fn new(path: impl Into<PathBuf>, duration: f64, has_audio: bool) -> Self {
        Self {
            path: path.into(),
            duration,
            has_audio,
        }
    }
}

/// Ordered segments whose cumulative duration reaches a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub segments: Vec<MediaSegment>,
    pub total_duration: f64,
    /// Number of shuffled passes over the pool that were started.
    pub passes: u32,
}

impl SelectionResult {
    pub fn all_have_audio(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| s.has_audio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub path: PathBuf,
    pub duration: f64,
    pub selection: SelectionResult,
    pub cover_image: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(WorkStatus::Pending),
            "processing" => Some(WorkStatus::Processing),
            "completed" => Some(WorkStatus::Completed),
            "failed" => Some(WorkStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub unit_id: i64,
    pub status: WorkStatus,
    pub priority: i64,
    pub publish_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SchedulePolicy {
    Instant,
    PortalGap,
    YoutubeCalendar,
}

impl SchedulePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePolicy::Instant => "instant",
            SchedulePolicy::PortalGap => "portal-gap",
            SchedulePolicy::YoutubeCalendar => "youtube-calendar",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "instant" => Some(SchedulePolicy::Instant),
            "portal-gap" => Some(SchedulePolicy::PortalGap),
            "youtube-calendar" => Some(SchedulePolicy::YoutubeCalendar),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScheduleGap {
    Daily,
    TwoDays,
    ThreeDays,
    FourDays,
    FiveDays,
    Weekly,
}

impl ScheduleGap {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleGap::Daily => "daily",
            ScheduleGap::TwoDays => "2days",
            ScheduleGap::ThreeDays => "3days",
            ScheduleGap::FourDays => "4days",
            ScheduleGap::FiveDays => "5days",
            ScheduleGap::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ScheduleGap::Daily),
            "2days" => Some(ScheduleGap::TwoDays),
            "3days" => Some(ScheduleGap::ThreeDays),
            "4days" => Some(ScheduleGap::FourDays),
            "5days" => Some(ScheduleGap::FiveDays),
            "weekly" => Some(ScheduleGap::Weekly),
            _ => None,
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            ScheduleGap::Daily => 1,
            ScheduleGap::TwoDays => 2,
            ScheduleGap::ThreeDays => 3,
            ScheduleGap::FourDays => 4,
            ScheduleGap::FiveDays => 5,
            ScheduleGap::Weekly => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitStatus {
    Draft,
    Saved,
    Scheduled,
    Published,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Draft => "draft",
            UnitStatus::Saved => "saved",
            UnitStatus::Scheduled => "scheduled",
            UnitStatus::Published => "published",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(UnitStatus::Draft),
            "saved" => Some(UnitStatus::Saved),
            "scheduled" => Some(UnitStatus::Scheduled),
            "published" => Some(UnitStatus::Published),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnitKind {
    /// Built directly from clip and audio pools.
    Single,
    /// Concatenation of fresh artifacts from member units.
    Merged,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Single => "single",
            UnitKind::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single" => Some(UnitKind::Single),
            "merged" => Some(UnitKind::Merged),
            _ => None,
        }
    }
}

/// Asset and metadata lists of a unit, already decoded into ordered sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitContent {
    pub titles: Vec<String>,
    pub descriptions: Vec<String>,
    pub tags: Vec<String>,
    pub clips_folder: Option<PathBuf>,
    pub audio_folder: Option<PathBuf>,
    pub thumbnails_folder: Option<PathBuf>,
    pub clip_files: Vec<PathBuf>,
    pub audio_files: Vec<PathBuf>,
    pub thumbnail_files: Vec<PathBuf>,
    /// Member unit ids of a merged unit, in playback order.
    pub members: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulableUnit {
    pub id: i64,
    pub project_id: i64,
    pub kind: UnitKind,
    pub name: String,
    pub policy: Option<SchedulePolicy>,
    pub publish_time: Option<NaiveTime>,
    pub gap: Option<ScheduleGap>,
    pub videos_per_day: u32,
    /// Finite calendar size; `None` for open-ended units.
    pub total_videos: Option<u32>,
    pub slot_times: Vec<NaiveTime>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub last_run_date: Option<NaiveDate>,
    pub last_attempt_date: Option<NaiveDate>,
    pub status: UnitStatus,
    pub remote_id: Option<String>,
    pub content: UnitContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub credentials: Option<Credentials>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunTrigger {
    Queue,
    Portal,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Queue => "queue",
            RunTrigger::Portal => "portal",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub unit_id: i64,
    pub work_item_id: Option<i64>,
    pub trigger: String,
    pub status: RunStatus,
    pub remote_id: Option<String>,
    pub url: Option<String>,
    pub output_path: Option<String>,
    pub error: Option<String>,
    pub run_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}
