use super::model::{NewProject, NewRun, NewUnit, ScheduleUpdate};
use crate::error::{CoreError, Result};
use crate::model::{
    Credentials, Project, QueueStats, RunRecord, RunStatus, ScheduleGap, SchedulePolicy,
    SchedulableUnit, UnitContent, UnitKind, UnitStatus, WorkItem, WorkStatus,
};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::PathBuf;
use tracing::instrument;

pub type Pool = SqlitePool;

const F_TITLE: &str = "title";
const F_DESCRIPTION: &str = "description";
const F_TAG: &str = "tag";
const F_CLIP: &str = "clip";
const F_AUDIO: &str = "audio";
const F_THUMBNAIL: &str = "thumbnail";
const F_SLOT_TIME: &str = "slot_time";

const WORK_ITEM_COLUMNS: &str =
    "id, unit_id, status, priority, publish_at, error, created_at, started_at, completed_at";

pub async fn init_pool(database_url: &str) -> anyhow::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{expanded_path}");
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    // sqlx refuses to create a missing file unless asked to.
    if !rebuilt.contains("mode=") {
        rebuilt.push(if query_part.is_some() { '&' } else { '?' });
        rebuilt.push_str("mode=rwc");
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn decode_err(msg: String) -> CoreError {
    CoreError::StoreUnavailable(sqlx::Error::Decode(msg.into()))
}

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| decode_err(format!("bad timestamp '{s}': {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.as_deref()
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| decode_err(format!("bad date '{s}': {e}")))
        })
        .transpose()
}

fn fmt_time(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| decode_err(format!("bad time '{s}': {e}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| decode_err(format!("{column} out of range: {value}")))
}

// ---------------------------------------------------------------------------
// projects

#[instrument(skip_all)]
pub async fn insert_project(pool: &Pool, project: &NewProject) -> Result<i64> {
    let creds = project.credentials.as_ref();
    let rec = sqlx::query(
        "INSERT INTO projects (name, channel_id, channel_name, refresh_token, access_token, token_expiry) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(&project.name)
    .bind(&project.channel_id)
    .bind(&project.channel_name)
    .bind(creds.map(|c| c.refresh_token.clone()))
    .bind(creds.and_then(|c| c.access_token.clone()))
    .bind(creds.and_then(|c| c.expires_at).map(fmt_ts))
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn get_project(pool: &Pool, id: i64) -> Result<Project> {
    let row = sqlx::query(
        "SELECT id, name, channel_id, channel_name, refresh_token, access_token, token_expiry, is_active \
         FROM projects WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| CoreError::NotFound(format!("project {id}")))?;

    let refresh_token: Option<String> = row.get("refresh_token");
    let credentials = match refresh_token {
        Some(refresh_token) if !refresh_token.is_empty() => Some(Credentials {
            access_token: row.get("access_token"),
            refresh_token,
            expires_at: parse_opt_ts(row.get("token_expiry"))?,
        }),
        _ => None,
    };
    Ok(Project {
        id: row.get("id"),
        name: row.get("name"),
        channel_id: row.get("channel_id"),
        channel_name: row.get("channel_name"),
        credentials,
        is_active: row.get::<i64, _>("is_active") != 0,
    })
}

#[instrument(skip_all)]
pub async fn update_project_credentials(pool: &Pool, id: i64, creds: &Credentials) -> Result<()> {
    sqlx::query(
        "UPDATE projects SET refresh_token = ?, access_token = ?, token_expiry = ?, \
         updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(&creds.refresh_token)
    .bind(&creds.access_token)
    .bind(creds.expires_at.map(fmt_ts))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_project_active(pool: &Pool, id: i64, active: bool) -> Result<()> {
    sqlx::query("UPDATE projects SET is_active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?")
        .bind(active as i64)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// units

async fn insert_list_tx<I>(
    tx: &mut Transaction<'_, Sqlite>,
    unit_id: i64,
    field: &str,
    values: I,
) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    for (position, value) in values.into_iter().enumerate() {
        sqlx::query("INSERT INTO unit_lists (unit_id, field, position, value) VALUES (?, ?, ?, ?)")
            .bind(unit_id)
            .bind(field)
            .bind(position as i64)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn path_strings(paths: &[PathBuf]) -> impl Iterator<Item = String> + '_ {
    paths.iter().map(|p| p.to_string_lossy().into_owned())
}

#[instrument(skip_all)]
pub async fn insert_unit(pool: &Pool, unit: &NewUnit) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let content = &unit.content;
    let folder = |p: &Option<PathBuf>| p.as_ref().map(|p| p.to_string_lossy().into_owned());
    let unit_id: i64 = sqlx::query(
        "INSERT INTO units (project_id, kind, name, clips_folder, audio_folder, thumbnails_folder, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(unit.project_id)
    .bind(unit.kind.as_str())
    .bind(&unit.name)
    .bind(folder(&content.clips_folder))
    .bind(folder(&content.audio_folder))
    .bind(folder(&content.thumbnails_folder))
    .bind(unit.status.as_str())
    .fetch_one(&mut *tx)
    .await?
    .get("id");

    insert_list_tx(&mut tx, unit_id, F_TITLE, content.titles.iter().cloned()).await?;
    insert_list_tx(&mut tx, unit_id, F_DESCRIPTION, content.descriptions.iter().cloned()).await?;
    insert_list_tx(&mut tx, unit_id, F_TAG, content.tags.iter().cloned()).await?;
    insert_list_tx(&mut tx, unit_id, F_CLIP, path_strings(&content.clip_files)).await?;
    insert_list_tx(&mut tx, unit_id, F_AUDIO, path_strings(&content.audio_files)).await?;
    insert_list_tx(&mut tx, unit_id, F_THUMBNAIL, path_strings(&content.thumbnail_files)).await?;
    for (position, member_id) in content.members.iter().enumerate() {
        sqlx::query("INSERT INTO unit_members (unit_id, position, member_id) VALUES (?, ?, ?)")
            .bind(unit_id)
            .bind(position as i64)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(unit_id)
}

fn unit_from_row(row: &SqliteRow) -> Result<SchedulableUnit> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let policy: Option<String> = row.get("policy");
    let gap: Option<String> = row.get("gap");
    let publish_time: Option<String> = row.get("publish_time");
    let total_videos: Option<i64> = row.get("total_videos");
    let folder = |column: &str| row.get::<Option<String>, _>(column).map(PathBuf::from);

    Ok(SchedulableUnit {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: UnitKind::parse(&kind).ok_or_else(|| decode_err(format!("unknown unit kind '{kind}'")))?,
        name: row.get("name"),
        policy: policy
            .map(|p| SchedulePolicy::parse(&p).ok_or_else(|| decode_err(format!("unknown policy '{p}'"))))
            .transpose()?,
        publish_time: publish_time.as_deref().map(parse_time).transpose()?,
        gap: gap
            .map(|g| ScheduleGap::parse(&g).ok_or_else(|| decode_err(format!("unknown gap '{g}'"))))
            .transpose()?,
        videos_per_day: to_u32(row.get("videos_per_day"), "videos_per_day")?,
        total_videos: total_videos.map(|t| to_u32(t, "total_videos")).transpose()?,
        slot_times: Vec::new(),
        start_date: parse_opt_date(row.get("start_date"))?,
        end_date: parse_opt_date(row.get("end_date"))?,
        last_run_date: parse_opt_date(row.get("last_run_date"))?,
        last_attempt_date: parse_opt_date(row.get("last_attempt_date"))?,
        status: UnitStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("unknown unit status '{status}'")))?,
        remote_id: row.get("remote_id"),
        content: UnitContent {
            clips_folder: folder("clips_folder"),
            audio_folder: folder("audio_folder"),
            thumbnails_folder: folder("thumbnails_folder"),
            ..UnitContent::default()
        },
    })
}

async fn load_unit_lists(pool: &Pool, unit: &mut SchedulableUnit) -> Result<()> {
    let rows = sqlx::query(
        "SELECT field, value FROM unit_lists WHERE unit_id = ? ORDER BY field, position",
    )
    .bind(unit.id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        let field: String = row.get("field");
        let value: String = row.get("value");
        let content = &mut unit.content;
        match field.as_str() {
            F_TITLE => content.titles.push(value),
            F_DESCRIPTION => content.descriptions.push(value),
            F_TAG => content.tags.push(value),
            F_CLIP => content.clip_files.push(PathBuf::from(value)),
            F_AUDIO => content.audio_files.push(PathBuf::from(value)),
            F_THUMBNAIL => content.thumbnail_files.push(PathBuf::from(value)),
            F_SLOT_TIME => unit.slot_times.push(parse_time(&value)?),
            other => return Err(decode_err(format!("unknown unit list field '{other}'"))),
        }
    }
    unit.content.members = sqlx::query_scalar(
        "SELECT member_id FROM unit_members WHERE unit_id = ? ORDER BY position",
    )
    .bind(unit.id)
    .fetch_all(pool)
    .await?;
    Ok(())
}

const UNIT_COLUMNS: &str = "u.id, u.project_id, u.kind, u.name, u.clips_folder, u.audio_folder, \
     u.thumbnails_folder, u.status, u.policy, u.publish_time, u.gap, u.videos_per_day, \
     u.total_videos, u.start_date, u.end_date, u.last_run_date, u.last_attempt_date, u.remote_id";

#[instrument(skip_all)]
pub async fn get_unit(pool: &Pool, id: i64) -> Result<SchedulableUnit> {
    let row = sqlx::query(&format!("SELECT {UNIT_COLUMNS} FROM units u WHERE u.id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("unit {id}")))?;
    let mut unit = unit_from_row(&row)?;
    load_unit_lists(pool, &mut unit).await?;
    Ok(unit)
}

/// Units with the given policy and status whose project is active and holds
/// credentials.
#[instrument(skip_all)]
pub async fn list_schedulable_units(
    pool: &Pool,
    policy: SchedulePolicy,
    status: UnitStatus,
) -> Result<Vec<SchedulableUnit>> {
    let rows = sqlx::query(&format!(
        "SELECT {UNIT_COLUMNS} FROM units u JOIN projects p ON p.id = u.project_id \
         WHERE u.policy = ? AND u.status = ? AND p.is_active = 1 \
         AND p.refresh_token IS NOT NULL AND p.refresh_token <> '' ORDER BY u.id"
    ))
    .bind(policy.as_str())
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    let mut units = Vec::with_capacity(rows.len());
    for row in rows {
        let mut unit = unit_from_row(&row)?;
        load_unit_lists(pool, &mut unit).await?;
        units.push(unit);
    }
    Ok(units)
}

#[instrument(skip_all)]
pub async fn update_unit_schedule(pool: &Pool, id: i64, update: &ScheduleUpdate) -> Result<()> {
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE units SET policy = ?, status = ?, publish_time = ?, gap = ?, videos_per_day = ?, \
         total_videos = ?, start_date = ?, end_date = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(update.policy.as_str())
    .bind(update.status.as_str())
    .bind(update.publish_time.map(fmt_time))
    .bind(update.gap.map(|g| g.as_str()))
    .bind(update.videos_per_day as i64)
    .bind(update.total_videos.map(|t| t as i64))
    .bind(update.start_date.map(fmt_date))
    .bind(update.end_date.map(fmt_date))
    .bind(id)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() == 0 {
        return Err(CoreError::NotFound(format!("unit {id}")));
    }
    sqlx::query("DELETE FROM unit_lists WHERE unit_id = ? AND field = ?")
        .bind(id)
        .bind(F_SLOT_TIME)
        .execute(&mut *tx)
        .await?;
    insert_list_tx(&mut tx, id, F_SLOT_TIME, update.slot_times.iter().map(|t| fmt_time(*t))).await?;
    tx.commit().await?;
    Ok(())
}

/// Claim today's portal attempt. Returns false if the unit was already
/// attempted today.
#[instrument(skip_all)]
pub async fn claim_unit_attempt(pool: &Pool, id: i64, today: NaiveDate) -> Result<bool> {
    let today = fmt_date(today);
    let res = sqlx::query(
        "UPDATE units SET last_attempt_date = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND (last_attempt_date IS NULL OR last_attempt_date <> ?)",
    )
    .bind(&today)
    .bind(id)
    .bind(&today)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Claim today's daily enqueue and insert one item per entry of `publish_at`
/// in the same transaction. Returns `None` if the claim was already taken
/// today; an insert failure leaves neither the claim nor any item behind.
#[instrument(skip_all, fields(unit_id = id))]
pub async fn claim_and_enqueue_day(
    pool: &Pool,
    id: i64,
    today: NaiveDate,
    priority: i64,
    publish_at: &[Option<DateTime<Utc>>],
    now: DateTime<Utc>,
) -> Result<Option<Vec<i64>>> {
    let today = fmt_date(today);
    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "UPDATE units SET last_enqueue_date = ?, updated_at = CURRENT_TIMESTAMP \
         WHERE id = ? AND (last_enqueue_date IS NULL OR last_enqueue_date <> ?)",
    )
    .bind(&today)
    .bind(id)
    .bind(&today)
    .execute(&mut *tx)
    .await?;
    if res.rows_affected() != 1 {
        return Ok(None);
    }
    let mut ids = Vec::with_capacity(publish_at.len());
    for at in publish_at {
        ids.push(enqueue_work_item_tx(&mut tx, id, priority, *at, now).await?);
    }
    tx.commit().await?;
    Ok(Some(ids))
}

/// Record a successful run on the unit. `status` is only changed when given.
#[instrument(skip_all)]
pub async fn mark_unit_run(
    pool: &Pool,
    id: i64,
    run_date: NaiveDate,
    remote_id: Option<&str>,
    status: Option<UnitStatus>,
) -> Result<()> {
    sqlx::query(
        "UPDATE units SET last_run_date = ?, remote_id = COALESCE(?, remote_id), \
         status = COALESCE(?, status), updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(fmt_date(run_date))
    .bind(remote_id)
    .bind(status.map(|s| s.as_str()))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// work items

fn work_item_from_row(row: &SqliteRow) -> Result<WorkItem> {
    let status: String = row.get("status");
    let created_at: String = row.get("created_at");
    Ok(WorkItem {
        id: row.get("id"),
        unit_id: row.get("unit_id"),
        status: WorkStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("unknown work status '{status}'")))?,
        priority: row.get("priority"),
        publish_at: parse_opt_ts(row.get("publish_at"))?,
        error: row.get("error"),
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(row.get("started_at"))?,
        completed_at: parse_opt_ts(row.get("completed_at"))?,
    })
}

async fn enqueue_work_item_tx(
    tx: &mut Transaction<'_, Sqlite>,
    unit_id: i64,
    priority: i64,
    publish_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO work_items (unit_id, status, priority, publish_at, created_at) \
         VALUES (?, 'pending', ?, ?, ?) RETURNING id",
    )
    .bind(unit_id)
    .bind(priority)
    .bind(publish_at.map(fmt_ts))
    .bind(fmt_ts(now))
    .fetch_one(&mut **tx)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn enqueue_work_item(
    pool: &Pool,
    unit_id: i64,
    priority: i64,
    publish_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = enqueue_work_item_tx(&mut tx, unit_id, priority, publish_at, now).await?;
    tx.commit().await?;
    Ok(id)
}

/// Enqueue one item per entry of `publish_at`, all or nothing.
#[instrument(skip_all)]
pub async fn enqueue_work_items(
    pool: &Pool,
    unit_id: i64,
    priority: i64,
    publish_at: &[Option<DateTime<Utc>>],
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    let mut tx = pool.begin().await?;
    let mut ids = Vec::with_capacity(publish_at.len());
    for at in publish_at {
        ids.push(enqueue_work_item_tx(&mut tx, unit_id, priority, *at, now).await?);
    }
    tx.commit().await?;
    Ok(ids)
}

/// Atomically flip the best pending item to `processing` and return it.
#[instrument(skip_all)]
pub async fn claim_next_work_item(pool: &Pool, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
    let row = sqlx::query(&format!(
        "UPDATE work_items SET status = 'processing', started_at = ? \
         WHERE id = (SELECT id FROM work_items WHERE status = 'pending' \
                     ORDER BY priority DESC, id ASC LIMIT 1) \
         AND status = 'pending' RETURNING {WORK_ITEM_COLUMNS}"
    ))
    .bind(fmt_ts(now))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(work_item_from_row).transpose()
}

/// Move a `processing` item to a terminal status. Returns false if the item
/// was not in `processing`.
#[instrument(skip_all)]
pub async fn finish_work_item(
    pool: &Pool,
    id: i64,
    status: WorkStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    debug_assert!(status.is_terminal());
    let res = sqlx::query(
        "UPDATE work_items SET status = ?, error = ?, completed_at = ? \
         WHERE id = ? AND status = 'processing'",
    )
    .bind(status.as_str())
    .bind(error)
    .bind(fmt_ts(now))
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn get_work_item(pool: &Pool, id: i64) -> Result<WorkItem> {
    let row = sqlx::query(&format!("SELECT {WORK_ITEM_COLUMNS} FROM work_items WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("work item {id}")))?;
    work_item_from_row(&row)
}

/// Fail every item still marked `processing`; used at startup when no claim
/// can be live.
#[instrument(skip_all)]
pub async fn fail_stale_processing(pool: &Pool, message: &str, now: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query(
        "UPDATE work_items SET status = 'failed', error = ?, completed_at = ? \
         WHERE status = 'processing'",
    )
    .bind(message)
    .bind(fmt_ts(now))
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

#[instrument(skip_all)]
pub async fn queue_stats(pool: &Pool) -> Result<QueueStats> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS total, \
         COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending, \
         COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0) AS processing, \
         COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed, \
         COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed \
         FROM work_items",
    )
    .fetch_one(pool)
    .await?;
    Ok(QueueStats {
        total: row.get("total"),
        pending: row.get("pending"),
        processing: row.get("processing"),
        completed: row.get("completed"),
        failed: row.get("failed"),
    })
}

// ---------------------------------------------------------------------------
// runs

#[instrument(skip_all)]
pub async fn insert_run(pool: &Pool, run: &NewRun) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO runs (unit_id, work_item_id, trigger_kind, status, remote_id, url, \
         output_path, error, run_date, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(run.unit_id)
    .bind(run.work_item_id)
    .bind(run.trigger.as_str())
    .bind(run.status.as_str())
    .bind(&run.remote_id)
    .bind(&run.url)
    .bind(&run.output_path)
    .bind(&run.error)
    .bind(fmt_date(run.run_date))
    .bind(fmt_ts(run.created_at))
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn count_successful_runs_on(pool: &Pool, unit_id: i64, date: NaiveDate) -> Result<u32> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM runs WHERE unit_id = ? AND run_date = ? AND status = 'success'",
    )
    .bind(unit_id)
    .bind(fmt_date(date))
    .fetch_one(pool)
    .await?;
    to_u32(count, "run count")
}

#[instrument(skip_all)]
pub async fn count_runs(pool: &Pool, unit_id: i64, status: Option<RunStatus>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM runs WHERE unit_id = ? AND (? IS NULL OR status = ?)",
    )
    .bind(unit_id)
    .bind(status.map(|s| s.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[instrument(skip_all)]
pub async fn list_runs(pool: &Pool, unit_id: i64) -> Result<Vec<RunRecord>> {
    let rows = sqlx::query(
        "SELECT id, unit_id, work_item_id, trigger_kind, status, remote_id, url, output_path, \
         error, run_date, created_at FROM runs WHERE unit_id = ? ORDER BY id",
    )
    .bind(unit_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let status: String = row.get("status");
            let created_at: String = row.get("created_at");
            Ok(RunRecord {
                id: row.get("id"),
                unit_id: row.get("unit_id"),
                work_item_id: row.get("work_item_id"),
                trigger: row.get("trigger_kind"),
                status: RunStatus::parse(&status)
                    .ok_or_else(|| decode_err(format!("unknown run status '{status}'")))?,
                remote_id: row.get("remote_id"),
                url: row.get("url"),
                output_path: row.get("output_path"),
                error: row.get("error"),
                run_date: parse_opt_date(row.get("run_date"))?
                    .ok_or_else(|| decode_err("run without date".into()))?,
                created_at: parse_ts(&created_at)?,
            })
        })
        .collect()
}
