//! Unit to published video: asset pools, selection, assembly, upload and the
//! bookkeeping that follows.
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::db::{self, NewRun, Pool};
use crate::encoder::{AssemblyOptions, Assembler, Encoder};
use crate::error::{CoreError, Result};
use crate::media::{self, AUDIO_EXTENSIONS, CLIP_EXTENSIONS, IMAGE_EXTENSIONS};
use crate::model::{
    GeneratedArtifact, MediaSegment, RunStatus, RunTrigger, SchedulableUnit, SchedulePolicy,
    UnitContent, UnitKind, UnitStatus, WorkItem,
};
use crate::queue::WorkRunner;
use crate::selector;
use crate::youtube::{Publisher, UploadReceipt, VideoMetadata, Visibility};

pub const DEFAULT_TITLE: &str = "Untitled Video";

static NUMBER_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*number\s*\}\}").expect("valid placeholder pattern"));

/// Replace every `{{number}}` in `template` with `n`.
pub fn apply_number(template: &str, n: i64) -> String {
    NUMBER_PLACEHOLDER
        .replace_all(template, n.to_string().as_str())
        .into_owned()
}

fn choose_text<'a, R>(values: &'a [String], rng: &mut R) -> Option<&'a str>
where
    R: Rng + ?Sized,
{
    let candidates: Vec<&str> = values
        .iter()
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .collect();
    candidates.choose(rng).copied()
}

/// Random title and description from the unit's lists, numbered with `run_number`.
pub fn build_metadata<R>(content: &UnitContent, run_number: i64, rng: &mut R) -> VideoMetadata
where
    R: Rng + ?Sized,
{
    let title = choose_text(&content.titles, rng).unwrap_or(DEFAULT_TITLE);
    let description = choose_text(&content.descriptions, rng).unwrap_or("");
    VideoMetadata {
        title: apply_number(title, run_number),
        description: apply_number(description, run_number),
        tags: content.tags.clone(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PublishRequest {
    /// Scheduled publication instant; `None` publishes immediately.
    pub publish_at: Option<DateTime<Utc>>,
    pub trigger: RunTrigger,
    pub work_item_id: Option<i64>,
}

pub struct Pipeline {
    pool: Pool,
    encoder: Arc<dyn Encoder>,
    assembler: Assembler,
    publisher: Arc<dyn Publisher>,
    options: AssemblyOptions,
    offset: FixedOffset,
    probe_concurrency: usize,
}

impl Pipeline {
    pub fn new(
        pool: Pool,
        encoder: Arc<dyn Encoder>,
        assembler: Assembler,
        publisher: Arc<dyn Publisher>,
        options: AssemblyOptions,
        offset: FixedOffset,
    ) -> Self {
        Self {
            pool,
            encoder,
            assembler,
            publisher,
            options,
            offset,
            probe_concurrency: 4,
        }
    }

    pub fn with_probe_concurrency(mut self, n: usize) -> Self {
        self.probe_concurrency = n.max(1);
        self
    }

    /// Generate and publish one video for `unit`, then record the run.
    /// A failure is recorded as a failed run and returned; the unit's status
    /// is left untouched.
    #[instrument(skip_all, fields(unit_id = unit.id, trigger = request.trigger.as_str()))]
    pub async fn run(&self, unit: &SchedulableUnit, request: PublishRequest) -> Result<UploadReceipt> {
        let today = Utc::now().with_timezone(&self.offset).date_naive();
        match self.generate_and_publish(unit, &request).await {
            Ok((receipt, artifact)) => {
                self.record_success(unit, &request, &receipt, &artifact, today)
                    .await;
                info!(unit_id = unit.id, remote_id = %receipt.remote_id, url = %receipt.url, "unit published");
                Ok(receipt)
            }
            Err(err) => {
                warn!(unit_id = unit.id, %err, "unit run failed");
                let run = NewRun {
                    unit_id: unit.id,
                    work_item_id: request.work_item_id,
                    trigger: request.trigger,
                    status: RunStatus::Failed,
                    remote_id: None,
                    url: None,
                    output_path: None,
                    error: Some(err.to_string()),
                    run_date: today,
                    created_at: Utc::now(),
                };
                if let Err(record_err) = db::insert_run(&self.pool, &run).await {
                    error!(unit_id = unit.id, %record_err, "failed to record failed run");
                }
                Err(err)
            }
        }
    }

    async fn generate_and_publish(
        &self,
        unit: &SchedulableUnit,
        request: &PublishRequest,
    ) -> Result<(UploadReceipt, GeneratedArtifact)> {
        let project = db::get_project(&self.pool, unit.project_id).await?;
        let credentials = project.credentials.clone().ok_or_else(|| {
            CoreError::CredentialsInvalid(format!(
                "project {} has no channel credentials",
                project.id
            ))
        })?;

        let artifact = self.generate(unit).await?;

        let run_number = db::count_runs(&self.pool, unit.id, Some(RunStatus::Success)).await? + 1;
        let metadata = build_metadata(&unit.content, run_number, &mut rand::rng());
        let visibility = if request.publish_at.is_some() {
            Visibility::Private
        } else {
            Visibility::Public
        };
        let receipt = self
            .publisher
            .upload(&credentials, &artifact, &metadata, visibility, request.publish_at)
            .await?;
        Ok((receipt, artifact))
    }

    /// The video is already live at this point, so a bookkeeping failure is
    /// logged and never turns the run into a failure.
    async fn record_success(
        &self,
        unit: &SchedulableUnit,
        request: &PublishRequest,
        receipt: &UploadReceipt,
        artifact: &GeneratedArtifact,
        today: chrono::NaiveDate,
    ) {
        let new_status =
            (unit.policy == Some(SchedulePolicy::Instant)).then_some(UnitStatus::Published);
        if let Err(err) = db::mark_unit_run(
            &self.pool,
            unit.id,
            today,
            Some(receipt.remote_id.as_str()),
            new_status,
        )
        .await
        {
            error!(unit_id = unit.id, remote_id = %receipt.remote_id, %err, "failed to mark unit as run");
        }
        let run = NewRun {
            unit_id: unit.id,
            work_item_id: request.work_item_id,
            trigger: request.trigger,
            status: RunStatus::Success,
            remote_id: Some(receipt.remote_id.clone()),
            url: Some(receipt.url.clone()),
            output_path: Some(artifact.path.to_string_lossy().into_owned()),
            error: None,
            run_date: today,
            created_at: Utc::now(),
        };
        if let Err(err) = db::insert_run(&self.pool, &run).await {
            error!(unit_id = unit.id, remote_id = %receipt.remote_id, %err, "failed to record successful run");
        }
        if let Some(fresh) = &receipt.refreshed {
            if let Err(err) = db::update_project_credentials(&self.pool, unit.project_id, fresh).await {
                error!(project_id = unit.project_id, %err, "failed to store refreshed credentials");
            }
        }
    }

    pub async fn generate(&self, unit: &SchedulableUnit) -> Result<GeneratedArtifact> {
        match unit.kind {
            UnitKind::Single => self.generate_single(unit).await,
            UnitKind::Merged => self.generate_merged(unit).await,
        }
    }

    #[instrument(skip_all, fields(unit_id = unit.id))]
    async fn generate_single(&self, unit: &SchedulableUnit) -> Result<GeneratedArtifact> {
        let content = &unit.content;

        let audio_files = media::resolve_files(
            &content.audio_files,
            content.audio_folder.as_deref(),
            AUDIO_EXTENSIONS,
        )
        .await?;
        let audio_path = media::pick(&audio_files, &mut rand::rng())
            .cloned()
            .ok_or_else(|| {
                CoreError::EmptyPool(format!("unit {} has no background audio", unit.id))
            })?;
        let audio_probe = self.encoder.probe(&audio_path).await?;
        let audio = MediaSegment::new(audio_path, audio_probe.duration, audio_probe.has_audio);

        let clip_files = media::resolve_files(
            &content.clip_files,
            content.clips_folder.as_deref(),
            CLIP_EXTENSIONS,
        )
        .await?;
        if clip_files.is_empty() {
            return Err(CoreError::EmptyPool(format!("unit {} has no clips", unit.id)));
        }
        let clip_pool =
            media::probe_pool(self.encoder.as_ref(), clip_files, self.probe_concurrency).await;
        let selection = selector::select(&clip_pool, audio.duration, &mut rand::rng())?;
        info!(
            unit_id = unit.id,
            segments = selection.segments.len(),
            passes = selection.passes,
            target = audio.duration,
            "clips selected"
        );

        let cover = self.pick_cover(content).await?;
        self.assembler
            .assemble(&selection, &audio, cover.as_deref(), &self.options)
            .await
    }

    async fn pick_cover(&self, content: &UnitContent) -> Result<Option<std::path::PathBuf>> {
        let images = media::resolve_files(
            &content.thumbnail_files,
            content.thumbnails_folder.as_deref(),
            IMAGE_EXTENSIONS,
        )
        .await?;
        Ok(media::pick(&images, &mut rand::rng()).cloned())
    }

    async fn generate_parts(
        &self,
        unit: &SchedulableUnit,
        parts: &mut Vec<GeneratedArtifact>,
    ) -> Result<()> {
        for member_id in &unit.content.members {
            let member = db::get_unit(&self.pool, *member_id).await?;
            if member.kind == UnitKind::Merged {
                return Err(CoreError::Configuration(format!(
                    "merged unit {} contains merged unit {}",
                    unit.id, member.id
                )));
            }
            parts.push(self.generate_single(&member).await?);
        }
        Ok(())
    }

    #[instrument(skip_all, fields(unit_id = unit.id, members = unit.content.members.len()))]
    async fn generate_merged(&self, unit: &SchedulableUnit) -> Result<GeneratedArtifact> {
        if unit.content.members.is_empty() {
            return Err(CoreError::EmptyPool(format!(
                "merged unit {} has no members",
                unit.id
            )));
        }
        let mut parts = Vec::with_capacity(unit.content.members.len());
        let generated = self.generate_parts(unit, &mut parts).await;
        let merged = match generated {
            Ok(()) => self.assembler.concat(&parts).await,
            Err(err) => Err(err),
        };
        self.assembler.discard(&parts).await;

        let mut merged = merged?;
        if let Some(cover) = self.pick_cover(&unit.content).await? {
            merged.cover_image = Some(cover);
        }
        Ok(merged)
    }
}

#[async_trait]
impl WorkRunner for Pipeline {
    async fn run_item(&self, item: &WorkItem) -> Result<()> {
        let unit = db::get_unit(&self.pool, item.unit_id).await?;
        // A slot that already went by is published right away.
        let publish_at = item.publish_at.filter(|at| *at > Utc::now());
        self.run(
            &unit,
            PublishRequest {
                publish_at,
                trigger: RunTrigger::Queue,
                work_item_id: Some(item.id),
            },
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn number_placeholder_is_replaced() {
        assert_eq!(apply_number("Rain #{{number}}", 4), "Rain #4");
        assert_eq!(apply_number("{{ number }} / {{number}}", 12), "12 / 12");
        assert_eq!(apply_number("no placeholder", 1), "no placeholder");
    }

    #[test]
    fn metadata_defaults_when_lists_are_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        let meta = build_metadata(&UnitContent::default(), 1, &mut rng);
        assert_eq!(meta.title, DEFAULT_TITLE);
        assert_eq!(meta.description, "");
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn metadata_skips_blank_entries() {
        let content = UnitContent {
            titles: vec!["  ".into(), "Night drive {{number}}".into()],
            descriptions: vec!["".into()],
            tags: vec!["synthwave".into()],
            ..UnitContent::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let meta = build_metadata(&content, 7, &mut rng);
        assert_eq!(meta.title, "Night drive 7");
        assert_eq!(meta.description, "");
        assert_eq!(meta.tags, vec!["synthwave".to_string()]);
    }
}
