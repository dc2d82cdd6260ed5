#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use clipcast::db::{self, NewProject, NewUnit, Pool};
use clipcast::encoder::{Assembler, AssemblyOptions, Encoder, EncoderOutput, MediaProbe};
use clipcast::engine::Engine;
use clipcast::error::{CoreError, Result};
use clipcast::model::{Credentials, GeneratedArtifact, UnitContent};
use clipcast::pipeline::Pipeline;
use clipcast::queue::JobQueue;
use clipcast::schedule;
use clipcast::youtube::{Publisher, UploadReceipt, VideoMetadata, Visibility};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, Semaphore};

pub async fn setup_pool() -> Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn ist() -> FixedOffset {
    schedule::parse_utc_offset("+05:30").unwrap()
}

/// Instant at which the +05:30 wall clock shows `h:m:s` on the given day.
pub fn ist_at(y: i32, mo: u32, d: u32, h: u32, m: u32, s: u32) -> DateTime<Utc> {
    schedule::at_local(
        NaiveDate::from_ymd_opt(y, mo, d).unwrap(),
        NaiveTime::from_hms_opt(h, m, s).unwrap(),
        ist(),
    )
    .with_timezone(&Utc)
}

/// Encoder double: writes a placeholder file for every invocation and answers
/// probes from canned values chosen by file type.
#[derive(Clone)]
pub struct FakeEncoder {
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    pub fail_with: Option<(i32, String)>,
    pub break_output: bool,
    pub clip: MediaProbe,
    pub audio: MediaProbe,
    pub output: MediaProbe,
    /// When set, every invocation waits for a permit before producing output.
    pub gate: Option<Arc<Semaphore>>,
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self {
            calls: Arc::default(),
            fail_with: None,
            break_output: false,
            clip: MediaProbe {
                duration: 10.0,
                has_audio: true,
            },
            audio: MediaProbe {
                duration: 30.0,
                has_audio: true,
            },
            output: MediaProbe {
                duration: 30.0,
                has_audio: true,
            },
            gate: None,
        }
    }
}

impl FakeEncoder {
    pub fn failing(status: i32, diagnostics: &str) -> Self {
        Self {
            fail_with: Some((status, diagnostics.to_string())),
            ..Self::default()
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn invoke(&self, args: Vec<OsString>) -> Result<EncoderOutput> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().await.push(args.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if let Some((status, diagnostics)) = &self.fail_with {
            return Ok(EncoderOutput {
                status: Some(*status),
                success: false,
                diagnostics: diagnostics.clone(),
            });
        }
        let output = args.last().expect("output path is the last argument");
        tokio::fs::write(output, b"not really a video").await?;
        Ok(EncoderOutput {
            status: Some(0),
            success: true,
            diagnostics: String::new(),
        })
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe> {
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("output") {
            if self.break_output {
                return Err(CoreError::encoding("moov atom not found"));
            }
            return Ok(self.output);
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("mp3") | Some("wav") | Some("m4a") | Some("aac") => Ok(self.audio),
            _ => Ok(self.clip),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadCall {
    pub title: String,
    pub description: String,
    pub visibility: Visibility,
    pub publish_at: Option<DateTime<Utc>>,
    pub artifact: PathBuf,
    pub cover_image: Option<PathBuf>,
}

#[derive(Clone, Default)]
pub struct FakePublisher {
    responses: Arc<Mutex<VecDeque<Result<UploadReceipt>>>>,
    uploads: Arc<Mutex<Vec<UploadCall>>>,
}

impl FakePublisher {
    pub fn with_responses(responses: Vec<Result<UploadReceipt>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub async fn uploads(&self) -> Vec<UploadCall> {
        self.uploads.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn upload(
        &self,
        _credentials: &Credentials,
        artifact: &GeneratedArtifact,
        metadata: &VideoMetadata,
        visibility: Visibility,
        publish_at: Option<DateTime<Utc>>,
    ) -> Result<UploadReceipt> {
        let mut uploads = self.uploads.lock().await;
        uploads.push(UploadCall {
            title: metadata.title.clone(),
            description: metadata.description.clone(),
            visibility,
            publish_at,
            artifact: artifact.path.clone(),
            cover_image: artifact.cover_image.clone(),
        });
        let n = uploads.len();
        drop(uploads);
        let next = self.responses.lock().await.pop_front();
        next.unwrap_or_else(|| {
            Ok(UploadReceipt {
                remote_id: format!("vid{n}"),
                url: format!("https://www.youtube.com/watch?v=vid{n}"),
                refreshed: None,
            })
        })
    }

    async fn refresh_credentials(&self, refresh_token: &str) -> Result<Credentials> {
        Ok(Credentials {
            access_token: Some("fresh".into()),
            refresh_token: refresh_token.to_string(),
            expires_at: None,
        })
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        access_token: Some("access".into()),
        refresh_token: "refresh".into(),
        expires_at: None,
    }
}

pub async fn seed_project(pool: &Pool) -> i64 {
    db::insert_project(
        pool,
        &NewProject {
            name: "lofi channel".into(),
            credentials: Some(credentials()),
            ..NewProject::default()
        },
    )
    .await
    .unwrap()
}

pub fn content() -> UnitContent {
    UnitContent {
        titles: vec!["Episode {{number}}".into()],
        descriptions: vec!["Beats to study to".into()],
        tags: vec!["lofi".into()],
        clip_files: vec![
            PathBuf::from("/assets/clips/a.mp4"),
            PathBuf::from("/assets/clips/b.mp4"),
            PathBuf::from("/assets/clips/c.mp4"),
        ],
        audio_files: vec![PathBuf::from("/assets/music/bed.mp3")],
        thumbnail_files: vec![PathBuf::from("/assets/thumbs/cover.jpg")],
        ..UnitContent::default()
    }
}

pub async fn seed_unit(pool: &Pool, project_id: i64, name: &str) -> i64 {
    db::insert_unit(pool, &NewUnit::single(project_id, name, content()))
        .await
        .unwrap()
}

pub fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

/// Pipeline, queue and engine wired to fakes over an in-memory store.
pub struct Harness {
    pub pool: Pool,
    pub queue: JobQueue,
    pub engine: Engine,
    pub pipeline: Arc<Pipeline>,
    pub encoder: FakeEncoder,
    pub publisher: FakePublisher,
    pub temp_root: TempDir,
    pub output_dir: TempDir,
}

impl Harness {
    pub async fn new(encoder: FakeEncoder, publisher: FakePublisher) -> Self {
        let pool = setup_pool().await;
        let temp_root = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let shared: Arc<dyn Encoder> = Arc::new(encoder.clone());
        let assembler = Assembler::new(shared.clone(), temp_root.path(), output_dir.path()).unwrap();
        let pipeline = Arc::new(Pipeline::new(
            pool.clone(),
            shared,
            assembler,
            Arc::new(publisher.clone()),
            AssemblyOptions::default(),
            ist(),
        ));
        let queue = JobQueue::new(pool.clone());
        let engine = Engine::new(pool.clone(), queue.clone(), ist());
        Self {
            pool,
            queue,
            engine,
            pipeline,
            encoder,
            publisher,
            temp_root,
            output_dir,
        }
    }
}
