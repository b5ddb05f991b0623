//! In-memory collaborators for exercising the upload pipeline without postgres, S3 or ffmpeg.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::{
    data::{
        ObjectStore,
        s3utils::{BucketLocation, object_url},
    },
    error::Error,
    media::{AspectRatio, VideoProber, VideoTransformer, faststart::processed_path_for},
    model::VideoRecord,
    store::VideoStore,
    video::upload::UploadPipeline,
};

pub const TEST_BUCKET: &str = "videobroker-test";
pub const TEST_REGION: &str = "us-east-1";
/// Prefix the fake transformer writes in front of the input bytes.
pub const FAST_START_MARKER: &[u8] = b"moov:";

pub fn video_record(owner_id: Uuid) -> VideoRecord {
    VideoRecord {
        id: Uuid::new_v4(),
        owner_id,
        title: String::from("Boots on the ground"),
        description: Some(String::from("test video")),
        thumbnail_url: None,
        video_url: None,
        creation_timestamp: Utc::now(),
        update_timestamp: Utc::now(),
    }
}

#[derive(Default)]
pub struct MemoryVideoStore {
    videos: Mutex<HashMap<Uuid, VideoRecord>>,
    pub fail_updates: AtomicBool,
    pub update_count: AtomicUsize,
}

impl MemoryVideoStore {
    pub fn insert(&self, video: VideoRecord) {
        self.videos.lock().insert(video.id, video);
    }

    pub fn video(&self, id: Uuid) -> Option<VideoRecord> {
        self.videos.lock().get(&id).cloned()
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get_video(&self, id: Uuid) -> Result<Option<VideoRecord>, Error> {
        Ok(self.video(id))
    }

    async fn update_video(&self, video: &VideoRecord) -> Result<(), Error> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::QueryError(String::from("connection reset")));
        }
        self.update_count.fetch_add(1, Ordering::SeqCst);
        match self.videos.lock().get_mut(&video.id) {
            Some(stored) => {
                *stored = video.clone();
                Ok(())
            }
            None => Err(Error::VideoNotFoundError(video.id)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    pub fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn objects(&self) -> HashMap<String, StoredObject> {
        self.objects.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
    ) -> Result<(), Error> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Error::S3ResponseError(503));
        }

        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        object_url(
            TEST_BUCKET,
            &BucketLocation::Aws {
                region: String::from(TEST_REGION),
            },
            key,
        )
    }
}

/// Prober returning a fixed result, `None` simulates an unreadable file.
pub struct StubProber {
    aspect_ratio: Option<AspectRatio>,
    pub probed_paths: Mutex<Vec<PathBuf>>,
}

impl StubProber {
    pub fn new(aspect_ratio: Option<AspectRatio>) -> Self {
        Self {
            aspect_ratio,
            probed_paths: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VideoProber for StubProber {
    async fn probe_aspect_ratio(&self, path: &Path) -> Result<AspectRatio, Error> {
        assert!(path.exists(), "probed file must be staged");
        self.probed_paths.lock().push(path.to_path_buf());
        self.aspect_ratio
            .ok_or_else(|| Error::ProbeError(String::from("moov atom not found")))
    }
}

/// Transformer that writes the input prefixed with [`FAST_START_MARKER`] to the processed path.
#[derive(Default)]
pub struct StubTransformer {
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StubTransformer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VideoTransformer for StubTransformer {
    async fn remux_fast_start(&self, input: &Path) -> Result<PathBuf, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::TranscodeError(String::from("Invalid data found when processing input")));
        }

        let mut bytes = FAST_START_MARKER.to_vec();
        bytes.extend(
            tokio::fs::read(input)
                .await
                .map_err(|e| Error::TranscodeError(e.to_string()))?,
        );
        let output = processed_path_for(input);
        tokio::fs::write(&output, bytes)
            .await
            .map_err(|e| Error::TranscodeError(e.to_string()))?;
        Ok(output)
    }
}

pub struct TestPipeline {
    pub pipeline: Arc<UploadPipeline>,
    pub videos: Arc<MemoryVideoStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub prober: Arc<StubProber>,
    pub transformer: Arc<StubTransformer>,
    pub scratch_dir: tempfile::TempDir,
}

impl TestPipeline {
    pub fn new(aspect_ratio: Option<AspectRatio>, transformer: StubTransformer) -> Self {
        let scratch_dir = tempfile::tempdir().expect("failed to create scratch dir");
        let videos = Arc::new(MemoryVideoStore::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let prober = Arc::new(StubProber::new(aspect_ratio));
        let transformer = Arc::new(transformer);
        let pipeline = Arc::new(UploadPipeline::new(
            scratch_dir.path().to_path_buf(),
            videos.clone(),
            objects.clone(),
            prober.clone(),
            transformer.clone(),
            2,
        ));

        Self {
            pipeline,
            videos,
            objects,
            prober,
            transformer,
            scratch_dir,
        }
    }

    pub fn landscape() -> Self {
        Self::new(Some(AspectRatio::Landscape), StubTransformer::default())
    }

    /// Number of files currently in the scratch dir.
    pub fn scratch_file_count(&self) -> usize {
        std::fs::read_dir(self.scratch_dir.path())
            .expect("failed to read scratch dir")
            .count()
    }
}
