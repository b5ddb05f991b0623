use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use chrono::Utc;
use futures::{TryStream, TryStreamExt};
use mime::Mime;
use tokio::{io::AsyncWriteExt, sync::Semaphore};
use uuid::Uuid;

use crate::{
    data::{ObjectStore, UploadReader, storage_key},
    error::Error,
    media::{VideoProber, VideoTransformer},
    model::VideoRecord,
    store::VideoStore,
    util::format_duration,
    video::assets::{
        TempAsset, VIDEO_MIME, asset_disk_path, media_type_to_ext, thumbnail_media_type_to_ext,
    },
};

pub const MAX_VIDEO_UPLOAD_SIZE: u64 = 1 << 30;
pub const MAX_THUMBNAIL_UPLOAD_SIZE: u64 = 10 << 20;
pub const THUMBNAIL_KEY_PREFIX: &str = "thumbnails";
/// Allowance for multipart boundaries and part headers included in the request `Content-Length`.
/// The exact ceiling applies to the file bytes while streaming.
pub const MULTIPART_FRAMING_SLACK: u64 = 64 << 10;
const TEMP_VIDEO_NAME: &str = "video";

/// A single part of a multipart upload as received from the client.
pub struct UploadPart<S> {
    pub field_name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub body: S,
}

/// Everything an upload needs, built once at startup and shared by all requests.
pub struct UploadPipeline {
    scratch_dir: PathBuf,
    videos: Arc<dyn VideoStore>,
    objects: Arc<dyn ObjectStore>,
    prober: Arc<dyn VideoProber>,
    transformer: Arc<dyn VideoTransformer>,
    transcode_permits: Semaphore,
}

impl UploadPipeline {
    pub fn new(
        scratch_dir: PathBuf,
        videos: Arc<dyn VideoStore>,
        objects: Arc<dyn ObjectStore>,
        prober: Arc<dyn VideoProber>,
        transformer: Arc<dyn VideoTransformer>,
        concurrent_transcode_limit: usize,
    ) -> Self {
        Self {
            scratch_dir,
            videos,
            objects,
            prober,
            transformer,
            transcode_permits: Semaphore::new(concurrent_transcode_limit.max(1)),
        }
    }

    pub async fn get_video(&self, video_id: Uuid) -> Result<VideoRecord, Error> {
        self.videos
            .get_video(video_id)
            .await?
            .ok_or(Error::VideoNotFoundError(video_id))
    }

    async fn load_owned_video(&self, video_id: Uuid, user_id: Uuid) -> Result<VideoRecord, Error> {
        let video = self.get_video(video_id).await?;
        if !video.is_owned_by(user_id) {
            log::info!("User {user_id} tried to modify video {video_id} owned by another user");
            return Err(Error::ForbiddenError);
        }
        Ok(video)
    }

    /// Stores a new video file for the given video.
    ///
    /// `read_part` is only awaited after the caller has been verified as the owner of the video and
    /// the declared size has been checked, so nothing is read from the request body for rejected
    /// uploads. The upload is staged to the scratch dir, probed for its aspect ratio, remuxed for
    /// fast start and uploaded to the object store before the record is updated. Temporary files
    /// are removed on every exit path, including cancellation of the returned future.
    pub async fn upload_video<S>(
        &self,
        video_id: Uuid,
        user_id: Uuid,
        declared_size: Option<u64>,
        read_part: impl Future<Output = Result<UploadPart<S>, Error>>,
    ) -> Result<VideoRecord, Error>
    where
        S: TryStream<Error = io::Error> + Unpin + Send,
        S::Ok: AsRef<[u8]> + Send,
    {
        log::info!("Uploading video {video_id} by user {user_id}");
        let mut video = self.load_owned_video(video_id, user_id).await?;
        check_declared_size(declared_size, MAX_VIDEO_UPLOAD_SIZE)?;

        let part = read_part.await?;
        let media_type = validate_part(&part)?;
        let ext = media_type_to_ext(&media_type)?;

        let start_time = Instant::now();
        let staged = TempAsset::new(asset_disk_path(
            &self.scratch_dir,
            &format!("{}-{TEMP_VIDEO_NAME}{ext}", Uuid::new_v4()),
        ));
        stage_upload(part.body, staged.path(), MAX_VIDEO_UPLOAD_SIZE).await?;

        let aspect_ratio = self.prober.probe_aspect_ratio(staged.path()).await?;

        let processed = {
            log::debug!("Waiting to acquire permit to remux video {video_id}");
            let _permit = self
                .transcode_permits
                .acquire()
                .await
                .map_err(|_| Error::CancellationError)?;
            TempAsset::new(self.transformer.remux_fast_start(staged.path()).await?)
        };

        let key = storage_key(aspect_ratio.as_str(), ext);
        let mut file = tokio::fs::File::open(processed.path()).await.map_err(|e| {
            Error::IoError(format!(
                "Failed to open processed video {}: {e}",
                processed.path().display()
            ))
        })?;
        self.objects.put_object(&key, &mut file, VIDEO_MIME).await?;
        drop(file);
        drop(processed);
        drop(staged);

        video.video_url = Some(self.objects.object_url(&key));
        video.update_timestamp = Utc::now();
        self.persist(&video, &key).await?;

        log::info!(
            "Completed upload of video {video_id} to {key} in {}",
            format_duration(start_time.elapsed())
        );
        Ok(video)
    }

    /// Stores a new thumbnail image for the given video. The image is streamed straight to the
    /// object store without touching the local disk.
    pub async fn upload_thumbnail<S>(
        &self,
        video_id: Uuid,
        user_id: Uuid,
        declared_size: Option<u64>,
        read_part: impl Future<Output = Result<UploadPart<S>, Error>>,
    ) -> Result<VideoRecord, Error>
    where
        S: TryStream<Error = io::Error> + Unpin + Send,
        S::Ok: AsRef<[u8]> + Send,
    {
        log::info!("Uploading thumbnail for video {video_id} by user {user_id}");
        let mut video = self.load_owned_video(video_id, user_id).await?;
        check_declared_size(declared_size, MAX_THUMBNAIL_UPLOAD_SIZE)?;

        let part = read_part.await?;
        let media_type = validate_part(&part)?;
        let ext = thumbnail_media_type_to_ext(&media_type)?;

        let key = storage_key(THUMBNAIL_KEY_PREFIX, ext);
        let mut reader = UploadReader::new(part.body.into_async_read(), MAX_THUMBNAIL_UPLOAD_SIZE);
        let upload_result = self
            .objects
            .put_object(&key, &mut reader, media_type.essence_str())
            .await;
        if reader.limit_exceeded() {
            log::warn!("Aborted thumbnail upload {key} because it exceeded the size limit");
            return Err(Error::UploadTooLargeError(MAX_THUMBNAIL_UPLOAD_SIZE));
        }
        upload_result?;

        video.thumbnail_url = Some(self.objects.object_url(&key));
        video.update_timestamp = Utc::now();
        self.persist(&video, &key).await?;

        Ok(video)
    }

    async fn persist(&self, video: &VideoRecord, key: &str) -> Result<(), Error> {
        self.videos.update_video(video).await.map_err(|e| {
            log::error!(
                "Failed to update video {} after storing object {key}, the object is orphaned: {e}",
                video.id
            );
            Error::PersistError(e.to_string())
        })
    }
}

fn check_declared_size(declared_size: Option<u64>, limit: u64) -> Result<(), Error> {
    match declared_size {
        Some(size) if size > limit + MULTIPART_FRAMING_SLACK => {
            Err(Error::UploadTooLargeError(limit))
        }
        _ => Ok(()),
    }
}

/// Checks that the part is a file and returns its declared media type.
fn validate_part<S>(part: &UploadPart<S>) -> Result<Mime, Error> {
    if part.filename.is_none() {
        return Err(Error::InvalidFileError(format!(
            "Form field '{}' is not a file",
            part.field_name
        )));
    }

    let content_type = part.content_type.as_deref().ok_or_else(|| {
        Error::BadRequestError(format!("Missing content type for '{}'", part.field_name))
    })?;
    content_type
        .parse::<Mime>()
        .map_err(|_| Error::UnsupportedMediaTypeError(content_type.to_string()))
}

/// Writes the upload body to `path`, the caller owns the guard for the file so partially written
/// files are removed on failure.
async fn stage_upload<S>(body: S, path: &Path, limit: u64) -> Result<(), Error>
where
    S: TryStream<Error = io::Error> + Unpin,
    S::Ok: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(path).await.map_err(|e| {
        Error::IoError(format!(
            "Failed to create staging file {}: {e}",
            path.display()
        ))
    })?;

    let mut reader = UploadReader::new(body.into_async_read(), limit);
    match tokio::io::copy(&mut reader, &mut file).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::InvalidInput && reader.limit_exceeded() => {
            log::warn!("Aborted staging {} after exceeding the size limit", path.display());
            return Err(Error::UploadTooLargeError(limit));
        }
        Err(e) => {
            return Err(Error::IoError(format!(
                "Failed to stage upload to {}: {e}",
                path.display()
            )));
        }
    }

    file.flush()
        .await
        .map_err(|e| Error::IoError(format!("Failed to flush {}: {e}", path.display())))?;

    log::debug!(
        "Staged {} bytes to {} (sha256 {})",
        reader.bytes_read(),
        path.display(),
        reader.sha256_hex()
    );
    Ok(())
}
