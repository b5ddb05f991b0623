use std::{io, sync::Arc};

use bytes::{Buf, Bytes};
use futures::{Stream, TryStreamExt};
use mime::Mime;
use mpart_async::server::MultipartStream;
use uuid::Uuid;
use warp::{Filter, Rejection, Reply};

use crate::{error::Error, video::upload::UploadPart};

pub mod assets;
pub mod upload;

pub use upload::UploadPipeline;

/// Form field carrying the video file.
pub const VIDEO_FIELD: &str = "video";
/// Form field carrying the thumbnail image.
pub const THUMBNAIL_FIELD: &str = "thumbnail";

pub fn with_pipeline(
    pipeline: Arc<UploadPipeline>,
) -> impl Filter<Extract = (Arc<UploadPipeline>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || pipeline.clone())
}

pub async fn upload_video_handler(
    video_id: Uuid,
    user_id: Uuid,
    mime: Mime,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf + Send, warp::Error>> + Unpin + Send,
    pipeline: Arc<UploadPipeline>,
) -> Result<impl Reply, Rejection> {
    let video = pipeline
        .upload_video(
            video_id,
            user_id,
            content_length,
            read_file_field(mime, body, VIDEO_FIELD),
        )
        .await?;

    Ok(warp::reply::json(&video))
}

pub async fn upload_thumbnail_handler(
    video_id: Uuid,
    user_id: Uuid,
    mime: Mime,
    content_length: Option<u64>,
    body: impl Stream<Item = Result<impl Buf + Send, warp::Error>> + Unpin + Send,
    pipeline: Arc<UploadPipeline>,
) -> Result<impl Reply, Rejection> {
    let video = pipeline
        .upload_thumbnail(
            video_id,
            user_id,
            content_length,
            read_file_field(mime, body, THUMBNAIL_FIELD),
        )
        .await?;

    Ok(warp::reply::json(&video))
}

pub async fn get_video_handler(
    video_id: Uuid,
    pipeline: Arc<UploadPipeline>,
) -> Result<impl Reply, Rejection> {
    let video = pipeline.get_video(video_id).await?;
    Ok(warp::reply::json(&video))
}

/// Parses the multipart request body up to the first part named `field_name`. Nothing happens until
/// the returned future is polled.
async fn read_file_field<B: Buf + Send>(
    mime: Mime,
    body: impl Stream<Item = Result<B, warp::Error>> + Unpin + Send,
    field_name: &str,
) -> Result<UploadPart<impl Stream<Item = Result<Bytes, io::Error>> + Unpin>, Error> {
    if mime.type_() != mime::MULTIPART {
        return Err(Error::BadRequestError(format!(
            "Expected a multipart form, got '{mime}'"
        )));
    }
    let boundary = mime
        .get_param("boundary")
        .map(|v| v.to_string())
        .ok_or_else(|| Error::BadRequestError(String::from("No mime boundary")))?;

    let mut stream = MultipartStream::new(
        boundary,
        body.map_ok(|mut buf| buf.copy_to_bytes(buf.remaining())),
    );

    while let Some(field) = stream
        .try_next()
        .await
        .map_err(|e| Error::BadRequestError(e.to_string()))?
    {
        let name = field
            .name()
            .map_err(|e| Error::InvalidFileError(e.to_string()))?;
        if name != field_name {
            log::debug!("Skipping unexpected form field '{name}'");
            continue;
        }

        let filename = field.filename().ok().map(|f| f.to_string());
        let content_type = field.content_type().ok().map(|c| c.to_string());
        return Ok(UploadPart {
            field_name: field_name.to_string(),
            filename,
            content_type,
            body: field.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
        });
    }

    Err(Error::InvalidFileError(format!(
        "No file specified, no multipart form field found for name '{field_name}'"
    )))
}
