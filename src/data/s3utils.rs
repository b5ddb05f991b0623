use std::{task::Poll, time::Instant};

use async_trait::async_trait;
use futures::ready;
use pin_project::pin_project;
use s3::{Bucket, Region, creds::Credentials};
use tokio::io::AsyncRead;
use url::Url;

use crate::{
    data::ObjectStore,
    error::Error,
    util::{format_duration, join_url},
};

/// Where the bucket lives, either a named AWS region or a custom S3 compatible endpoint that is
/// addressed path style.
#[derive(Debug, Clone)]
pub enum BucketLocation {
    Aws { region: String },
    Custom { endpoint: Url },
}

pub struct S3ObjectStore {
    bucket: Bucket,
    bucket_name: String,
    location: BucketLocation,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        location: BucketLocation,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, Error> {
        let bucket = create_bucket(bucket_name, &location, access_key, secret_key)?;
        Ok(Self {
            bucket,
            bucket_name: String::from(bucket_name),
            location,
        })
    }
}

pub fn create_bucket(
    bucket_name: &str,
    location: &BucketLocation,
    access_key: &str,
    secret_key: &str,
) -> Result<Bucket, Error> {
    let region = match location {
        BucketLocation::Aws { region } => region
            .parse::<Region>()
            .map_err(|e| Error::StorageError(format!("Invalid region '{region}': {e}")))?,
        BucketLocation::Custom { endpoint } => Region::Custom {
            region: String::from(""),
            endpoint: endpoint.as_str().trim_end_matches('/').to_string(),
        },
    };

    let credentials = Credentials {
        access_key: Some(String::from(access_key)),
        secret_key: Some(String::from(secret_key)),
        security_token: None,
        session_token: None,
        expiration: None,
    };

    Bucket::new(bucket_name, region, credentials)
        .map_err(|e| Error::StorageError(format!("Invalid bucket '{bucket_name}': {e}")))
        .map(|b| match location {
            BucketLocation::Aws { .. } => b,
            BucketLocation::Custom { .. } => b.with_path_style(),
        })
}

/// Public URL of an object, `https://{bucket}.s3.{region}.amazonaws.com/{key}` for AWS buckets and
/// `{endpoint}/{bucket}/{key}` for custom endpoints.
pub fn object_url(bucket_name: &str, location: &BucketLocation, key: &str) -> String {
    match location {
        BucketLocation::Aws { region } => {
            format!("https://{bucket_name}.s3.{region}.amazonaws.com/{key}")
        }
        BucketLocation::Custom { endpoint } => {
            let mut url = endpoint.clone();
            match join_url(&mut url, std::iter::once(bucket_name).chain(key.split('/'))) {
                Ok(()) => url.to_string(),
                // cannot-be-a-base endpoints are rejected at startup
                Err(_) => format!("{}/{bucket_name}/{key}", endpoint.as_str().trim_end_matches('/')),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
    ) -> Result<(), Error> {
        log::info!("Starting S3 upload for {key}");
        let start_time = Instant::now();
        let mut reader = ByteCountingReader::new(reader);
        let status = self
            .bucket
            .put_object_stream_with_content_type(&mut reader, key, content_type)
            .await?;
        if status >= 300 {
            return Err(Error::S3ResponseError(status));
        }

        log::info!(
            "Finished S3 upload for {key} ({} bytes in {})",
            reader.byte_count,
            format_duration(start_time.elapsed())
        );
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        object_url(&self.bucket_name, &self.location, key)
    }
}

#[pin_project]
struct ByteCountingReader<R> {
    #[pin]
    inner: R,
    byte_count: usize,
}

impl<R> ByteCountingReader<R> {
    fn new(inner: R) -> Self {
        ByteCountingReader {
            inner,
            byte_count: 0,
        }
    }
}

impl<R: AsyncRead> AsyncRead for ByteCountingReader<R> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.project();
        let curr_len = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        *this.byte_count += buf.filled().len() - curr_len;
        Poll::Ready(Ok(()))
    }
}
