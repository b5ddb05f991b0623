use std::task::Poll;

use async_trait::async_trait;
use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use futures::{TryStream, ready, stream::IntoAsyncRead};
use pin_project::pin_project;
use ring::digest;
use tokio::io::AsyncRead;

use crate::error::Error;

pub mod s3utils;

pub use s3utils::S3ObjectStore;

/// Durable object storage, objects are addressed by key and later served from [`ObjectStore::object_url`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        content_type: &str,
    ) -> Result<(), Error>;

    fn object_url(&self, key: &str) -> String;
}

/// Builds a storage key `{prefix}/{random}{ext}` where the random part is 32 bytes of randomness in
/// url safe base64.
pub fn storage_key(prefix: &str, ext: &str) -> String {
    let random_bytes = rand::random::<[u8; 32]>();
    format!("{prefix}/{}{ext}", BASE64URL_NOPAD.encode(&random_bytes))
}

/// Reader over an upload body that hashes the read bytes and fails with
/// [`std::io::ErrorKind::InvalidInput`] as soon as more than `upload_limit` bytes are read.
#[pin_project]
pub struct UploadReader<R> {
    #[pin]
    async_read: R,
    hasher: digest::Context,
    bytes_read: u64,
    upload_limit: u64,
}

impl<S> UploadReader<IntoAsyncRead<S>>
where
    S: TryStream<Error = std::io::Error> + Unpin,
    S::Ok: AsRef<[u8]>,
{
    pub fn new(async_read: IntoAsyncRead<S>, upload_limit: u64) -> Self {
        Self {
            async_read,
            hasher: digest::Context::new(&digest::SHA256),
            bytes_read: 0,
            upload_limit,
        }
    }
}

impl<R> UploadReader<R> {
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn limit_exceeded(&self) -> bool {
        self.bytes_read > self.upload_limit
    }

    /// Hex encoded SHA-256 of all bytes read so far.
    pub fn sha256_hex(&self) -> String {
        HEXLOWER.encode(self.hasher.clone().finish().as_ref())
    }
}

impl<S> AsyncRead for UploadReader<IntoAsyncRead<S>>
where
    S: TryStream<Error = std::io::Error> + Unpin,
    S::Ok: AsRef<[u8]>,
{
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let slice = buf.initialize_unfilled();
        let this = self.project();
        let n = ready!(futures::io::AsyncRead::poll_read(
            this.async_read,
            cx,
            slice
        ))?;
        // an error return must leave `buf` unfilled
        *this.bytes_read += n as u64;
        if *this.bytes_read > *this.upload_limit {
            return Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Read upload size reached {}, exceeding limit {}",
                    this.bytes_read, this.upload_limit
                ),
            )));
        }
        this.hasher.update(&slice[..n]);
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::{TryStream, TryStreamExt, stream};
    use tokio::io::AsyncReadExt;

    use super::{UploadReader, storage_key};

    fn body(
        chunks: &[&'static [u8]],
    ) -> impl TryStream<Ok = Bytes, Error = std::io::Error> + Unpin + use<> {
        stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_storage_key_shape() {
        let key = storage_key("16:9", ".mp4");
        let (prefix, name) = key.split_once('/').unwrap();
        assert_eq!(prefix, "16:9");
        let random = name.strip_suffix(".mp4").unwrap();
        assert_eq!(random.len(), 43);
        assert!(
            random
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(key, storage_key("16:9", ".mp4"));
    }

    #[tokio::test]
    async fn test_reader_hashes_and_counts() {
        let mut reader = UploadReader::new(body(&[b"abc"]).into_async_read(), 10);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"abc");
        assert_eq!(reader.bytes_read(), 3);
        assert!(!reader.limit_exceeded());
        assert_eq!(
            reader.sha256_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_reader_enforces_limit() {
        let mut reader = UploadReader::new(body(&[b"0123", b"4567"]).into_async_read(), 6);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();

        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(reader.limit_exceeded());
        // only the chunk within the limit was handed out
        assert_eq!(out, b"0123");
        assert_eq!(
            reader.sha256_hex(),
            "1be2e452b46d7a0d9656bbb1f768e8248eba1b75baed65f5d99eafa948899a6a"
        );
    }

    #[tokio::test]
    async fn test_reader_error_leaves_buffer_unfilled() {
        let mut reader = UploadReader::new(body(&[b"01", b"23456789"]).into_async_read(), 4);
        let mut buf = [0u8; 16];

        assert_eq!(reader.read(&mut buf).await.unwrap(), 2);
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(reader.limit_exceeded());
    }
}
