// Blob store port: streamed storage for attachment/artifact archives (§3, §5).
//
// Handlers must not buffer whole archives in memory; implementations accept
// an async byte stream and return one, backed by the filesystem in the
// reference realization (testflinger-infra-sqlite::FsBlobStore).

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub type ByteChunk = Result<bytes::Bytes>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_stream(
        &self,
        key: &str,
        stream: BoxStream<'static, std::io::Result<bytes::Bytes>>,
    ) -> Result<()>;

    async fn get_stream(&self, key: &str) -> Result<Option<BoxStream<'static, ByteChunk>>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys (and their last-write times) older than `older_than_millis`, for
    /// the maintenance GC pass (§4.11).
    async fn list_older_than(&self, older_than_millis: i64) -> Result<Vec<String>>;
}
