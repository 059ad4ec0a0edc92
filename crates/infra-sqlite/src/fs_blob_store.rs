// Filesystem-backed BlobStore (§3, §5): attachment/artifact archives stored
// as files under a root directory, one file per key, streamed in both
// directions so handlers never buffer a whole archive in memory.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::path::PathBuf;
use testflinger_core::error::{AppError, Result};
use testflinger_core::port::{BlobStore, ByteChunk};
use tokio::fs;
use tokio_util::io::ReaderStream;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are job ids / archive names, never attacker-controlled path
        // fragments, but refuse traversal outright rather than trust that.
        if key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(AppError::Validation(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

fn io_err(e: std::io::Error) -> AppError {
    AppError::Io(e)
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_stream(
        &self,
        key: &str,
        mut stream: BoxStream<'static, std::io::Result<Bytes>>,
    ) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = fs::File::create(&path).await.map_err(io_err)?;
        use tokio::io::AsyncWriteExt;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(io_err)?;
            file.write_all(&chunk).await.map_err(io_err)?;
        }
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<Option<BoxStream<'static, ByteChunk>>> {
        let path = self.path_for(key)?;
        match fs::File::open(&path).await {
            Ok(file) => {
                let stream = ReaderStream::new(file).map_err(AppError::Io).boxed();
                Ok(Some(stream))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    async fn list_older_than(&self, older_than_millis: i64) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(io_err(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let metadata = entry.metadata().await.map_err(io_err)?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(io_err)?;
            let modified_millis = modified
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            if modified_millis < older_than_millis {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }
}
