// Streaming glue between axum's `Multipart`/`Body` and the core `BlobStore`
// port (§5: handlers must not buffer whole archives in memory).
//
// Uploads: multipart field bytes are copied into one end of an in-memory
// pipe on a background task while the other end is wrapped as a byte
// stream and handed to `BlobStore::put_stream`. Downloads: the stored byte
// stream is adapted straight into the response body.

use axum::body::Body;
use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::error::{unprocessable, ApiResult};
use crate::state::AppState;

pub async fn stream_multipart_upload(state: &AppState, key: &str, mut multipart: Multipart) -> ApiResult<()> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| unprocessable(format!("malformed multipart body: {e}")))?
        .ok_or_else(|| unprocessable("multipart body has no fields"))?;

    let (mut writer, reader) = tokio::io::duplex(64 * 1024);
    let mut field = field;
    let copy_task = tokio::spawn(async move {
        while let Some(chunk) = field.chunk().await.transpose() {
            let chunk = match chunk {
                Ok(c) => c,
                Err(_) => break,
            };
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let stream = ReaderStream::new(reader);
    state.blobs.put_stream(key, Box::pin(stream)).await?;
    let _ = copy_task.await;
    Ok(())
}

pub async fn stream_blob_download(state: &AppState, key: &str) -> ApiResult<Response> {
    match state.blobs.get_stream(key).await? {
        Some(stream) => {
            let body = Body::from_stream(stream);
            Ok((StatusCode::OK, [("content-type", "application/gzip")], body).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
