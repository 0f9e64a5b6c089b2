//! Authenticated streaming copy from a source URL into object storage
//!
//! The response body is pumped through a bounded [`ChunkReceiver`] buffer
//! into the destination writer. Reader and writer fail independently, so a
//! broken source never commits a truncated object and the two sides report
//! distinct errors.

use crate::error::TransferError;
use crate::storage::{Chunk, ChunkReceiver, ObjectStore, WriteError};
use archivist_common::types::TargetKey;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

/// Hard cap on a single transfer attempt.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Chunks buffered between the source reader and the destination writer.
const BUFFER_CAPACITY: usize = 16;

/// Upper bound on the share of the attempt reserved for the writer to
/// commit or abort after the source is drained.
const WRITER_GRACE: Duration = Duration::from_secs(30);

/// The writer's window at the end of an attempt: a tenth of the timeout,
/// capped at [`WRITER_GRACE`].
fn writer_grace(timeout: Duration) -> Duration {
    (timeout / 10).min(WRITER_GRACE)
}

enum ReadFailure {
    Timeout,
    Stream(String),
    /// The writer dropped its receiver; its own error explains why.
    WriterGone,
}

pub struct Transferer {
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl Transferer {
    pub fn new(client: reqwest::Client, store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
        Self {
            client,
            store,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Copy `source_url` to `key`, returning the number of bytes stored.
    ///
    /// A non-2xx source response fails with [`TransferError::HttpStatus`]
    /// after draining the body. Nothing is retried here.
    ///
    /// The whole attempt, commit included, ends within the configured
    /// timeout. The source must be drained before the writer's window.
    #[instrument(skip(self, bearer_token, key), fields(key = %key))]
    pub async fn transfer(
        &self,
        source_url: &str,
        bearer_token: &str,
        key: &TargetKey,
        content_type_hint: Option<&str>,
    ) -> Result<u64, TransferError> {
        let started = Instant::now();
        let hard_deadline = started + self.timeout;
        let deadline = hard_deadline - writer_grace(self.timeout);
        let timeout_secs = self.timeout.as_secs();

        let request = self.client.get(source_url).bearer_auth(bearer_token).send();
        let response = match timeout_at(deadline, request).await {
            Err(_) => return Err(TransferError::PreUploadTimeout(timeout_secs)),
            Ok(Err(e)) if e.is_timeout() => {
                return Err(TransferError::PreUploadTimeout(timeout_secs))
            },
            Ok(Err(e)) => return Err(TransferError::PreUploadNetworkError(e.to_string())),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            if timeout_at(deadline, response.bytes()).await.is_err() {
                debug!("gave up draining error response body");
            }
            warn!(status = status.as_u16(), "source returned non-success status");
            return Err(TransferError::HttpStatus(status.as_u16()));
        }

        let content_type = content_type_hint.map(str::to_string).or_else(|| {
            response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        let (tx, chunks) = ChunkReceiver::channel(BUFFER_CAPACITY);
        let reader = pump(Box::pin(response.bytes_stream()), tx, deadline);
        let writer = self
            .store
            .write(key.as_str(), content_type.as_deref(), chunks);

        let (read_result, write_result) =
            match timeout_at(hard_deadline, async { tokio::join!(reader, writer) }).await {
                Ok(results) => results,
                Err(_) => return Err(TransferError::PostUploadTimeout(timeout_secs)),
            };

        let size = classify(read_result, write_result, timeout_secs)?;
        info!(size, "transfer complete");
        Ok(size)
    }
}

/// Forward the body into the buffer, ending with [`Chunk::End`] only when the
/// source was read to completion.
async fn pump<S>(mut body: S, tx: mpsc::Sender<Chunk>, deadline: Instant) -> Result<u64, ReadFailure>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let mut total: u64 = 0;
    loop {
        let chunk = match timeout_at(deadline, body.next()).await {
            Err(_) => return Err(ReadFailure::Timeout),
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(ReadFailure::Stream(e.to_string())),
            Ok(Some(Ok(bytes))) => bytes,
        };
        total += chunk.len() as u64;
        send(&tx, Chunk::Data(chunk), deadline).await?;
    }
    send(&tx, Chunk::End, deadline).await?;
    Ok(total)
}

async fn send(tx: &mpsc::Sender<Chunk>, chunk: Chunk, deadline: Instant) -> Result<(), ReadFailure> {
    match timeout_at(deadline, tx.send(chunk)).await {
        Err(_) => Err(ReadFailure::Timeout),
        Ok(Err(_)) => Err(ReadFailure::WriterGone),
        Ok(Ok(())) => Ok(()),
    }
}

/// Read-side failures take precedence: when the source broke, the writer
/// only ever sees the aborted stream.
fn classify(
    read: Result<u64, ReadFailure>,
    write: Result<u64, WriteError>,
    timeout_secs: u64,
) -> Result<u64, TransferError> {
    match (read, write) {
        (Ok(_), Ok(size)) => Ok(size),
        (Err(ReadFailure::Timeout), _) => Err(TransferError::PostUploadTimeout(timeout_secs)),
        (Err(ReadFailure::Stream(message)), _) => Err(TransferError::PostUploadStreamError(message)),
        (_, Err(WriteError::Destination { started, message })) => {
            Err(TransferError::DestinationWriteError {
                upload_started: started,
                message,
            })
        },
        (_, Err(WriteError::SourceAborted)) => Err(TransferError::PostUploadStreamError(
            WriteError::SourceAborted.to_string(),
        )),
        (Err(ReadFailure::WriterGone), Ok(_)) => Err(TransferError::DestinationWriteError {
            upload_started: true,
            message: "writer finished before the body was consumed".to_string(),
        }),
    }
}
