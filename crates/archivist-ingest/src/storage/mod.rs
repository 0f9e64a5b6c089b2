//! Destination object storage
//!
//! A transfer hands the destination a [`ChunkReceiver`]: the receiving end of
//! a bounded channel fed by the source reader. The reader only sends
//! [`Chunk::End`] after the whole body arrived, so a receiver that closes
//! without it means the source broke and nothing may be committed.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

pub mod config;

pub use config::StorageConfig;

/// Unit of the transfer buffer.
#[derive(Debug)]
pub enum Chunk {
    Data(Bytes),
    /// The source body was read to completion.
    End,
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("source stream ended before completion")]
    SourceAborted,

    #[error("{message}")]
    Destination { started: bool, message: String },
}

/// Receiving half of the transfer buffer.
pub struct ChunkReceiver {
    rx: mpsc::Receiver<Chunk>,
}

impl ChunkReceiver {
    pub fn new(rx: mpsc::Receiver<Chunk>) -> Self {
        Self { rx }
    }

    /// Bounded buffer between a source reader and a destination writer.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Chunk>, ChunkReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, ChunkReceiver::new(rx))
    }

    /// `Ok(Some)` for data, `Ok(None)` once the body is complete, and
    /// [`WriteError::SourceAborted`] if the reader went away early.
    pub async fn next(&mut self) -> Result<Option<Bytes>, WriteError> {
        match self.rx.recv().await {
            Some(Chunk::Data(bytes)) => Ok(Some(bytes)),
            Some(Chunk::End) => Ok(None),
            None => Err(WriteError::SourceAborted),
        }
    }
}

/// Streams a body into durable storage under a key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Consume `chunks` until [`Chunk::End`] and commit the object, returning
    /// its size. On any error no object may become visible under `key`.
    async fn write(
        &self,
        key: &str,
        content_type: Option<&str>,
        chunks: ChunkReceiver,
    ) -> Result<u64, WriteError>;
}

/// S3 (or S3-compatible) bucket.
///
/// Bodies up to one part are written with a single `PutObject`; larger ones
/// go through a multipart upload that is aborted on failure.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    part_size: usize,
}

struct MultipartUpload {
    upload_id: String,
    parts: Vec<CompletedPart>,
}

fn destination_error<E>(started: bool, context: &str, err: E) -> WriteError
where
    E: std::error::Error,
{
    WriteError::Destination {
        started,
        message: format!("{}: {}", context, DisplayErrorContext(&err)),
    }
}

impl S3ObjectStore {
    pub async fn new(config: StorageConfig) -> Self {
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing storage");

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "archivist-storage",
            ));
        }

        let sdk_config = loader.load().await;
        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
            part_size: config.part_size,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_single(
        &self,
        key: &str,
        content_type: Option<&str>,
        data: Vec<u8>,
    ) -> Result<(), WriteError> {
        let size = data.len() as i64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .content_length(size)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| destination_error(true, "PutObject failed", e))?;
        Ok(())
    }

    async fn start_multipart(
        &self,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<MultipartUpload, WriteError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| destination_error(false, "CreateMultipartUpload failed", e))?;

        let upload_id = output.upload_id().ok_or_else(|| WriteError::Destination {
            started: false,
            message: "CreateMultipartUpload returned no upload id".to_string(),
        })?;

        debug!(key, upload_id, "multipart upload started");
        Ok(MultipartUpload {
            upload_id: upload_id.to_string(),
            parts: Vec::new(),
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload: &mut MultipartUpload,
        data: Vec<u8>,
    ) -> Result<(), WriteError> {
        let part_number = upload.parts.len() as i32 + 1;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| destination_error(true, "UploadPart failed", e))?;

        upload.parts.push(
            CompletedPart::builder()
                .set_e_tag(output.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn complete_multipart(&self, key: &str, upload: MultipartUpload) -> Result<(), WriteError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(upload.parts))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload.upload_id)
            .multipart_upload(completed)
            .send()
            .await;

        if let Err(e) = result {
            let err = destination_error(true, "CompleteMultipartUpload failed", e);
            self.abort_multipart(key, &upload.upload_id).await;
            return Err(err);
        }
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = result {
            // Left for the bucket's incomplete-upload lifecycle rule.
            warn!(key, upload_id, error = %DisplayErrorContext(&e), "failed to abort multipart upload");
        }
    }

    async fn write_parts(
        &self,
        key: &str,
        content_type: Option<&str>,
        chunks: &mut ChunkReceiver,
        upload: &mut Option<MultipartUpload>,
    ) -> Result<u64, WriteError> {
        let mut buffer: Vec<u8> = Vec::new();
        let mut total: u64 = 0;

        while let Some(bytes) = chunks.next().await? {
            total += bytes.len() as u64;
            buffer.extend_from_slice(&bytes);

            while buffer.len() >= self.part_size {
                let rest = buffer.split_off(self.part_size);
                let part = std::mem::replace(&mut buffer, rest);
                if upload.is_none() {
                    *upload = Some(self.start_multipart(key, content_type).await?);
                }
                if let Some(active) = upload.as_mut() {
                    self.upload_part(key, active, part).await?;
                }
            }
        }

        match upload.take() {
            None => self.put_single(key, content_type, buffer).await?,
            Some(mut active) => {
                if !buffer.is_empty() {
                    if let Err(e) = self.upload_part(key, &mut active, buffer).await {
                        *upload = Some(active);
                        return Err(e);
                    }
                }
                self.complete_multipart(key, active).await?;
            },
        }

        Ok(total)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, chunks), fields(bucket = %self.bucket))]
    async fn write(
        &self,
        key: &str,
        content_type: Option<&str>,
        mut chunks: ChunkReceiver,
    ) -> Result<u64, WriteError> {
        let mut upload = None;
        let result = self
            .write_parts(key, content_type, &mut chunks, &mut upload)
            .await;

        match result {
            Ok(size) => {
                info!(size, "Successfully uploaded to s3://{}/{}", self.bucket, key);
                Ok(size)
            },
            Err(e) => {
                if let Some(active) = upload {
                    self.abort_multipart(key, &active.upload_id).await;
                }
                Err(e)
            },
        }
    }
}
