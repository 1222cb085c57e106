//! HTTP client for the control-plane API

use crate::error::{DecoderError, DecoderResult};
use crate::loader::{LoadPlan, UnloadPlan};
use crate::types::{AssociateStreamRequest, SendControlRequest, StreamId, UpsertSchemaRequest};
use serde::Serialize;
use tracing::{error, info};

/// Client for a running decoder's control-plane API
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    inner: reqwest::Client,
}

impl ControlPlaneClient {
    /// `base_url` like `http://localhost:20789`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            inner: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register (or replace) a proto package from descriptor-set bytes
    pub async fn upsert_schema(&self, descriptor: Vec<u8>) -> DecoderResult<()> {
        self.post(
            "/schema",
            &UpsertSchemaRequest {
                proto_descriptor: descriptor,
            },
        )
        .await
    }

    pub async fn associate(
        &self,
        stream: StreamId,
        package: &str,
        message: &str,
    ) -> DecoderResult<()> {
        self.post(
            "/stream",
            &AssociateStreamRequest {
                stream_uuid: stream,
                proto_package: package.to_string(),
                proto_message: message.to_string(),
            },
        )
        .await
    }

    pub async fn disassociate(&self, stream: StreamId) -> DecoderResult<()> {
        let url = format!(
            "{}/stream?stream_uuid={}",
            self.base_url,
            stream.to_url_safe()
        );
        let response = self.inner.delete(url).send().await?;
        check_status("/stream", response).await
    }

    /// Ask the decoder to encode `json` for `stream` and send it to the agent
    pub async fn send_control(&self, stream: StreamId, json: &str) -> DecoderResult<()> {
        self.post(
            "/control",
            &SendControlRequest {
                stream_uuid: stream,
                payload: json.to_string(),
            },
        )
        .await
    }

    /// Register every package in `plan`, then bind its streams
    ///
    /// Keeps going after failures; a package whose upsert fails has its
    /// streams skipped. All failures are returned together.
    pub async fn load(&self, plan: &LoadPlan) -> DecoderResult<()> {
        let mut errors = Vec::new();

        for (package, load) in &plan.packages {
            if let Err(e) = self.upsert_schema(load.descriptor.clone()).await {
                errors.push(DecoderError::Internal(format!(
                    "failed to upsert proto package {}: {}",
                    package, e
                )));
                continue;
            }
            info!(package = %package, "Upserted proto package");

            for (stream, message) in &load.streams {
                match self.associate(*stream, package, message).await {
                    Ok(()) => {
                        info!(stream_id = %stream, package = %package, message = %message, "Associated stream")
                    }
                    Err(e) => errors.push(DecoderError::Internal(format!(
                        "failed to associate stream {} to {}/{}: {}",
                        stream, package, message, e
                    ))),
                }
            }
        }

        into_batch(errors)
    }

    /// Unbind every stream in `plan`
    pub async fn unload(&self, plan: &UnloadPlan) -> DecoderResult<()> {
        let mut errors = Vec::new();
        for stream in &plan.streams {
            match self.disassociate(*stream).await {
                Ok(()) => info!(stream_id = %stream, "Disassociated stream"),
                Err(e) => errors.push(DecoderError::Internal(format!(
                    "failed to disassociate stream {}: {}",
                    stream, e
                ))),
            }
        }
        into_batch(errors)
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> DecoderResult<()> {
        let response = self
            .inner
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        check_status(path, response).await
    }
}

async fn check_status(path: &str, response: reqwest::Response) -> DecoderResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    error!(path, status = status.as_u16(), body = %body, "Unexpected status code");
    Err(DecoderError::Http {
        status: status.as_u16(),
    })
}

fn into_batch(errors: Vec<DecoderError>) -> DecoderResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DecoderError::Batch(errors))
    }
}
