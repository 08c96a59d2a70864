use crate::blob_store::ArtifactStore;
use crate::config::{Config, DEFAULT_MAX_BODY_BYTES};
use crate::dispatch::Dispatcher;
use crate::errors::RelayError;
use crate::metrics_defs::{BLOB_UPLOADS, REQUEST_DURATION, REQUESTS};
use crate::protocol::{
    DispatchEvent, ErrorBody, FileReference, IncomingRequest, MISSING_FIELDS_MESSAGE, RelayResult,
    UploadBody,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http::HeaderValue;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use shared::http::{ResponseBody, empty_body, full_body};
use shared::{counter, histogram};
use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

type BoxError = Box<dyn StdError + Send + Sync>;

/// What became of a request, used as the metrics tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Preflight,
    MethodNotAllowed,
    Invalid,
    Dispatched,
    DownstreamError,
    Error,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Preflight => "preflight",
            Outcome::MethodNotAllowed => "method_not_allowed",
            Outcome::Invalid => "invalid",
            Outcome::Dispatched => "dispatched",
            Outcome::DownstreamError => "downstream_error",
            Outcome::Error => "error",
        }
    }
}

/// Validates browser uploads and turns each into one repository dispatch.
pub struct Relay {
    dispatcher: Dispatcher,
    /// Stored-URL variant when set, inline content otherwise
    artifacts: Option<ArtifactStore>,
    max_body_bytes: usize,
}

impl Relay {
    pub fn new(dispatcher: Dispatcher, artifacts: Option<ArtifactStore>) -> Self {
        Relay {
            dispatcher,
            artifacts,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, RelayError> {
        let dispatcher = Dispatcher::new(&config.github)?;
        let artifacts = config
            .blob_store
            .as_ref()
            .map(ArtifactStore::from_config)
            .transpose()?;

        Ok(Relay::new(dispatcher, artifacts).with_max_body_bytes(config.max_body_bytes))
    }

    pub fn dispatch_url(&self) -> &url::Url {
        self.dispatcher.url()
    }

    pub fn stores_uploads(&self) -> bool {
        self.artifacts.is_some()
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let method = req.method().clone();

        let (response, outcome) = match method {
            Method::OPTIONS => (preflight_response(), Outcome::Preflight),
            Method::POST => match self.relay(req.into_body()).await {
                Ok(Some(result)) => {
                    let outcome = match result.ok {
                        true => Outcome::Dispatched,
                        false => Outcome::DownstreamError,
                    };
                    // downstream failures are reported inside a 200
                    (json_response(StatusCode::OK, &result), outcome)
                }
                Ok(None) => (
                    json_response(
                        StatusCode::BAD_REQUEST,
                        &ErrorBody::new(MISSING_FIELDS_MESSAGE),
                    ),
                    Outcome::Invalid,
                ),
                Err(e) => {
                    tracing::error!(error = %e, "Relay request failed");
                    (
                        json_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            &ErrorBody::new(e.to_string()),
                        ),
                        Outcome::Error,
                    )
                }
            },
            _ => (method_not_allowed_response(), Outcome::MethodNotAllowed),
        };

        tracing::debug!(
            %method,
            outcome = outcome.as_str(),
            status = response.status().as_u16(),
            "Handled request"
        );
        counter!(REQUESTS, "outcome" => outcome.as_str()).increment(1);
        histogram!(REQUEST_DURATION, "outcome" => outcome.as_str())
            .record(start.elapsed().as_secs_f64());

        response
    }

    /// Returns `Ok(None)` when a required field is missing, in which case
    /// nothing is stored or dispatched.
    async fn relay<B>(&self, body: B) -> Result<Option<RelayResult>, RelayError>
    where
        B: Body,
        B::Error: Into<BoxError>,
    {
        let bytes = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| match e.downcast::<LengthLimitError>() {
                Ok(_) => RelayError::RequestBodyTooLarge(self.max_body_bytes),
                Err(e) => RelayError::RequestBodyError(e.to_string()),
            })?
            .to_bytes();
        let upload: UploadBody = serde_json::from_slice(&bytes)?;

        tracing::info!(
            body_len = bytes.len(),
            has_email = upload.email.as_deref().is_some_and(|e| !e.is_empty()),
            file_content_len = upload.file_content.as_deref().map_or(0, str::len),
            "Received upload"
        );

        let Some(IncomingRequest {
            email,
            file_content,
        }) = upload.validate()
        else {
            tracing::warn!("Rejecting upload with missing fields");
            return Ok(None);
        };

        let file = match &self.artifacts {
            Some(artifacts) => {
                let decoded = BASE64.decode(file_content.as_bytes())?;
                let stored = artifacts.store_csv(decoded.into()).await;
                let result = if stored.is_ok() { "ok" } else { "error" };
                counter!(BLOB_UPLOADS, "result" => result).increment(1);
                FileReference::FileUrl(stored?.url)
            }
            None => FileReference::FileContent(file_content),
        };

        let event = DispatchEvent::new(email, file);
        let result = self.dispatcher.dispatch(&event).await?;

        tracing::info!(
            ok = result.ok,
            status = result.status,
            status_text = %result.status_text,
            details_len = result.details.len(),
            "Dispatch completed"
        );

        Ok(Some(result))
    }
}

/// Hyper service wrapper so the relay can be served by `run_http_service`.
#[derive(Clone)]
pub struct RelayService {
    relay: Arc<Relay>,
}

impl RelayService {
    pub fn new(relay: Arc<Relay>) -> Self {
        RelayService { relay }
    }
}

impl<B> Service<Request<B>> for RelayService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError> + Send,
{
    type Response = Response<ResponseBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let relay = self.relay.clone();
        Box::pin(async move { Ok(relay.handle(req).await) })
    }
}

fn allow_any_origin(response: &mut Response<ResponseBody>) {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
}

fn preflight_response() -> Response<ResponseBody> {
    let mut response = Response::new(empty_body());
    allow_any_origin(&mut response);
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("POST"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

fn method_not_allowed_response() -> Response<ResponseBody> {
    let mut response = Response::new(full_body("Method not allowed"));
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    allow_any_origin(&mut response);
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    let mut response = match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full_body(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            let mut response = Response::new(full_body(e.to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };
    allow_any_origin(&mut response);
    response
}
