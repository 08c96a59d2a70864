use crate::config::{GithubConfig, ValidationError};
use crate::errors::RelayError;
use crate::metrics_defs::DISPATCH_DURATION;
use crate::protocol::{DispatchEvent, RelayResult};
use http::header::ACCEPT;
use shared::histogram;
use std::time::{Duration, Instant};
use url::Url;

pub const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

/// Substituted for the downstream body when it cannot be read.
pub const NO_DETAILS_PLACEHOLDER: &str = "No response details available";

/// Sends dispatch events to `POST /repos/{owner}/{repo}/dispatches`.
#[derive(Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    url: Url,
    token: String,
}

impl Dispatcher {
    pub fn new(config: &GithubConfig) -> Result<Self, RelayError> {
        let url = config.dispatches_url()?;
        if config.token.is_empty() {
            return Err(ValidationError::MissingGithubSetting("token", "GITHUB_TOKEN").into());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| RelayError::HttpClientError(e.to_string()))?;

        Ok(Dispatcher {
            client,
            url,
            token: config.token.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Sends one event. Any completed HTTP exchange, successful or not, is a
    /// `RelayResult`; only transport failures and timeouts are errors.
    pub async fn dispatch(&self, event: &DispatchEvent) -> Result<RelayResult, RelayError> {
        let start = Instant::now();

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.token)
            .header(ACCEPT, GITHUB_ACCEPT)
            .json(event)
            .send()
            .await?;

        let status = response.status();
        let details = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, status = status.as_u16(), "Failed to read dispatch response body");
                NO_DETAILS_PLACEHOLDER.to_string()
            }
        };

        histogram!(DISPATCH_DURATION, "status" => status.as_u16().to_string())
            .record(start.elapsed().as_secs_f64());

        Ok(RelayResult {
            ok: status.is_success(),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FileReference;
    use crate::testutils::{github_config, truncated_body_server};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> DispatchEvent {
        DispatchEvent::new("a@b.com".into(), FileReference::FileContent("aGVsbG8=".into()))
    }

    #[tokio::test]
    async fn test_dispatch_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/repos/acme/csv-pipeline/dispatches"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("accept", GITHUB_ACCEPT))
            .and(header("content-type", "application/json"))
            .and(header("user-agent", "csv-relay"))
            .and(body_json(serde_json::json!({
                "event_type": "process-csv",
                "client_payload": {"email": "a@b.com", "file_content": "aGVsbG8="}
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(&github_config(&server.uri())).unwrap();
        let result = dispatcher.dispatch(&event()).await.unwrap();

        assert_eq!(
            result,
            RelayResult {
                ok: true,
                status: 204,
                status_text: "No Content".into(),
                details: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_unsuccessful_status_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string(r#"{"message":"Invalid request."}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = Dispatcher::new(&github_config(&server.uri())).unwrap();
        let result = dispatcher.dispatch(&event()).await.unwrap();

        assert!(!result.ok);
        assert_eq!(result.status, 422);
        assert_eq!(result.status_text, "Unprocessable Entity");
        assert_eq!(result.details, r#"{"message":"Invalid request."}"#);
    }

    #[tokio::test]
    async fn test_unreadable_body_uses_placeholder() {
        let base = truncated_body_server().await;

        let dispatcher = Dispatcher::new(&github_config(&base)).unwrap();
        let result = dispatcher.dispatch(&event()).await.unwrap();

        assert!(result.ok);
        assert_eq!(result.status, 200);
        assert_eq!(result.details, NO_DETAILS_PLACEHOLDER);
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut config = github_config(&server.uri());
        config.timeout_secs = 1;
        let dispatcher = Dispatcher::new(&config).unwrap();

        let err = dispatcher.dispatch(&event()).await.unwrap_err();
        match err {
            RelayError::DispatchFailed(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_requires_token() {
        let mut config = github_config("http://127.0.0.1:1");
        config.token = String::new();
        assert!(matches!(
            Dispatcher::new(&config),
            Err(RelayError::InvalidConfig(_))
        ));
    }
}
