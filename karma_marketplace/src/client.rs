use std::collections::BTreeMap;
use std::time::Duration;

use karma_common::{Address, EvidenceKind, Task};
use log::{debug, warn};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use url::Url;
use uuid::Uuid;

use crate::error::MarketplaceError;
use crate::types::{validate_evidence, ApplyOutcome, BrowseFilter, CreateTaskFields, DEFAULT_MIN_BOUNTY};

/// Mirrors `ai_miner::daemon_client::DaemonClientConfig`: per-request
/// timeout, retry budget, retry spacing, plus the client-side bounty floor.
#[derive(Debug, Clone)]
pub struct MarketplaceClientConfig {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub min_bounty: u64,
}

impl Default for MarketplaceClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            min_bounty: DEFAULT_MIN_BOUNTY,
        }
    }
}

/// A stateless HTTP client over the marketplace's documented REST surface
/// (spec.md §6). One instance is typically shared across a single agent's
/// ticks; outbound pacing (the mandatory 500ms spacing) is the caller's
/// responsibility, not this client's.
pub struct MarketplaceClient {
    http: reqwest::Client,
    base_url: Url,
    wallet_header: String,
    config: MarketplaceClientConfig,
}

#[derive(Deserialize)]
struct TasksResponse {
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct CreateTaskBody<'a> {
    title: &'a str,
    description: &'a str,
    category: &'a str,
    bounty: u64,
    evidence_required: Vec<EvidenceKind>,
    deadline: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
struct CreateTaskResponse {
    task_id: Uuid,
}

#[derive(Serialize)]
struct ApplyBody<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct ApplyResponse {
    application_id: String,
}

#[derive(Deserialize)]
struct AssignResponse {
    assignment: AssignmentDetail,
}

#[derive(Deserialize)]
struct AssignmentDetail {
    assignee_address: Address,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    executor_id: &'a str,
    evidence: &'a BTreeMap<EvidenceKind, Value>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    submission_id: String,
}

#[derive(Deserialize)]
struct SubmissionDetail {
    evidence: BTreeMap<EvidenceKind, Value>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct ApproveResponse {
    settlement_intent: Value,
}

impl MarketplaceClient {
    pub fn new(base_url: Url, wallet: Address) -> Result<Self, MarketplaceError> {
        Self::with_config(base_url, wallet, MarketplaceClientConfig::default())
    }

    pub fn with_config(
        base_url: Url,
        wallet: Address,
        config: MarketplaceClientConfig,
    ) -> Result<Self, MarketplaceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url,
            wallet_header: wallet.to_string(),
            config,
        })
    }

    pub fn config(&self) -> &MarketplaceClientConfig {
        &self.config
    }

    /// Issues a single request, retrying retryable failures up to
    /// `max_retries` with a fixed delay, matching
    /// `ai_miner::daemon_client::make_request`'s retry loop. A `429` status
    /// is retried the same as a transport error (spec.md §4.3/§7's "mandatory
    /// inter-call delay and capped retry"), so only a retry count exhausted
    /// while still rate-limited reaches the caller as `RateLimited`.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, MarketplaceError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                warn!(
                    "retrying marketplace request (attempt {attempt}/{})",
                    self.config.max_retries
                );
                sleep(self.config.retry_delay).await;
            }

            let request = build().header("X-Agent-Wallet", &self.wallet_header);
            match request.send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    debug!("marketplace rate-limited the request (429)");
                    last_error = Some(MarketplaceError::RateLimited);
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!("marketplace request failed: {err}");
                    let mapped = MarketplaceError::Network(err);
                    if !mapped.is_retryable() {
                        return Err(mapped);
                    }
                    last_error = Some(mapped);
                }
            }
        }
        Err(last_error.unwrap_or(MarketplaceError::RetriesExhausted {
            attempts: self.config.max_retries,
        }))
    }

    /// Classifies a successful-transport response per spec.md §6/§7's
    /// status code table, returning the parsed body on 200/201.
    async fn classify<T: for<'de> Deserialize<'de>>(
        response: Response,
    ) -> Result<T, MarketplaceError> {
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                response.json::<T>().await.map_err(MarketplaceError::Network)
            }
            StatusCode::CONFLICT => Err(MarketplaceError::Conflict),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                Err(MarketplaceError::SchemaInvalid { body })
            }
            StatusCode::TOO_MANY_REQUESTS => Err(MarketplaceError::RateLimited),
            StatusCode::FORBIDDEN => Err(MarketplaceError::Unauthorized),
            status => Err(MarketplaceError::Unexpected {
                status: status.as_u16(),
            }),
        }
    }

    pub async fn browse(&self, filter: &BrowseFilter) -> Result<Vec<Task>, MarketplaceError> {
        let mut url = self.base_url.join("tasks")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(category) = &filter.category {
                query.append_pair("category", category);
            }
            if let Some(limit) = filter.limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        let parsed: TasksResponse = Self::classify(response).await?;
        Ok(parsed.tasks)
    }

    pub async fn create_task(&self, fields: &CreateTaskFields) -> Result<Uuid, MarketplaceError> {
        fields.validate(self.config.min_bounty)?;
        let url = self.base_url.join("tasks")?;
        let body = CreateTaskBody {
            title: &fields.title,
            description: &fields.description,
            category: &fields.category,
            bounty: fields.bounty,
            evidence_required: fields.evidence_required.iter().copied().collect(),
            deadline: fields.deadline,
        };
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).json(&body))
            .await?;
        let parsed: CreateTaskResponse = Self::classify(response).await?;
        Ok(parsed.task_id)
    }

    /// Treats a `409` as "already applied", per spec.md's idempotence
    /// requirement — never surfaced as `MarketplaceError::Conflict`.
    pub async fn apply(&self, task_id: Uuid, message: &str) -> Result<ApplyOutcome, MarketplaceError> {
        let url = self.base_url.join(&format!("tasks/{task_id}/applications"))?;
        let body = ApplyBody { message };
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).json(&body))
            .await?;
        match Self::classify::<ApplyResponse>(response).await {
            Ok(parsed) => Ok(ApplyOutcome::Applied {
                application_id: parsed.application_id,
            }),
            Err(MarketplaceError::Conflict) => Ok(ApplyOutcome::AlreadyApplied),
            Err(other) => Err(other),
        }
    }

    pub async fn assign(&self, task_id: Uuid, application_id: &str) -> Result<Address, MarketplaceError> {
        let url = self.base_url.join(&format!(
            "tasks/{task_id}/applications/{application_id}/assign"
        ))?;
        let response = self.send_with_retry(|| self.http.post(url.clone())).await?;
        let parsed: AssignResponse = Self::classify(response).await?;
        Ok(parsed.assignment.assignee_address)
    }

    pub async fn submit(
        &self,
        task_id: Uuid,
        executor_id: &str,
        evidence: &BTreeMap<EvidenceKind, Value>,
    ) -> Result<String, MarketplaceError> {
        validate_evidence(evidence)?;
        let url = self.base_url.join(&format!("tasks/{task_id}/submissions"))?;
        let body = SubmitBody { executor_id, evidence };
        let response = self
            .send_with_retry(|| self.http.post(url.clone()).json(&body))
            .await?;
        let parsed: SubmitResponse = Self::classify(response).await?;
        Ok(parsed.submission_id)
    }

    /// Fetches the evidence a submission carries, the read counterpart of
    /// `submit`, so a publisher can run spec.md §4.4's pre-approve evidence
    /// check against the actual payload rather than trusting the
    /// submission_id alone.
    pub async fn get_submission(
        &self,
        task_id: Uuid,
        submission_id: &str,
    ) -> Result<BTreeMap<EvidenceKind, Value>, MarketplaceError> {
        let url = self.base_url.join(&format!(
            "tasks/{task_id}/submissions/{submission_id}"
        ))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        let parsed: SubmissionDetail = Self::classify(response).await?;
        Ok(parsed.evidence)
    }

    pub async fn approve(&self, task_id: Uuid, submission_id: &str) -> Result<(), MarketplaceError> {
        let url = self.base_url.join(&format!(
            "tasks/{task_id}/submissions/{submission_id}/approve"
        ))?;
        let response = self.send_with_retry(|| self.http.post(url.clone())).await?;
        Self::classify::<ApproveResponse>(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for MarketplaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karma_common::{EvidenceKind as EK, TaskState};
    use serde_json::json;
    use std::collections::BTreeSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_wallet() -> Address {
        Address::from_bytes([0x11u8; 20])
    }

    fn sample_task() -> Task {
        Task {
            task_id: Uuid::nil(),
            publisher_address: test_wallet(),
            title: "title".into(),
            description: "description".into(),
            category: "data".into(),
            bounty: 10_000,
            evidence_required: BTreeSet::from([EK::JsonResponse]),
            deadline: chrono::Utc::now(),
            state: TaskState::Published,
            assignee_address: None,
            application_id: None,
            submission_id: None,
            validator_id: None,
        }
    }

    #[tokio::test]
    async fn browse_parses_task_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tasks": [sample_task()],
            })))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(Url::parse(&server.uri()).unwrap(), test_wallet()).unwrap();
        let tasks = client.browse(&BrowseFilter::default()).await.unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn apply_maps_409_to_already_applied() {
        let server = MockServer::start().await;
        let task_id = Uuid::nil();
        Mock::given(method("POST"))
            .and(path(format!("/tasks/{task_id}/applications")))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(Url::parse(&server.uri()).unwrap(), test_wallet()).unwrap();
        let outcome = client.apply(task_id, "hello").await.unwrap();
        assert_eq!(outcome, ApplyOutcome::AlreadyApplied);
    }

    #[tokio::test]
    async fn schema_errors_are_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad bounty"))
            .mount(&server)
            .await;

        let client = MarketplaceClient::new(Url::parse(&server.uri()).unwrap(), test_wallet()).unwrap();
        let fields = CreateTaskFields {
            title: "t".into(),
            description: "d".into(),
            category: "data".into(),
            bounty: 10_000,
            evidence_required: BTreeSet::from([EK::JsonResponse]),
            deadline: chrono::Utc::now(),
        };
        let err = client.create_task(&fields).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::SchemaInvalid { .. }));
    }

    #[tokio::test]
    async fn retries_then_succeeds_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tasks": [] })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let mut config = MarketplaceClientConfig::default();
        config.retry_delay = Duration::from_millis(1);
        let client =
            MarketplaceClient::with_config(Url::parse(&server.uri()).unwrap(), test_wallet(), config)
                .unwrap();
        let tasks = client.browse(&BrowseFilter::default()).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn retries_past_a_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tasks": [] })))
            .mount(&server)
            .await;

        let mut config = MarketplaceClientConfig::default();
        config.retry_delay = Duration::from_millis(1);
        let client =
            MarketplaceClient::with_config(Url::parse(&server.uri()).unwrap(), test_wallet(), config)
                .unwrap();
        let tasks = client.browse(&BrowseFilter::default()).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_exhausting_all_retries_surfaces_as_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let mut config = MarketplaceClientConfig::default();
        config.retry_delay = Duration::from_millis(1);
        config.max_retries = 2;
        let client =
            MarketplaceClient::with_config(Url::parse(&server.uri()).unwrap(), test_wallet(), config)
                .unwrap();
        let err = client.browse(&BrowseFilter::default()).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::RateLimited));
    }

    #[tokio::test]
    async fn create_task_rejects_low_bounty_before_request() {
        let server = MockServer::start().await;
        let client = MarketplaceClient::new(Url::parse(&server.uri()).unwrap(), test_wallet()).unwrap();
        let fields = CreateTaskFields {
            title: "t".into(),
            description: "d".into(),
            category: "data".into(),
            bounty: 1,
            evidence_required: BTreeSet::from([EK::JsonResponse]),
            deadline: chrono::Utc::now(),
        };
        let err = client.create_task(&fields).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::BountyTooLow { .. }));
    }
}
