//! Request pipeline: validate, resolve dependencies, build the prompt,
//! invoke the provider, shape the response.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backend::{Backend, GenerationJob, OpenAiBackend};
use crate::config::Config;
use crate::deps::{
    auth_node, rate_limit_node, Authenticator, DependencyGraph, DependencyNode, RateLimiter,
    Resolution, StaticKeyAuthenticator,
};
use crate::error::{ConfigError, PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::middleware::Middleware;
use crate::prompt::PromptBuilder;
use crate::resilience::{BreakerState, CircuitBreaker, CircuitBreakerConfig, ResilientClient};
use crate::transport::{parse_body, TransportRequest, TransportResponse, REQUEST_ID_HEADER};
use crate::types::{GenerateResponse, HealthReport, RawRequest, ServiceStatus, Task};
use crate::validation::{RequestValidator, ValidatedRequest};

/// Pipeline stages in execution order. A run stops at the first failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Resolving,
    BuildingPrompt,
    Invoking,
    Shaping,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Resolving => "resolving",
            Stage::BuildingPrompt => "building_prompt",
            Stage::Invoking => "invoking",
            Stage::Shaping => "shaping",
            Stage::Done => "done",
        }
    }
}

/// State shared by every pipeline derived from one builder.
struct Shared {
    config: Config,
    validator: RequestValidator,
    graph: DependencyGraph,
    prompts: PromptBuilder,
    client: ResilientClient,
    limiter: Arc<RateLimiter>,
    middleware: Vec<Arc<dyn Middleware>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

/// The code generation request pipeline.
///
/// Cheap to clone. Clones and [`Pipeline::for_task`] siblings share the
/// circuit breaker, rate limiter, dependency graph and middleware.
///
/// # Example
///
/// ```no_run
/// use codegen_pipeline::{Config, Pipeline, Task};
/// use codegen_pipeline::transport::TransportRequest;
/// use serde_json::json;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = Pipeline::builder(Config::new("gsk_...")).build()?;
/// let review = pipeline.for_task(Task::Review);
///
/// let req = TransportRequest::post_json(
///     "/generate",
///     &json!({"prompt": "reverse a list", "language": "python"}),
/// );
/// let resp = pipeline.handle(req).await;
/// println!("{} {}", resp.status, String::from_utf8_lossy(&resp.body));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
    task: Task,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("task", &self.task)
            .field("config", &self.shared.config)
            .field("nodes", &self.shared.graph.ids().collect::<Vec<_>>())
            .field(
                "middleware",
                &self.shared.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field("client", &self.shared.client)
            .finish()
    }
}

impl Pipeline {
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// A sibling pipeline for another task, sharing all state with this one.
    pub fn for_task(&self, task: Task) -> Pipeline {
        Pipeline {
            shared: self.shared.clone(),
            task,
        }
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        self.shared.client.breaker()
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.limiter
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.shared.graph
    }

    /// Service status and a breaker snapshot.
    pub fn health(&self) -> HealthReport {
        let status = match self.breaker().state() {
            BreakerState::Closed => ServiceStatus::Healthy,
            BreakerState::Open | BreakerState::HalfOpen => ServiceStatus::Degraded,
        };
        HealthReport {
            status,
            model: self.shared.config.model_id.clone(),
            circuit_breaker: self.breaker().snapshot(),
        }
    }

    /// Run one request through every stage.
    ///
    /// The request id is taken from the `x-request-id` header, or minted.
    pub async fn run(
        &self,
        raw: &RawRequest,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse> {
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();

        let outcome = self.run_stages(&request_id, raw, headers, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(_) => info!(request_id = %request_id, task = %self.task, elapsed_ms, "request served"),
            Err(PipelineError::Internal(detail)) => {
                error!(request_id = %request_id, task = %self.task, elapsed_ms, %detail, "request failed internally")
            }
            Err(e) => info!(
                request_id = %request_id,
                task = %self.task,
                elapsed_ms,
                kind = e.kind().as_str(),
                error = %e,
                "request failed"
            ),
        }
        emit(
            &self.shared.event_handler,
            Event::Finished {
                request_id,
                ok: outcome.is_ok(),
            },
        );
        outcome
    }

    /// Transport entry point: middleware, body decoding, run, shaping.
    pub async fn handle(&self, req: TransportRequest) -> TransportResponse {
        self.handle_with_cancel(req, &CancellationToken::new()).await
    }

    pub async fn handle_with_cancel(
        &self,
        mut req: TransportRequest,
        cancel: &CancellationToken,
    ) -> TransportResponse {
        let middleware = &self.shared.middleware;
        let mut ran = 0;
        let mut early = None;
        for m in middleware {
            ran += 1;
            if let Some(resp) = m.on_request(&mut req) {
                debug!(middleware = m.name(), status = resp.status.as_u16(), "middleware answered request");
                early = Some(resp);
                break;
            }
        }

        let mut resp = match early {
            Some(resp) => resp,
            None => self.respond(&req, cancel).await,
        };
        for m in middleware[..ran].iter().rev() {
            m.on_response(&req, &mut resp);
        }
        resp
    }

    async fn respond(&self, req: &TransportRequest, cancel: &CancellationToken) -> TransportResponse {
        let outcome = match parse_body(&req.body) {
            Ok(raw) => self.run(&raw, &req.headers, cancel).await,
            Err(e) => {
                debug!(path = %req.path, "request body is not a JSON object");
                Err(e.into())
            }
        };
        match outcome {
            Ok(body) => TransportResponse::json(StatusCode::OK, &body),
            Err(e) => TransportResponse::from_error(&e),
        }
    }

    async fn run_stages(
        &self,
        request_id: &str,
        raw: &RawRequest,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<GenerateResponse> {
        let shared = &self.shared;

        self.enter(request_id, Stage::Validating);
        let request = shared.validator.validate(raw)?;

        self.enter(request_id, Stage::Resolving);
        Resolution::new(&shared.graph, request_id, Arc::new(headers.clone()))
            .with_event_handler(shared.event_handler.clone())
            .resolve_all()
            .await?;

        self.enter(request_id, Stage::BuildingPrompt);
        let prompt = self.build_prompt(&request);

        self.enter(request_id, Stage::Invoking);
        let job = GenerationJob::new(
            &shared.config.model_id,
            prompt,
            request.max_tokens,
            request.temperature,
            shared.config.provider_max_tokens,
        );
        let deadline = Instant::now() + shared.config.request_deadline;
        let response = shared.client.invoke(&job, deadline, cancel).await?;

        self.enter(request_id, Stage::Shaping);
        let body = GenerateResponse {
            response: response.text,
        };

        self.enter(request_id, Stage::Done);
        Ok(body)
    }

    fn build_prompt(&self, request: &ValidatedRequest) -> String {
        let prompts = &self.shared.prompts;
        match self.task {
            Task::Generate => prompts.build(request.language, &request.context, &request.prompt),
            Task::Review => prompts.review(&request.prompt),
            Task::Explain => prompts.explain(&request.prompt),
        }
    }

    fn enter(&self, request_id: &str, stage: Stage) {
        debug!(request_id, stage = stage.as_str(), "stage entered");
        emit(
            &self.shared.event_handler,
            Event::StageEntered {
                request_id: request_id.to_string(),
                stage,
            },
        );
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    config: Config,
    task: Task,
    backend: Option<Arc<dyn Backend>>,
    http_client: Option<Client>,
    authenticator: Option<Arc<dyn Authenticator>>,
    middleware: Vec<Arc<dyn Middleware>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    nodes: Vec<DependencyNode>,
}

impl PipelineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            task: Task::Generate,
            backend: None,
            http_client: None,
            authenticator: None,
            middleware: Vec::new(),
            event_handler: None,
            nodes: Vec::new(),
        }
    }

    /// Task of the built pipeline. Default: [`Task::Generate`].
    pub fn task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    /// Provider backend. Default: [`OpenAiBackend`] with the configured key.
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// HTTP client for provider calls. Default: one built with `http_timeout`.
    pub fn http_client(mut self, client: Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Caller authenticator. Default: [`StaticKeyAuthenticator`] over
    /// `config.access_keys`.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Append a middleware. Order of calls is order of execution.
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Register an extra dependency node, resolved for every request
    /// alongside `auth` and `rate_limit`.
    pub fn dependency(mut self, node: DependencyNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate the configuration and graph, then assemble the pipeline.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigError> {
        let config = self.config;
        config.validate()?;

        let authenticator = self
            .authenticator
            .unwrap_or_else(|| Arc::new(StaticKeyAuthenticator::new(config.access_keys.clone())));
        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_threshold,
            config.rate_limit_window,
        ));
        let graph = self
            .nodes
            .into_iter()
            .fold(
                DependencyGraph::builder()
                    .node(auth_node(authenticator))
                    .node(rate_limit_node(limiter.clone())),
                |builder, node| builder.node(node),
            )
            .build()?;

        let breaker = Arc::new(
            CircuitBreaker::new(
                CircuitBreakerConfig::new()
                    .with_failure_threshold(config.circuit_breaker_threshold)
                    .with_cool_down(config.cool_down),
            )
            .with_event_handler(self.event_handler.clone()),
        );
        let backend = self.backend.unwrap_or_else(|| {
            Arc::new(OpenAiBackend::new().with_api_key(config.provider_api_key.clone()))
        });
        let mut client = ResilientClient::builder(config.provider_base_url.clone())
            .backend(backend)
            .backoff(config.backoff.clone())
            .breaker(breaker)
            .event_handler(self.event_handler.clone())
            .timeout(config.http_timeout);
        if let Some(http) = self.http_client {
            client = client.client(http);
        }
        let client = client.build()?;

        info!(
            model = %config.model_id,
            task = %self.task,
            nodes = graph.len(),
            middleware = self.middleware.len(),
            "pipeline built"
        );

        Ok(Pipeline {
            shared: Arc::new(Shared {
                validator: RequestValidator::new(&config),
                prompts: PromptBuilder::new(config.system_prompt.clone()),
                config,
                graph,
                client,
                limiter,
                middleware: self.middleware,
                event_handler: self.event_handler,
            }),
            task: self.task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackoffConfig, JitterStrategy, MockBackend};
    use crate::deps::{FnProducer, NodeInput};
    use crate::error::{DependencyError, GenerationError};
    use crate::events::RecordingHandler;
    use crate::middleware::{BodyLimit, RequestId};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn config() -> Config {
        Config::new("gsk_test").with_system_prompt("SYS")
    }

    fn pipeline_with(config: Config, mock: Arc<MockBackend>) -> Pipeline {
        Pipeline::builder(config).backend(mock).build().unwrap()
    }

    fn body(v: Value) -> RawRequest {
        v.as_object().cloned().unwrap_or_default()
    }

    async fn run(pipeline: &Pipeline, v: Value) -> Result<GenerateResponse> {
        pipeline
            .run(&body(v), &HeaderMap::new(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_success_end_to_end() {
        let mock = Arc::new(MockBackend::fixed("def reverse(xs): return xs[::-1]"));
        let pipeline = pipeline_with(config(), mock.clone());

        let resp = pipeline
            .handle(TransportRequest::post_json(
                "/generate",
                &json!({
                    "prompt": "Write a function to reverse a list",
                    "language": "PYTHON",
                    "max_tokens": "1500",
                    "temperature": 0.5
                }),
            ))
            .await;

        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            resp.body_json().unwrap(),
            json!({"response": "def reverse(xs): return xs[::-1]"})
        );
        assert_eq!(mock.calls(), 1);
        let job = mock.last_job().unwrap();
        assert_eq!(job.max_tokens, 1500);
        assert_eq!(job.model, "llama3-8b-8192");
        assert_eq!(
            job.prompt,
            "SYS\n\nTarget language: python\n\nInstruction: Write a function to reverse a list"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_attempts() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Timeout));
        let config = config().with_backoff(
            BackoffConfig::standard()
                .with_max_attempts(3)
                .with_jitter(JitterStrategy::None),
        );
        let pipeline = pipeline_with(config, mock.clone());

        let err = run(&pipeline, json!({"prompt": "x"})).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(GenerationError::Timeout)));
        assert_eq!(mock.calls(), 3);
        assert_eq!(pipeline.breaker().consecutive_failures(), 3);
        assert_eq!(pipeline.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_provider() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let pipeline = pipeline_with(config(), mock.clone());

        let resp = pipeline
            .handle(TransportRequest::post_json(
                "/generate",
                &json!({
                    "prompt": "",
                    "language": "python++",
                    "max_tokens": 5000,
                    "temperature": 1.5
                }),
            ))
            .await;

        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        let body = resp.body_json().unwrap();
        let fields: Vec<&str> = body["error"]["violations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["prompt", "language", "max_tokens", "temperature"]);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_object_body_is_bad_request() {
        let mock = Arc::new(MockBackend::fixed("unused"));
        let pipeline = pipeline_with(config(), mock.clone());
        let resp = pipeline
            .handle(TransportRequest::new(reqwest::Method::POST, "/generate").with_body(b"[1]".to_vec()))
            .await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST);
        assert_eq!(resp.body_json().unwrap()["error"]["violations"][0]["field"], "body");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_auth_required_when_keys_configured() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(config().with_access_key("caller-key", "alice"), mock.clone());

        let denied = pipeline
            .handle(TransportRequest::post_json("/generate", &json!({"prompt": "x"})))
            .await;
        assert_eq!(denied.status, StatusCode::UNAUTHORIZED);
        assert_eq!(denied.body_json().unwrap()["error"]["kind"], "unauthorized");

        let wrong = pipeline
            .handle(
                TransportRequest::post_json("/generate", &json!({"prompt": "x"}))
                    .with_header("authorization", "Bearer nope"),
            )
            .await;
        assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

        let allowed = pipeline
            .handle(
                TransportRequest::post_json("/generate", &json!({"prompt": "x"}))
                    .with_header("Authorization", "Bearer caller-key"),
            )
            .await;
        assert_eq!(allowed.status, StatusCode::OK);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(
            config().with_rate_limit(1, Duration::from_secs(60)),
            mock.clone(),
        );

        let first = pipeline
            .handle(TransportRequest::post_json("/generate", &json!({"prompt": "x"})))
            .await;
        assert_eq!(first.status, StatusCode::OK);

        let second = pipeline
            .handle(TransportRequest::post_json("/generate", &json!({"prompt": "x"})))
            .await;
        assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(second.header("retry-after").is_some());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_rejects_without_provider_contact() {
        let mock = Arc::new(MockBackend::failing(GenerationError::Provider {
            status: 500,
            message: "boom".into(),
        }));
        let config = config()
            .with_backoff(BackoffConfig::none())
            .with_circuit_breaker(1, Duration::from_secs(30));
        let pipeline = pipeline_with(config, mock.clone());

        let err = run(&pipeline, json!({"prompt": "x"})).await.unwrap_err();
        assert_eq!(err.kind().status_code(), 502);
        assert_eq!(pipeline.health().status, ServiceStatus::Degraded);

        let err = run(&pipeline, json!({"prompt": "x"})).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Generation(GenerationError::CircuitOpen { .. })
        ));
        assert_eq!(err.kind().status_code(), 503);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_for_task_shares_state_and_changes_prompt() {
        let mock = Arc::new(MockBackend::fixed("looks fine"));
        let generate = pipeline_with(config(), mock.clone());
        let review = generate.for_task(Task::Review);
        let explain = generate.for_task(Task::Explain);

        run(&review, json!({"prompt": "fn main() {}"})).await.unwrap();
        assert_eq!(
            mock.last_job().unwrap().prompt,
            "SYS\n\nReview this code and suggest improvements:\n\nfn main() {}"
        );

        run(&explain, json!({"prompt": "x = 1"})).await.unwrap();
        assert!(mock
            .last_job()
            .unwrap()
            .prompt
            .contains("Explain this code step by step:"));

        assert!(Arc::ptr_eq(generate.breaker(), review.breaker()));
        assert!(Arc::ptr_eq(generate.rate_limiter(), explain.rate_limiter()));
        assert_eq!(explain.task(), Task::Explain);
    }

    #[tokio::test]
    async fn test_stage_events_in_order() {
        let recorder = Arc::new(RecordingHandler::new());
        let pipeline = Pipeline::builder(config())
            .backend(Arc::new(MockBackend::fixed("ok")))
            .event_handler(recorder.clone())
            .build()
            .unwrap();

        let headers = {
            let mut h = HeaderMap::new();
            h.insert(REQUEST_ID_HEADER, "req-42".parse().unwrap());
            h
        };
        pipeline
            .run(&body(json!({"prompt": "x"})), &headers, &CancellationToken::new())
            .await
            .unwrap();

        let events = recorder.events();
        let stages: Vec<Stage> = events
            .iter()
            .filter_map(|e| match e {
                Event::StageEntered { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            stages,
            vec![
                Stage::Validating,
                Stage::Resolving,
                Stage::BuildingPrompt,
                Stage::Invoking,
                Stage::Shaping,
                Stage::Done
            ]
        );
        assert!(events.contains(&Event::NodeResolved {
            node: "auth".into(),
            ok: true
        }));
        assert_eq!(
            events.last(),
            Some(&Event::Finished {
                request_id: "req-42".into(),
                ok: true
            })
        );
    }

    #[tokio::test]
    async fn test_validation_failure_stops_at_first_stage() {
        let recorder = Arc::new(RecordingHandler::new());
        let pipeline = Pipeline::builder(config())
            .backend(Arc::new(MockBackend::fixed("ok")))
            .event_handler(recorder.clone())
            .build()
            .unwrap();
        run(&pipeline, json!({})).await.unwrap_err();

        let stages: Vec<Stage> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::StageEntered { stage, .. } => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(stages, vec![Stage::Validating]);
    }

    #[tokio::test]
    async fn test_middleware_order_and_short_circuit() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = Pipeline::builder(config())
            .backend(mock.clone())
            .middleware(Arc::new(RequestId))
            .middleware(Arc::new(BodyLimit::new(64)))
            .build()
            .unwrap();

        let ok = pipeline
            .handle(TransportRequest::post_json("/generate", &json!({"prompt": "x"})))
            .await;
        assert_eq!(ok.status, StatusCode::OK);
        assert!(ok.header(REQUEST_ID_HEADER).is_some());

        let big = "y".repeat(200);
        let rejected = pipeline
            .handle(
                TransportRequest::post_json("/generate", &json!({"prompt": big}))
                    .with_header(REQUEST_ID_HEADER, "caller-id"),
            )
            .await;
        assert_eq!(rejected.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(rejected.header(REQUEST_ID_HEADER), Some("caller-id"));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_custom_dependency_failure_is_internal() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = Pipeline::builder(config())
            .backend(mock.clone())
            .dependency(
                DependencyNode::new(
                    "quota",
                    FnProducer(|_: NodeInput| async {
                        Err::<Value, _>(DependencyError::Failed {
                            node: "quota".into(),
                            message: "store offline".into(),
                        })
                    }),
                )
                .depends_on("auth"),
            )
            .build()
            .unwrap();

        let resp = pipeline
            .handle(TransportRequest::post_json("/generate", &json!({"prompt": "x"})))
            .await;
        assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!String::from_utf8_lossy(&resp.body).contains("store offline"));
        assert_eq!(mock.calls(), 0);
    }

    #[test]
    fn test_build_rejects_cyclic_dependencies() {
        let noop = |_: NodeInput| async { Ok::<_, DependencyError>(Value::Null) };
        let err = Pipeline::builder(config())
            .backend(Arc::new(MockBackend::fixed("ok")))
            .dependency(DependencyNode::new("a", FnProducer(noop)).depends_on("b"))
            .dependency(DependencyNode::new("b", FnProducer(noop)).depends_on("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DependencyCycle { .. }));
    }

    #[test]
    fn test_build_rejects_bad_config() {
        let err = Pipeline::builder(Config::default()).build().unwrap_err();
        assert_eq!(err, ConfigError::MissingSetting("provider_api_key"));
    }

    #[tokio::test]
    async fn test_cancelled_before_invocation() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(config(), mock.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let resp = pipeline
            .handle_with_cancel(
                TransportRequest::post_json("/generate", &json!({"prompt": "x"})),
                &cancel,
            )
            .await;
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.body_json().unwrap()["error"]["kind"], "cancelled");
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_health_report() {
        let pipeline = pipeline_with(config(), Arc::new(MockBackend::fixed("ok")));
        let report = pipeline.health();
        assert_eq!(report.status, ServiceStatus::Healthy);
        assert_eq!(report.model, "llama3-8b-8192");
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["circuit_breaker"]["state"], "closed");
    }

    #[tokio::test]
    async fn test_max_tokens_clamped_to_provider_ceiling() {
        let mock = Arc::new(MockBackend::fixed("ok"));
        let pipeline = pipeline_with(config().with_provider_max_tokens(1024), mock.clone());
        run(&pipeline, json!({"prompt": "x", "max_tokens": 4000}))
            .await
            .unwrap();
        assert_eq!(mock.last_job().unwrap().max_tokens, 1024);
    }
}
