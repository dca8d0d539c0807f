//! Example: running the pipeline against MockBackend, no provider needed.
//!
//! Run with: `cargo run --example mock_pipeline`

use codegen_pipeline::error::GenerationError;
use codegen_pipeline::events::{Event, FnEventHandler};
use codegen_pipeline::middleware::RequestId;
use codegen_pipeline::{BackoffConfig, Config, MockBackend, Pipeline, Task, TransportRequest};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // First call times out, the retry succeeds
    let mock = Arc::new(MockBackend::scripted(vec![
        Err(GenerationError::Timeout),
        Ok("def reverse(xs):\n    return xs[::-1]".to_string()),
    ]));

    let config = Config::new("not-used-by-the-mock").with_backoff(BackoffConfig::interactive());
    let pipeline = Pipeline::builder(config)
        .backend(mock.clone())
        .middleware(Arc::new(RequestId))
        .event_handler(Arc::new(FnEventHandler(|event: Event| match event {
            Event::StageEntered { stage, .. } => println!("[stage] {:?}", stage),
            Event::TransportRetry { attempt, delay, reason } => {
                println!("[retry] attempt {} in {:?}: {}", attempt, delay, reason)
            }
            _ => {}
        })))
        .build()?;

    let resp = pipeline
        .handle(TransportRequest::post_json(
            "/generate",
            &json!({"prompt": "Write a function to reverse a list", "language": "PY"}),
        ))
        .await;
    println!("status: {}", resp.status);
    println!("request id: {:?}", resp.header("x-request-id"));
    println!("body: {}", String::from_utf8_lossy(&resp.body));
    println!("provider calls: {}", mock.calls());

    // Same pipeline state, different prompt shape
    let explain = pipeline.for_task(Task::Explain);
    let resp = explain
        .handle(TransportRequest::post_json("/explain", &json!({"prompt": "x = [1, 2][::-1]"})))
        .await;
    println!("explain status: {}", resp.status);
    if let Some(job) = mock.last_job() {
        println!("last prompt:\n{}", job.prompt);
    }

    println!("health: {}", serde_json::to_string_pretty(&pipeline.health())?);
    Ok(())
}
