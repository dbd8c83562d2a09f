// Integration tests for the agent
//
// Requests use the sleep toolchain so queueing and rejection can be
// observed without spawning compilers.
//
// Run with: cargo test -p kubecc-agent --test agent_test

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kubecc_agent::{Agent, AgentConfig, AgentError};
use kubecc_core::{
    CompileRequest, CompileResult, Component, QueueStatus, RetryAction, ServerContext, Toolchain,
    UsageLimits,
};
use kubecc_run::toolchain::sleep;
use kubecc_run::{Querier, RequestError};
use tokio_util::sync::CancellationToken;

async fn agent(limits: UsageLimits) -> Agent {
    let agent = Agent::new(
        ServerContext::new(Component::Agent),
        AgentConfig::default().with_usage_limits(limits),
    );
    agent.set_usage_limits(limits).await.unwrap();
    agent
        .add_toolchain(Path::new("/kubecc-test/agent/sleep"), Arc::new(sleep::querier()))
        .await
        .unwrap();
    agent
}

/// The sleep toolchain as a consumer would describe it
async fn consumer_toolchain() -> Toolchain {
    sleep::querier()
        .query(Path::new("/kubecc-test/consumer/sleep"))
        .await
        .unwrap()
}

async fn sleep_request(duration: &str) -> CompileRequest {
    CompileRequest::new(consumer_toolchain().await, vec![duration.to_string()], Vec::new())
}

#[test_log::test(tokio::test)]
async fn test_compile_matches_toolchain() {
    let agent = agent(UsageLimits::new(2)).await;
    let request = sleep_request("10ms").await;
    let id = request.request_id;

    let response = agent.compile(request, CancellationToken::new()).await.unwrap();
    assert_eq!(response.request_id, id);
    assert_eq!(response.result, CompileResult::Success);

    agent.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_unknown_toolchain_is_rejected() {
    let agent = agent(UsageLimits::new(1)).await;
    let mut request = sleep_request("10ms").await;
    request.toolchain = request.toolchain.with_version("99.0");

    assert!(matches!(
        agent.compile(request, CancellationToken::new()).await,
        Err(AgentError::InvalidArgument(_))
    ));

    agent.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_bad_arguments_fail_the_compile() {
    let agent = agent(UsageLimits::new(1)).await;
    let response = agent
        .compile(sleep_request("later").await, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.result, CompileResult::InternalError);

    agent.shutdown().await;
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_full_queue_asks_for_retry() {
    let limits = UsageLimits::new(1)
        .with_queue_pressure_multiplier(1.0)
        .with_queue_reject_multiplier(1.0);
    let agent = Arc::new(agent(limits).await);

    let mut running = Vec::new();
    for _ in 0..2 {
        let agent = agent.clone();
        let request = sleep_request("300ms").await;
        running.push(tokio::spawn(async move {
            agent.compile(request, CancellationToken::new()).await
        }));
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while agent.status() != QueueStatus::QueueFull {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue never filled");

    let response = agent
        .compile(sleep_request("10ms").await, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.result, CompileResult::Retry);
    assert_eq!(response.retry_action, RetryAction::Retry);

    for handle in running {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.result, CompileResult::Success);
    }
    agent.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_cancel_compile() {
    let agent = agent(UsageLimits::new(1)).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(2),
        agent.compile(sleep_request("10s").await, cancel),
    )
    .await
    .unwrap();
    assert_eq!(result, Err(AgentError::Request(RequestError::Cancelled)));

    agent.shutdown().await;
}
