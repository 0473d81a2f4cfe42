//! End-to-end tests exercising the SDK facade across session start, prompt,
//! branching, persistence, and sub-agent delegation — the same stack a CLI
//! or RPC client drives, without a transport in between.
use std::sync::Arc;
use std::time::Duration;

use relay_config::Config;
use relay_sdk::{FeatureToggle, FeaturesConfig, ProviderRegistry, RelaySdk, SessionConfig};

fn sdk() -> RelaySdk {
    RelaySdk::new(Arc::new(Config::default()), ProviderRegistry::new())
}

#[tokio::test]
async fn a_full_session_lifecycle_prompts_branches_and_persists() {
    let sdk = sdk();
    let cfg = SessionConfig { working_dir: "/tmp".into(), tools: vec!["echo".into()], ..Default::default() };
    sdk.start_session("session-a", cfg).await.unwrap();

    let reply = sdk.prompt_sync("session-a", "hello there", Duration::from_secs(10)).await.unwrap();
    assert!(reply.contains("hello there"));

    let path_before = sdk.get_path("session-a").await.unwrap();
    assert_eq!(path_before.len(), 2);
    let user_id = path_before[0].id.clone();

    sdk.branch("session-a", user_id.clone()).await.unwrap();
    sdk.prompt_sync("session-a", "a different question", Duration::from_secs(10)).await.unwrap();

    let tree = sdk.get_tree("session-a").await.unwrap();
    assert_eq!(tree[&user_id].children.len(), 2, "branching should fork, not overwrite");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session-a.json");
    sdk.save("session-a", path.clone()).await.unwrap();
    assert_eq!(sdk.list_saved_sessions(dir.path()).unwrap(), vec!["session-a".to_string()]);

    sdk.shutdown_all().await;
}

#[tokio::test]
async fn sub_agent_delegation_produces_a_nested_event_stream() {
    let sdk = sdk();
    let cfg = SessionConfig {
        working_dir: "/tmp".into(),
        tools: vec!["echo".into()],
        features: FeaturesConfig { sub_agents: FeatureToggle { enabled: true, ..Default::default() }, ..Default::default() },
        ..Default::default()
    };
    sdk.start_session("session-b", cfg).await.unwrap();

    let (_sub, mut rx) = sdk.events_subscribe("session-b");
    sdk.prompt("session-b", "hi").await.unwrap();

    let mut saw_agent_end = false;
    while let Ok(Some((_, event))) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        if matches!(event, relay_bus::Event::AgentEnd { .. }) {
            saw_agent_end = true;
            break;
        }
    }
    assert!(saw_agent_end);

    sdk.shutdown_all().await;
}

#[tokio::test]
async fn unknown_session_operations_all_error_consistently() {
    let sdk = sdk();
    assert!(sdk.prompt("ghost", "hi").await.is_err());
    assert!(sdk.steer("ghost", "hi").await.is_err());
    assert!(sdk.abort("ghost").await.is_err());
    assert!(sdk.get_state("ghost").await.is_err());
    assert!(sdk.get_path("ghost").await.is_err());
    assert!(sdk.branch("ghost", "m1").await.is_err());
}

#[tokio::test]
async fn forced_compaction_is_reachable_through_the_sdk() {
    let sdk = sdk();
    let cfg = SessionConfig { working_dir: "/tmp".into(), ..Default::default() };
    sdk.start_session("session-c", cfg).await.unwrap();
    sdk.prompt_sync("session-c", "hello", Duration::from_secs(10)).await.unwrap();

    let compacted = sdk.force_compact("session-c").await.unwrap();
    assert!(!compacted, "a two-message session has nothing old enough to cut");

    sdk.shutdown_all().await;
}
