// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use relay_sdk::{RelaySdk, SessionConfig, ThinkingLevel};
use serde_json::{json, Value};

use crate::protocol::{Request, Response, INVALID_PARAMS, METHOD_NOT_FOUND};

/// Methods named in the external protocol that this core deliberately
/// doesn't implement — auth, opal config, task lists, device-code OAuth,
/// MCP bridging. Kept explicit so the method table documents what's out of
/// scope rather than silently 404ing on everything unfamiliar.
const UNIMPLEMENTED_METHODS: &[&str] = &[
    "thinking/set",
    "models/list",
    "tasks/list",
    "opal/config/get",
    "opal/config/set",
    "opal/ping",
    "opal/version",
    "auth/status",
    "auth/set_key",
    "auth/poll",
    "settings/get",
    "settings/save",
];

fn param<T: serde::de::DeserializeOwned>(params: &Value, field: &str) -> Result<T, String> {
    params
        .get(field)
        .cloned()
        .ok_or_else(|| format!("missing param '{field}'"))
        .and_then(|v| serde_json::from_value(v).map_err(|e| format!("invalid param '{field}': {e}")))
}

/// Handles one request against `sdk`, returning the `Response` to write
/// back. Notifications for session events are pushed separately by the
/// caller's subscription loop, not from here.
pub async fn dispatch(sdk: &RelaySdk, req: Request) -> Response {
    let id = req.id.clone().unwrap_or(Value::Null);
    match handle(sdk, &req.method, req.params).await {
        Ok(result) => Response::ok(id, result),
        Err(DispatchError::NotFound) => Response::err(id, METHOD_NOT_FOUND, format!("method not found: {}", req.method)),
        Err(DispatchError::InvalidParams(msg)) => Response::err(id, INVALID_PARAMS, msg),
        Err(DispatchError::Internal(msg)) => Response::err(id, crate::protocol::INTERNAL_ERROR, msg),
    }
}

enum DispatchError {
    NotFound,
    InvalidParams(String),
    Internal(String),
}

async fn handle(sdk: &RelaySdk, method: &str, params: Value) -> Result<Value, DispatchError> {
    if UNIMPLEMENTED_METHODS.contains(&method) {
        return Err(DispatchError::NotFound);
    }

    match method {
        "session/start" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let config: SessionConfig = param(&params, "config").map_err(DispatchError::InvalidParams)?;
            sdk.start_session(&session_id, config).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "session_id": session_id }))
        }
        "session/branch" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let message_id: String = param(&params, "message_id").map_err(DispatchError::InvalidParams)?;
            sdk.branch(&session_id, message_id).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "ok": true }))
        }
        "session/compact" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let compacted = sdk.force_compact(&session_id).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "compacted": compacted }))
        }
        "session/list" => {
            let active = sdk.list_active_sessions().await;
            Ok(json!({ "active": active }))
        }
        "session/delete" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            sdk.stop_session(&session_id).await;
            Ok(json!({ "ok": true }))
        }
        "agent/prompt" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let text: String = param(&params, "text").map_err(DispatchError::InvalidParams)?;
            sdk.prompt(&session_id, text).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "ok": true }))
        }
        "agent/prompt_sync" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let text: String = param(&params, "text").map_err(DispatchError::InvalidParams)?;
            let timeout_secs: u64 = params.get("timeout_secs").and_then(Value::as_u64).unwrap_or(60);
            let text = sdk
                .prompt_sync(&session_id, text, Duration::from_secs(timeout_secs))
                .await
                .map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "text": text }))
        }
        "agent/steer" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let text: String = param(&params, "text").map_err(DispatchError::InvalidParams)?;
            sdk.steer(&session_id, text).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "ok": true }))
        }
        "agent/abort" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            sdk.abort(&session_id).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "ok": true }))
        }
        "agent/state" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let state = sdk.get_state(&session_id).await.map_err(|e| DispatchError::Internal(e.to_string()))?;
            serde_json::to_value(state).map_err(|e| DispatchError::Internal(e.to_string()))
        }
        "model/set" => {
            let session_id: String = param(&params, "session_id").map_err(DispatchError::InvalidParams)?;
            let provider_tag: String = param(&params, "provider_tag").map_err(DispatchError::InvalidParams)?;
            let model_id: String = param(&params, "model_id").map_err(DispatchError::InvalidParams)?;
            let thinking_level: ThinkingLevel = params
                .get("thinking_level")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e: serde_json::Error| DispatchError::InvalidParams(e.to_string()))?
                .unwrap_or_default();
            sdk.set_model(&session_id, &provider_tag, &model_id, thinking_level)
                .await
                .map_err(|e| DispatchError::Internal(e.to_string()))?;
            Ok(json!({ "ok": true }))
        }
        _ => Err(DispatchError::NotFound),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relay_config::Config;
    use relay_sdk::ProviderRegistry;

    use super::*;

    fn sdk() -> RelaySdk {
        RelaySdk::new(Arc::new(Config::default()), ProviderRegistry::new())
    }

    fn req(method: &str, params: Value) -> Request {
        Request { jsonrpc: Some("2.0".into()), id: Some(json!(1)), method: method.into(), params }
    }

    #[tokio::test]
    async fn session_start_then_prompt_sync_round_trips() {
        let sdk = sdk();
        let resp = dispatch(&sdk, req("session/start", json!({ "session_id": "t1", "config": { "working_dir": "/tmp" } }))).await;
        assert!(resp.error.is_none());

        let resp = dispatch(&sdk, req("agent/prompt_sync", json!({ "session_id": "t1", "text": "hello" }))).await;
        let result = resp.result.expect("prompt_sync should succeed");
        assert!(result["text"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn unknown_session_yields_internal_error() {
        let sdk = sdk();
        let resp = dispatch(&sdk, req("agent/state", json!({ "session_id": "ghost" }))).await;
        assert!(resp.error.is_some());
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let sdk = sdk();
        let resp = dispatch(&sdk, req("bogus/method", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn named_unimplemented_method_is_method_not_found() {
        let sdk = sdk();
        let resp = dispatch(&sdk, req("auth/status", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_param_is_invalid_params() {
        let sdk = sdk();
        let resp = dispatch(&sdk, req("agent/prompt", json!({ "session_id": "t1" }))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn session_compact_forces_a_pass() {
        let sdk = sdk();
        dispatch(&sdk, req("session/start", json!({ "session_id": "t2", "config": { "working_dir": "/tmp" } }))).await;
        dispatch(&sdk, req("agent/prompt_sync", json!({ "session_id": "t2", "text": "hi" }))).await;

        let resp = dispatch(&sdk, req("session/compact", json!({ "session_id": "t2" }))).await;
        let result = resp.result.unwrap();
        assert_eq!(result["compacted"], json!(false));
    }
}
