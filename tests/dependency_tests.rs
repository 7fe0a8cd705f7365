mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use anyhow::anyhow;
use common::*;
use genai_api::app::{Completion, CompletionProvider, CompletionRequest, Settings, Tier};
use serde_json::json;

/// Provider that counts calls and fails on demand.
struct CountingProvider {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl CompletionProvider for CountingProvider {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn complete(&self, _request: &CompletionRequest<'_>) -> anyhow::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("upstream connection reset"));
        }
        Ok(Completion {
            content: "ok".to_string(),
            output_tokens: 3,
        })
    }

    fn estimated_output_tokens(&self, _routed: bool) -> u64 {
        3
    }
}

fn counting_state(settings: Settings, fail: bool) -> (Arc<genai_api::app::AppState>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = state_with_settings(settings).with_provider(Box::new(CountingProvider {
        calls: Arc::clone(&calls),
        fail,
    }));
    (Arc::new(state), calls)
}

#[test]
fn test_settings_loaded_once_per_chat_request() {
    let state = state();
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(PRO_KEY),
        &chat_body(Some("gpt-4"), "hello there", 500),
    ));
    assert_eq!(resp.status, 201, "{}", resp.body);
    // requested_model, token_ceiling, provider_credential and rate_limit all share it
    assert_eq!(state.settings_loads(), 1);

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(PRO_KEY),
        &chat_body(None, "again", 500),
    ));
    assert_eq!(resp.status, 201);
    assert_eq!(state.settings_loads(), 2);
}

#[test]
fn test_missing_key_stops_before_any_other_step() {
    let (state, calls) = counting_state(Settings::default(), false);
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        None,
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 401);
    assert_eq!(resp.body["detail"], "Missing API Key");
    assert_eq!(state.settings_loads(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(state.users.by_key(FREE_KEY).unwrap().tokens_used, 250);
}

#[test]
fn test_ceiling_failure_skips_later_steps_and_handler() {
    let (state, calls) = counting_state(
        Settings {
            rate_limit: 1,
            ..Settings::default()
        },
        false,
    );
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(FREE_KEY),
        &chat_body(Some("gpt-4"), "hi", 2000),
    ));
    assert_eq!(resp.status, 403);
    assert_eq!(
        resp.body["detail"],
        "Free tier users can only request up to 1000 max tokens"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(state.users.by_key(FREE_KEY).unwrap().tokens_used, 250);

    // The rate window was never touched, so the single allowed request remains
    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(FREE_KEY),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 201, "{}", resp.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_provider_failure_is_503_and_not_charged() {
    let (state, calls) = counting_state(Settings::default(), true);
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(PRO_KEY),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 503);
    assert_eq!(resp.body["error"], "service_unavailable");
    assert_eq!(resp.body["detail"], "External service is temporarily unavailable");
    assert!(!resp.body.to_string().contains("connection reset"));
    assert!(header(&resp, "retry-after").is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.users.by_key(PRO_KEY).unwrap().tokens_used, 1500);
}

#[test]
fn test_successful_chat_charges_usage() {
    let (state, _calls) = counting_state(Settings::default(), false);
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(FREE_KEY),
        &json!({"messages": [{"role": "user", "content": "one two three"}]}),
    ));
    assert_eq!(resp.status, 201, "{}", resp.body);
    assert_eq!(resp.body["tokens_used"]["input"], 3);
    assert_eq!(resp.body["tokens_used"]["output"], 3);
    assert_eq!(state.users.by_key(FREE_KEY).unwrap().tokens_used, 256);
}

#[test]
fn test_missing_provider_key_fails_credential_step() {
    let state = Arc::new(state_with_settings(Settings {
        openai_api_key: String::new(),
        ..Settings::default()
    }));
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(PRO_KEY),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 503);

    // Meta models take no key
    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some(PRO_KEY),
        &chat_body(Some("llama-3.1"), "hi", 100),
    ));
    assert_eq!(resp.status, 201, "{}", resp.body);
}

#[test]
fn test_chat_plan_reports_dependency_order() {
    let dispatcher = dispatcher(state());
    let order = dispatcher.plan("create_provider_chat").unwrap().unwrap();
    assert_eq!(
        order,
        vec![
            "api_key",
            "current_user",
            "chat_body",
            "routed_provider",
            "provider_model",
            "settings",
            "token_ceiling",
            "provider_credential",
            "token_usage",
            "rate_limit",
        ]
    );
    assert!(dispatcher.plan("no_such_handler").is_none());
}

#[test]
fn test_quota_and_budget_checks() {
    let state = with_users(
        state_with_settings(Settings::default()),
        vec![
            ("spent", user(10, Tier::Pro, 5000, 5000)),
            ("nearly", user(11, Tier::Pro, 4995, 5000)),
        ],
    );
    let dispatcher = dispatcher(Arc::new(state));

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some("spent"),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 403);
    assert_eq!(resp.body["error"], "quota_exceeded");
    assert_eq!(resp.body["remaining_tokens"], 0);

    // 2 input + 10 estimated output > 5 remaining
    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some("nearly"),
        &chat_body(Some("gpt-4"), "hi there", 100),
    ));
    assert_eq!(resp.status, 429);
    assert_eq!(resp.body["error"], "token_budget_exceeded");
    assert!(header(&resp, "retry-after").is_some());
}

#[test]
fn test_routed_chat_budget_counts_routed_output() {
    // 12 left: "hi" costs 1 + 10 directly, 1 + 15 through a named provider
    let state = with_users(
        state_with_settings(Settings::default()),
        vec![("tight", user(12, Tier::Pro, 4988, 5000))],
    );
    let state = Arc::new(state);
    let dispatcher = dispatcher(Arc::clone(&state));

    let resp = dispatcher.dispatch(post(
        "/providers/openai/chat",
        Some("tight"),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 429, "{}", resp.body);
    assert_eq!(resp.body["error"], "token_budget_exceeded");
    assert_eq!(resp.body["requested_tokens"], 16);
    assert_eq!(resp.body["remaining_tokens"], 12);
    assert_eq!(state.users.by_key("tight").unwrap().tokens_used, 4988);

    let resp = dispatcher.dispatch(post(
        "/chat/completions",
        Some("tight"),
        &chat_body(Some("gpt-4"), "hi", 100),
    ));
    assert_eq!(resp.status, 201, "{}", resp.body);
    assert_eq!(state.users.by_key("tight").unwrap().tokens_used, 4999);
}

#[test]
fn test_concurrent_chats_never_exceed_token_limit() {
    let state = with_users(
        state_with_settings(Settings {
            rate_limit: 0,
            ..Settings::default()
        }),
        vec![("tight", user(12, Tier::Pro, 4988, 5000))],
    );
    let state = Arc::new(state);
    let dispatcher = Arc::new(dispatcher(Arc::clone(&state)));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let req = post("/chat/completions", Some("tight"), &chat_body(Some("gpt-4"), "hi", 100));
                barrier.wait();
                dispatcher.dispatch(req).status
            })
        })
        .collect();
    let statuses: Vec<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(statuses.iter().filter(|s| **s == 201).count(), 1, "{statuses:?}");
    assert!(statuses.iter().all(|s| *s == 201 || *s == 429), "{statuses:?}");
    let used = state.users.by_key("tight").unwrap().tokens_used;
    assert_eq!(used, 4999);
}
