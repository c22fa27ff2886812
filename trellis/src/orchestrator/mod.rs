//! Peer-agent fan-out with three completion semantics.
//!
//! Each call runs on a forked context (independent stack and sink, shared
//! identity and space, `AgentFork` referer). Results come back in input
//! order. A private done-token is closed exactly once on the terminal
//! transition; workers observe it and the request token before starting and
//! before sending, and every worker is joined before return so no task
//! leaks. Panics in a worker are recovered into an `error` string.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::llm::{CallResponse, StreamOptions};
use crate::message::Message;
use stream_event::AgentEvent;

/// One peer-agent call.
#[derive(Clone, Debug)]
pub struct CallRequest {
    pub agent_id: String,
    pub messages: Vec<Message>,
    pub options: StreamOptions,
}

impl CallRequest {
    pub fn new(agent_id: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            agent_id: agent_id.into(),
            messages,
            options: StreamOptions::default(),
        }
    }
}

/// Result of one call. `error` is `None` on success.
#[derive(Clone, Debug, Default)]
pub struct CallResult {
    pub agent_id: String,
    /// Extracted text: `next` (serialized verbatim when not a string) wins
    /// over `completion.content`.
    pub text: String,
    pub next: Option<Value>,
    pub error: Option<String>,
}

impl CallResult {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }

    fn from_response(agent_id: &str, response: CallResponse) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            text: response.output_text().unwrap_or_default(),
            next: response.next,
            error: None,
        }
    }

    fn failed(agent_id: &str, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            text: String::new(),
            next: None,
            error: Some(error.into()),
        }
    }
}

async fn run_call(ctx: &Context, req: &CallRequest) -> CallResult {
    let Some(caller) = ctx.capability().caller.clone() else {
        return CallResult::failed(&req.agent_id, "no agent caller registered");
    };
    ctx.sink().emit(AgentEvent::AgentCall {
        agent_id: req.agent_id.clone(),
    });
    match caller
        .stream(ctx, &req.agent_id, req.messages.clone(), req.options.clone())
        .await
    {
        Ok(response) => CallResult::from_response(&req.agent_id, response),
        Err(e) => CallResult::failed(&req.agent_id, e.to_string()),
    }
}

struct Workers {
    handles: Vec<(usize, String, tokio::task::JoinHandle<()>)>,
    rx: mpsc::Receiver<(usize, CallResult)>,
    done: CancellationToken,
}

/// Spawns one worker per request. Workers check both tokens before starting
/// and again before sending, so a terminal transition suppresses late
/// side effects.
fn spawn_workers(ctx: &Context, reqs: &[CallRequest]) -> Workers {
    let done = CancellationToken::new();
    let (tx, rx) = mpsc::channel(reqs.len().max(1));
    let mut handles = Vec::with_capacity(reqs.len());

    for (index, req) in reqs.iter().enumerate() {
        let fork = ctx.fork();
        let req = req.clone();
        let agent_id = req.agent_id.clone();
        let done = done.clone();
        let cancel = ctx.cancel_token().clone();
        let tx = tx.clone();
        let handle = tokio::spawn(async move {
            if done.is_cancelled() || cancel.is_cancelled() {
                return;
            }
            let result = tokio::select! {
                _ = done.cancelled() => return,
                _ = cancel.cancelled() => return,
                result = run_call(&fork, &req) => result,
            };
            if done.is_cancelled() || cancel.is_cancelled() {
                return;
            }
            let _ = tx.send((index, result)).await;
        });
        handles.push((index, agent_id, handle));
    }

    Workers { handles, rx, done }
}

/// Joins every worker; a panicked worker fills its slot with an error result
/// unless a real result already landed there.
async fn join_all(
    handles: Vec<(usize, String, tokio::task::JoinHandle<()>)>,
    results: &mut [Option<CallResult>],
) {
    let joined = futures::future::join_all(
        handles
            .into_iter()
            .map(|(index, agent_id, handle)| async move { (index, agent_id, handle.await) }),
    )
    .await;
    for (index, agent_id, outcome) in joined {
        if let Err(e) = outcome {
            if e.is_panic() && results[index].is_none() {
                let payload = e.into_panic();
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                results[index] = Some(CallResult::failed(&agent_id, format!("panic: {}", reason)));
            }
        }
    }
}

/// Waits for every call to complete. Results are aligned by input index.
pub async fn call_all(ctx: &Context, reqs: Vec<CallRequest>) -> Vec<CallResult> {
    let n = reqs.len();
    let Workers {
        handles,
        mut rx,
        done: _done,
    } = spawn_workers(ctx, &reqs);

    let mut results: Vec<Option<CallResult>> = (0..n).map(|_| None).collect();
    for _ in 0..n {
        match rx.recv().await {
            Some((index, result)) => results[index] = Some(result),
            None => break,
        }
    }
    join_all(handles, &mut results).await;

    results
        .into_iter()
        .zip(reqs)
        .map(|(slot, req)| {
            slot.unwrap_or_else(|| CallResult::failed(&req.agent_id, "call did not complete"))
        })
        .collect()
}

/// Returns when the first successful call completes. Pending calls are
/// signaled to stop; results already received are included, remaining slots
/// are `None`.
pub async fn call_any(ctx: &Context, reqs: Vec<CallRequest>) -> Vec<Option<CallResult>> {
    finish_early(ctx, reqs, true).await
}

/// Returns when the first call completes, success or failure.
pub async fn call_race(ctx: &Context, reqs: Vec<CallRequest>) -> Vec<Option<CallResult>> {
    finish_early(ctx, reqs, false).await
}

async fn finish_early(
    ctx: &Context,
    reqs: Vec<CallRequest>,
    require_success: bool,
) -> Vec<Option<CallResult>> {
    let n = reqs.len();
    let Workers {
        handles,
        mut rx,
        done,
    } = spawn_workers(ctx, &reqs);

    let mut results: Vec<Option<CallResult>> = (0..n).map(|_| None).collect();
    let mut received = 0;
    while received < n {
        match rx.recv().await {
            Some((index, result)) => {
                received += 1;
                let terminal = !require_success || result.ok();
                results[index] = Some(result);
                if terminal {
                    break;
                }
            }
            None => break,
        }
    }
    // Terminal transition: closed exactly once, before the workers are joined.
    done.cancel();

    // Include results that raced in before the signal landed.
    while let Ok((index, result)) = rx.try_recv() {
        results[index].get_or_insert(result);
    }

    join_all(handles, &mut results).await;
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Capability, Context, Identity, Referer};
    use crate::llm::{
        AgentCaller, CallerError, Completion, CompletionContent, MockCaller, StreamOptions,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx_with(caller: Arc<dyn AgentCaller>) -> Context {
        Context::new(Identity::default()).with_capability(Capability {
            caller: Some(caller),
            model: Default::default(),
        })
    }

    /// Caller that sleeps per agent id, fails ids starting with "fail",
    /// panics on ids starting with "panic".
    struct ScriptedCaller {
        started: AtomicUsize,
    }

    #[async_trait]
    impl AgentCaller for ScriptedCaller {
        async fn stream(
            &self,
            ctx: &Context,
            agent_id: &str,
            _messages: Vec<Message>,
            _options: StreamOptions,
        ) -> Result<CallResponse, CallerError> {
            assert_eq!(ctx.referer, Referer::AgentFork);
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = agent_id.strip_prefix("slow-") {
                let ms: u64 = ms.parse().unwrap_or(50);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if agent_id.starts_with("panic") {
                panic!("worker exploded");
            }
            if agent_id.starts_with("fail") {
                return Err(CallerError::Other(format!("{} failed", agent_id)));
            }
            Ok(CallResponse {
                completion: Some(Completion {
                    content: CompletionContent::Text(format!("answer from {}", agent_id)),
                }),
                next: None,
            })
        }
    }

    fn scripted() -> Arc<ScriptedCaller> {
        Arc::new(ScriptedCaller {
            started: AtomicUsize::new(0),
        })
    }

    /// **Scenario**: All returns results in input order regardless of
    /// completion order; a panic in one call surfaces as an error without
    /// affecting the others.
    #[tokio::test]
    async fn all_preserves_order_and_recovers_panics() {
        let ctx = ctx_with(scripted());
        let reqs = vec![
            CallRequest::new("slow-40", vec![Message::user("a")]),
            CallRequest::new("panic-b", vec![Message::user("b")]),
            CallRequest::new("quick", vec![Message::user("c")]),
        ];
        let results = call_all(&ctx, reqs).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].agent_id, "slow-40");
        assert_eq!(results[0].text, "answer from slow-40");
        assert!(results[0].ok());
        assert!(results[1].error.as_deref().unwrap().contains("panic"));
        assert!(results[2].ok());
    }

    #[tokio::test]
    async fn all_populates_error_for_failed_calls() {
        let ctx = ctx_with(scripted());
        let results = call_all(
            &ctx,
            vec![
                CallRequest::new("fail-x", vec![]),
                CallRequest::new("ok", vec![]),
            ],
        )
        .await;
        assert_eq!(results[0].error.as_deref(), Some("caller: fail-x failed"));
        assert!(results[1].ok());
    }

    /// **Scenario**: Any returns on the first success; at least one result
    /// has an empty error.
    #[tokio::test]
    async fn any_returns_on_first_success() {
        let ctx = ctx_with(scripted());
        let results = call_any(
            &ctx,
            vec![
                CallRequest::new("slow-200", vec![]),
                CallRequest::new("quick", vec![]),
            ],
        )
        .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().flatten().any(|r| r.ok()));
        // The slow worker was signaled; its slot may be empty.
        let quick = results[1].as_ref().unwrap();
        assert_eq!(quick.text, "answer from quick");
    }

    /// **Scenario**: Any keeps failures received before the first success.
    #[tokio::test]
    async fn any_includes_earlier_failures() {
        let ctx = ctx_with(scripted());
        let results = call_any(
            &ctx,
            vec![
                CallRequest::new("fail-a", vec![]),
                CallRequest::new("slow-30", vec![]),
            ],
        )
        .await;
        assert!(results[0].as_ref().unwrap().error.is_some());
        assert!(results[1].as_ref().unwrap().ok());
    }

    /// **Scenario**: Race returns on the first completion even when it is a
    /// failure.
    #[tokio::test]
    async fn race_returns_first_completion_even_failed() {
        let ctx = ctx_with(scripted());
        let results = call_race(
            &ctx,
            vec![
                CallRequest::new("fail-now", vec![]),
                CallRequest::new("slow-200", vec![]),
            ],
        )
        .await;
        assert!(results[0].as_ref().unwrap().error.is_some());
        assert!(results[1].is_none());
    }

    /// **Scenario**: workers that never started (done observed first) leave
    /// no side effects; the orchestrator still joins them all.
    #[tokio::test]
    async fn canceled_request_stops_workers() {
        let caller = scripted();
        let ctx = ctx_with(caller.clone());
        ctx.cancel_token().cancel();
        let results = call_any(
            &ctx,
            vec![
                CallRequest::new("quick", vec![]),
                CallRequest::new("quick", vec![]),
            ],
        )
        .await;
        assert!(results.iter().all(|r| r.is_none()));
        assert_eq!(caller.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_caller_yields_error_results() {
        let ctx = Context::new(Identity::default());
        let results = call_all(&ctx, vec![CallRequest::new("a", vec![])]).await;
        assert_eq!(
            results[0].error.as_deref(),
            Some("no agent caller registered")
        );
    }

    #[tokio::test]
    async fn result_extraction_prefers_next() {
        let caller = Arc::new(MockCaller::new("ignored"));
        caller.respond(
            "hooked",
            CallResponse {
                completion: Some(Completion {
                    content: CompletionContent::Text("standard".into()),
                }),
                next: Some(serde_json::json!({"route": "custom"})),
            },
        );
        let ctx = ctx_with(caller);
        let results = call_all(&ctx, vec![CallRequest::new("hooked", vec![])]).await;
        assert_eq!(results[0].text, r#"{"route":"custom"}"#);
        assert_eq!(results[0].next, Some(serde_json::json!({"route": "custom"})));
    }
}
