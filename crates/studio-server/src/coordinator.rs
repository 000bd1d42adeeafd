//! Single-flight request state machine.
//!
//! At most one studio request is active at a time. A request leaves the
//! active slot exactly once: by completion, timeout, submission failure, an
//! empty agent turn, or a forced clear. Timer callbacks carry the generation
//! they were armed for, so a timer firing after any other exit is a no-op.
//!
//! All broadcasts are issued while the state lock is held, which gives every
//! client the same global order of transitions.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use parking_lot::Mutex;
use studio_core::kind::is_structured_critique;
use studio_core::{AgentBridge, InitialDocument, LastResponse, RequestId, RequestKind, StudioError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::{
    STUDIO_REQUEST_DURATION_SECONDS, STUDIO_REQUEST_OUTCOMES_TOTAL, STUDIO_REQUESTS_TOTAL,
};
use crate::protocol::ServerMessage;
use crate::websocket::connection::ClientConnection;
use crate::websocket::registry::ConnectionRegistry;

/// Point-in-time view of the coordinator, as sent in `studio_state`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StudioSnapshot {
    /// Whether a new turn would be refused.
    pub busy: bool,
    /// Whether the agent is processing any turn.
    pub agent_busy: bool,
    /// The in-flight request.
    pub active_request_id: Option<RequestId>,
    /// Kind of the in-flight request.
    pub active_request_kind: Option<RequestKind>,
}

impl StudioSnapshot {
    /// The `studio_state` message for this snapshot.
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::StudioState {
            busy: self.busy,
            agent_busy: self.agent_busy,
            active_request_id: self.active_request_id.clone(),
            active_request_kind: self.active_request_kind,
        }
    }
}

struct ActiveRequest {
    id: RequestId,
    kind: RequestKind,
    started_at: Instant,
    generation: u64,
    timer: JoinHandle<()>,
}

impl ActiveRequest {
    /// Leave the active slot with `outcome`.
    fn retire(self, outcome: &'static str) -> (RequestId, RequestKind) {
        self.timer.abort();
        counter!(STUDIO_REQUEST_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
        histogram!(STUDIO_REQUEST_DURATION_SECONDS, "outcome" => outcome)
            .record(self.started_at.elapsed().as_secs_f64());
        info!(request_id = %self.id, kind = %self.kind, outcome, "request finished");
        (self.id, self.kind)
    }
}

#[derive(Default)]
struct State {
    active: Option<ActiveRequest>,
    agent_busy: bool,
    last_response: Option<LastResponse>,
    next_generation: u64,
}

impl State {
    fn snapshot(&self) -> StudioSnapshot {
        StudioSnapshot {
            busy: self.agent_busy || self.active.is_some(),
            agent_busy: self.agent_busy,
            active_request_id: self.active.as_ref().map(|a| a.id.clone()),
            active_request_kind: self.active.as_ref().map(|a| a.kind),
        }
    }
}

/// Owns the active request slot, the agent busy flag, and the last response.
pub struct RequestCoordinator {
    state: Mutex<State>,
    registry: Arc<ConnectionRegistry>,
    bridge: Arc<dyn AgentBridge>,
    timeout: Duration,
}

impl RequestCoordinator {
    /// Create an idle coordinator.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        bridge: Arc<dyn AgentBridge>,
        timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(State::default()),
            registry,
            bridge,
            timeout,
        }
    }

    /// The configured timeout window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current state.
    pub fn snapshot(&self) -> StudioSnapshot {
        self.state.lock().snapshot()
    }

    /// Whether a new turn or blocking action would be refused.
    pub fn is_busy(&self) -> bool {
        self.snapshot().busy
    }

    /// The cached last response.
    pub fn last_response(&self) -> Option<LastResponse> {
        self.state.lock().last_response.clone()
    }

    /// Claim the active slot for `request_id` and arm its timeout.
    ///
    /// Fails with [`StudioError::Busy`] if a request is already active or the
    /// agent is busy; nothing changes in that case. Returns the generation
    /// that identifies this activation.
    pub fn begin(self: &Arc<Self>, request_id: RequestId, kind: RequestKind) -> Result<u64, StudioError> {
        let mut state = self.state.lock();
        if let Some(active) = &state.active {
            return Err(StudioError::busy(format!(
                "request {} is still in progress",
                active.id
            )));
        }
        if state.agent_busy {
            return Err(StudioError::busy("the agent is busy with another turn"));
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let timer = self.arm_timer(generation);
        state.active = Some(ActiveRequest {
            id: request_id.clone(),
            kind,
            started_at: Instant::now(),
            generation,
            timer,
        });
        counter!(STUDIO_REQUESTS_TOTAL, "kind" => kind.as_str()).increment(1);
        info!(request_id = %request_id, kind = %kind, generation, "request started");

        let _ = self
            .registry
            .broadcast(&ServerMessage::RequestStarted { request_id, kind });
        let _ = self.registry.broadcast(&state.snapshot().to_message());
        Ok(generation)
    }

    /// [`begin`](Self::begin), then hand `prompt` to the agent.
    ///
    /// A submission failure unwinds the activation before returning
    /// [`StudioError::Submission`]; the caller reports it to the requester.
    pub fn start(
        self: &Arc<Self>,
        request_id: RequestId,
        kind: RequestKind,
        prompt: &str,
    ) -> Result<(), StudioError> {
        let generation = self.begin(request_id, kind)?;
        if let Err(e) = self.bridge.submit(prompt) {
            warn!(error = %e, generation, "prompt submission failed");
            let _ = self.cancel_on_submit_failure(generation);
            return Err(StudioError::Submission(e));
        }
        Ok(())
    }

    /// Unwind the activation `generation` after a failed submission.
    ///
    /// No error is broadcast; the requester alone is told by the caller.
    pub fn cancel_on_submit_failure(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let Some(active) = take_if(&mut state.active, generation) else {
            return false;
        };
        let _ = active.retire("submit_failed");
        let _ = self.registry.broadcast(&state.snapshot().to_message());
        true
    }

    /// Resolve the active request with the agent's answer.
    ///
    /// Returns `false` if no request was active.
    pub fn complete(&self, markdown: String) -> bool {
        let mut state = self.state.lock();
        let Some(active) = state.active.take() else {
            return false;
        };
        let (request_id, recorded) = active.retire("completed");
        let kind = if recorded == RequestKind::Critique && !is_structured_critique(&markdown) {
            warn!(request_id = %request_id, "critique reply lacks critique headings, showing as annotation");
            RequestKind::Annotation
        } else {
            recorded
        };

        let response = LastResponse::new(markdown, kind);
        let message = ServerMessage::Response {
            request_id,
            kind,
            markdown: response.markdown.clone(),
            timestamp: response.timestamp,
        };
        state.last_response = Some(response);
        let _ = self.registry.broadcast(&message);
        let _ = self.registry.broadcast(&state.snapshot().to_message());
        true
    }

    /// Timer callback for activation `generation`.
    ///
    /// A no-op unless that activation is still the active one.
    pub fn on_timeout(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let Some(active) = take_if(&mut state.active, generation) else {
            debug!(generation, "stale request timer ignored");
            return false;
        };
        let (request_id, _) = active.retire("timeout");
        let err = StudioError::Timeout {
            request_id,
            timeout_secs: self.timeout.as_secs(),
        };
        let _ = self.registry.broadcast(&ServerMessage::from_error(&err, None));
        let _ = self.registry.broadcast(&state.snapshot().to_message());
        true
    }

    /// Fail the active request because the agent's turn ended without text.
    pub fn agent_ended_without_response(&self) -> bool {
        let mut state = self.state.lock();
        let ended = self.fail_incomplete(&mut state);
        if ended {
            let _ = self.registry.broadcast(&state.snapshot().to_message());
        }
        ended
    }

    /// Record the agent busy flag and broadcast state.
    pub fn set_agent_busy(&self, busy: bool) {
        let mut state = self.state.lock();
        state.agent_busy = busy;
        let _ = self.registry.broadcast(&state.snapshot().to_message());
    }

    /// The agent finished a turn: clear the busy flag and fail an active
    /// request that never got an answer.
    pub fn turn_ended(&self) {
        let mut state = self.state.lock();
        state.agent_busy = false;
        let _ = self.fail_incomplete(&mut state);
        let _ = self.registry.broadcast(&state.snapshot().to_message());
    }

    /// Force the active request out, reset the agent busy flag, and
    /// broadcast state.
    ///
    /// Clients see an `error` naming the cleared request. Returns its ID.
    pub fn clear_active(&self, reason: &str) -> Option<RequestId> {
        let mut state = self.state.lock();
        state.agent_busy = false;
        let cleared = state.active.take().map(|active| {
            let (request_id, _) = active.retire("cancelled");
            let err = StudioError::Cancelled {
                request_id: request_id.clone(),
                reason: reason.to_string(),
            };
            let _ = self.registry.broadcast(&ServerMessage::from_error(&err, None));
            request_id
        });
        let _ = self.registry.broadcast(&state.snapshot().to_message());
        cleared
    }

    /// Agent output with no active request: cache it and notify every client.
    pub fn record_out_of_band(&self, markdown: String) -> LastResponse {
        let response = LastResponse::inferred(markdown);
        self.publish_last_response(response.clone());
        response
    }

    /// Replace the last response and push it as `latest_response`.
    pub fn publish_last_response(&self, response: LastResponse) {
        let mut state = self.state.lock();
        let _ = self.registry.broadcast(&ServerMessage::latest(&response));
        state.last_response = Some(response);
    }

    /// Replace the last response without notifying clients.
    pub fn seed_last_response(&self, response: Option<LastResponse>) {
        self.state.lock().last_response = response;
    }

    /// Answer a `hello` on `connection`.
    pub fn greet(&self, connection: &ClientConnection, initial_document: Option<InitialDocument>) -> bool {
        let state = self.state.lock();
        let snapshot = state.snapshot();
        let ack = ServerMessage::HelloAck {
            busy: snapshot.busy,
            agent_busy: snapshot.agent_busy,
            active_request_id: snapshot.active_request_id,
            active_request_kind: snapshot.active_request_kind,
            last_response: state.last_response.clone(),
            initial_document,
        };
        self.registry.unicast(connection, &ack)
    }

    /// Send the cached last response to `connection`.
    pub fn send_latest(&self, connection: &ClientConnection) -> bool {
        let state = self.state.lock();
        let message = match &state.last_response {
            Some(response) => ServerMessage::latest(response),
            None => ServerMessage::Error {
                request_id: None,
                code: studio_core::errors::PROTOCOL_ERROR,
                message: "no response has been produced yet".to_string(),
            },
        };
        self.registry.unicast(connection, &message)
    }

    fn fail_incomplete(&self, state: &mut State) -> bool {
        let Some(active) = state.active.take() else {
            return false;
        };
        let (request_id, _) = active.retire("incomplete");
        let err = StudioError::IncompleteTurn { request_id };
        let _ = self.registry.broadcast(&ServerMessage::from_error(&err, None));
        true
    }

    fn arm_timer(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let window = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(coordinator) = coordinator.upgrade() {
                let _ = coordinator.on_timeout(generation);
            }
        })
    }
}

fn take_if(slot: &mut Option<ActiveRequest>, generation: u64) -> Option<ActiveRequest> {
    if slot.as_ref().is_some_and(|a| a.generation == generation) {
        slot.take()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::Value;

    use crate::test_helpers::{FakeBridge, drain, make_client, rid};

    const CRITIQUE: &str = "## Assessment\nok\n\n## Critiques\n**C1** tighten\n\n## Document\n{C1} text";

    fn setup(timeout: Duration) -> (Arc<RequestCoordinator>, Arc<FakeBridge>, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let bridge = Arc::new(FakeBridge::new());
        let coordinator = Arc::new(RequestCoordinator::new(
            Arc::clone(&registry),
            bridge.clone(),
            timeout,
        ));
        (coordinator, bridge, registry)
    }

    fn types(messages: &[Value]) -> Vec<&str> {
        messages.iter().map(|m| m["type"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn begin_broadcasts_started_then_state() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");

        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["request_started", "studio_state"]);
        assert_eq!(msgs[0]["requestId"], "r1");
        assert_eq!(msgs[0]["kind"], "critique");
        assert_eq!(msgs[1]["busy"], true);
        assert_eq!(msgs[1]["activeRequestId"], "r1");
    }

    #[tokio::test]
    async fn second_begin_is_busy_and_first_stays_active() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");

        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        let _ = drain(&mut rx);
        let err = coordinator.begin(rid("r2"), RequestKind::Annotation).unwrap_err();

        assert_matches!(err, StudioError::Busy { .. });
        assert!(drain(&mut rx).is_empty(), "a refused begin broadcasts nothing");
        assert_eq!(coordinator.snapshot().active_request_id, Some(rid("r1")));
    }

    #[tokio::test]
    async fn begin_refused_while_agent_busy() {
        let (coordinator, _bridge, _registry) = setup(Duration::from_secs(300));
        coordinator.set_agent_busy(true);
        assert_matches!(
            coordinator.begin(rid("r1"), RequestKind::Direct),
            Err(StudioError::Busy { .. })
        );
        assert!(coordinator.snapshot().active_request_id.is_none());
    }

    #[tokio::test]
    async fn start_submits_prompt() {
        let (coordinator, bridge, _registry) = setup(Duration::from_secs(300));
        coordinator.start(rid("r1"), RequestKind::Direct, "hello agent").unwrap();
        assert_eq!(bridge.submitted(), ["hello agent"]);
        assert!(coordinator.is_busy());
    }

    #[tokio::test]
    async fn submit_failure_unwinds_to_idle() {
        let (coordinator, bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        bridge.fail_submissions(true);

        let err = coordinator
            .start(rid("r1"), RequestKind::Annotation, "x")
            .unwrap_err();

        assert_matches!(err, StudioError::Submission(_));
        assert!(!coordinator.is_busy());
        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["request_started", "studio_state", "studio_state"]);
        assert_eq!(msgs[2]["busy"], false);
        assert!(!types(&msgs).contains(&"error"), "submission errors go to the requester only");
    }

    #[tokio::test]
    async fn complete_broadcasts_response_and_caches_it() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        let _ = drain(&mut rx);

        assert!(coordinator.complete(CRITIQUE.to_string()));

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["response", "studio_state"]);
        assert_eq!(msgs[0]["requestId"], "r1");
        assert_eq!(msgs[0]["kind"], "critique");
        assert_eq!(msgs[1]["busy"], false);
        let cached = coordinator.last_response().unwrap();
        assert_eq!(cached.kind, RequestKind::Critique);
        assert_eq!(cached.markdown, CRITIQUE);
    }

    #[tokio::test]
    async fn unstructured_critique_reply_falls_back_to_annotation() {
        let (coordinator, _bridge, _registry) = setup(Duration::from_secs(300));
        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        assert!(coordinator.complete("Looks fine to me.".into()));
        assert_eq!(coordinator.last_response().unwrap().kind, RequestKind::Annotation);
    }

    #[tokio::test]
    async fn direct_reply_keeps_recorded_kind() {
        let (coordinator, _bridge, _registry) = setup(Duration::from_secs(300));
        let _ = coordinator.begin(rid("r1"), RequestKind::Direct).unwrap();
        assert!(coordinator.complete(CRITIQUE.into()));
        assert_eq!(coordinator.last_response().unwrap().kind, RequestKind::Direct);
    }

    #[tokio::test]
    async fn complete_without_active_request_is_noop() {
        let (coordinator, _bridge, _registry) = setup(Duration::from_secs(300));
        assert!(!coordinator.complete("late".into()));
        assert!(coordinator.last_response().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_broadcasts_error_then_idle_state() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        let _ = drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(301)).await;

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["error", "studio_state"]);
        assert_eq!(msgs[0]["requestId"], "r1");
        assert_eq!(msgs[0]["code"], "TIMEOUT");
        assert_eq!(msgs[1]["busy"], false);
        assert!(!coordinator.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_request_never_times_out() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let _ = coordinator.begin(rid("r1"), RequestKind::Annotation).unwrap();
        assert!(coordinator.complete("done".into()));
        let _ = drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn complete_then_timeout_emits_only_response() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let generation = coordinator.begin(rid("r1"), RequestKind::Annotation).unwrap();
        let _ = drain(&mut rx);

        assert!(coordinator.complete("answer".into()));
        assert!(!coordinator.on_timeout(generation));

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["response", "studio_state"]);
    }

    #[tokio::test]
    async fn timeout_then_complete_emits_only_error() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let generation = coordinator.begin(rid("r1"), RequestKind::Annotation).unwrap();
        let _ = drain(&mut rx);

        assert!(coordinator.on_timeout(generation));
        assert!(!coordinator.complete("too late".into()));

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["error", "studio_state"]);
        assert!(coordinator.last_response().is_none());
    }

    #[tokio::test]
    async fn stale_timer_does_not_cancel_newer_request() {
        let (coordinator, _bridge, _registry) = setup(Duration::from_secs(300));
        let first = coordinator.begin(rid("r1"), RequestKind::Annotation).unwrap();
        assert!(coordinator.complete("one".into()));
        let _ = coordinator.begin(rid("r2"), RequestKind::Annotation).unwrap();

        assert!(!coordinator.on_timeout(first));
        assert_eq!(coordinator.snapshot().active_request_id, Some(rid("r2")));
    }

    #[tokio::test]
    async fn turn_end_without_text_fails_request() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let _ = coordinator.begin(rid("r1"), RequestKind::Direct).unwrap();
        coordinator.set_agent_busy(true);
        let _ = drain(&mut rx);

        coordinator.turn_ended();

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["error", "studio_state"]);
        assert_eq!(msgs[0]["code"], "INCOMPLETE_TURN");
        assert_eq!(msgs[1]["busy"], false);
        assert_eq!(msgs[1]["agentBusy"], false);
    }

    #[tokio::test]
    async fn agent_ended_without_response_when_idle_is_noop() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        assert!(!coordinator.agent_ended_without_response());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn clear_active_reports_cancelled_request() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");
        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        coordinator.set_agent_busy(true);
        let _ = drain(&mut rx);

        assert_eq!(coordinator.clear_active("session switched"), Some(rid("r1")));

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["error", "studio_state"]);
        assert_eq!(msgs[0]["code"], "REQUEST_CANCELLED");
        assert_eq!(msgs[1]["busy"], false);
    }

    #[tokio::test]
    async fn out_of_band_output_infers_kind_and_notifies() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (_client, mut rx) = make_client(&registry, "c1");

        let recorded = coordinator.record_out_of_band(CRITIQUE.into());

        assert_eq!(recorded.kind, RequestKind::Critique);
        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["latest_response"]);
        assert_eq!(msgs[0]["kind"], "critique");
        assert_eq!(msgs[0]["markdown"], CRITIQUE);
    }

    #[tokio::test]
    async fn greet_reports_state_and_last_response() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (client, mut rx) = make_client(&registry, "c1");
        coordinator.seed_last_response(Some(LastResponse::new("prior", RequestKind::Annotation)));
        let _ = coordinator.begin(rid("r1"), RequestKind::Critique).unwrap();
        let _ = drain(&mut rx);

        assert!(coordinator.greet(&client, Some(InitialDocument::blank())));

        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["hello_ack"]);
        assert_eq!(msgs[0]["busy"], true);
        assert_eq!(msgs[0]["activeRequestId"], "r1");
        assert_eq!(msgs[0]["lastResponse"]["markdown"], "prior");
        assert_eq!(msgs[0]["initialDocument"]["source"], "blank");
    }

    #[tokio::test]
    async fn send_latest_without_response_is_error() {
        let (coordinator, _bridge, registry) = setup(Duration::from_secs(300));
        let (client, mut rx) = make_client(&registry, "c1");

        assert!(coordinator.send_latest(&client));
        assert_eq!(types(&drain(&mut rx)), ["error"]);

        coordinator.seed_last_response(Some(LastResponse::new("x", RequestKind::Direct)));
        assert!(coordinator.send_latest(&client));
        let msgs = drain(&mut rx);
        assert_eq!(types(&msgs), ["latest_response"]);
        assert_eq!(msgs[0]["kind"], "direct");
    }
}
