use serde::de::DeserializeOwned;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::gate::{release, Admission, RefreshGate, RefreshOutcome};
use super::request::{ApiRequest, ApiResponse, REFRESH_PATH};
use super::transport::Transport;
use crate::error::ClientError;

/// Whether the backend session is usable. Flips to `LoggedOut` when a refresh
/// fails or the user logs out; UI code watches it to redirect to login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    LoggedOut,
}

/// Backend client that renews expired sessions transparently.
///
/// A request answered with 401 is retried once after a refresh. While one
/// refresh is running, every other request that hits 401 waits for it instead
/// of starting its own, so a burst of failures costs exactly one refresh call.
/// Share one instance (behind an `Arc`) across the whole program.
pub struct SessionClient<T> {
    transport: T,
    gate: Mutex<RefreshGate>,
    status: watch::Sender<SessionStatus>,
}

impl<T: Transport> SessionClient<T> {
    pub fn new(transport: T) -> Self {
        let (status, _) = watch::channel(SessionStatus::Active);
        Self {
            transport,
            gate: Mutex::new(RefreshGate::default()),
            status,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.gate().in_flight()
    }

    /// Number of requests parked behind the running refresh.
    pub fn queued_requests(&self) -> usize {
        self.gate().queued()
    }

    fn gate(&self) -> MutexGuard<'_, RefreshGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(?status, "Session status changed");
        }
    }

    /// Send `request`, recovering once from an expired session.
    ///
    /// Authentication-flow requests and requests that were already retried
    /// get their 401 back as [`ClientError::Unauthorized`]. Any other non-2xx
    /// answer and every transport error is returned untouched.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.transport.send(&request).await?;
        if !response.is_unauthorized() || request.is_auth_flow() || request.is_retried() {
            return into_result(&request, response);
        }

        let mut retry = request;
        retry.mark_retried();
        self.await_refresh(&retry).await?;

        debug!(call = %retry.label(), "Re-issuing request after refresh");
        let response = self.transport.send(&retry).await?;
        into_result(&retry, response)
    }

    pub async fn get_json<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, ClientError> {
        let call = request.label();
        self.request(request).await?.json(&call)
    }

    pub async fn send_without_body(&self, request: ApiRequest) -> Result<(), ClientError> {
        self.request(request).await.map(|_| ())
    }

    async fn await_refresh(&self, request: &ApiRequest) -> Result<(), ClientError> {
        let admission = self.gate().admit(request.label());

        match admission {
            Admission::Queued(outcome) => {
                debug!(call = %request.label(), "Refresh in flight, queueing request");
                outcome.await.unwrap_or_else(|_| {
                    Err(ClientError::RefreshFailed(
                        "refresh ended without an outcome".to_string(),
                    ))
                })
            }
            Admission::Leader { generation } => {
                let leader = LeaderGuard::new(self, generation);
                let outcome = self.refresh().await;
                leader.complete(outcome)
            }
        }
    }

    async fn refresh(&self) -> RefreshOutcome {
        info!("Access expired, refreshing session");
        let request = ApiRequest::post(REFRESH_PATH);
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| ClientError::RefreshFailed(e.to_string()))?;

        if response.status.is_success() {
            Ok(())
        } else {
            Err(ClientError::RefreshFailed(format!(
                "{} returned {}",
                request.label(),
                response.status
            )))
        }
    }

    /// Reject everything queued behind a refresh and mark the session logged out.
    ///
    /// A refresh already running keeps its slot, so no second refresh starts
    /// alongside it, but its outcome is ignored when it lands.
    pub fn end_session(&self) {
        let pending = {
            let mut gate = self.gate();
            let pending = gate.end_session();
            self.set_status(SessionStatus::LoggedOut);
            pending
        };
        let rejected = release(pending, &Err(ClientError::LoggedOut));
        if rejected > 0 {
            debug!(rejected, "Rejected queued requests on logout");
        }
    }

    /// What requests queued behind a refresh from an ended session receive:
    /// a retry if someone has logged in since, otherwise the logout.
    fn superseded_outcome(&self) -> RefreshOutcome {
        match self.status() {
            SessionStatus::Active => Ok(()),
            SessionStatus::LoggedOut => Err(ClientError::LoggedOut),
        }
    }
}

fn into_result(request: &ApiRequest, response: ApiResponse) -> Result<ApiResponse, ClientError> {
    if response.status.is_success() {
        return Ok(response);
    }

    let call = request.label();
    if response.is_unauthorized() {
        Err(ClientError::Unauthorized { call })
    } else {
        Err(ClientError::Status {
            call,
            status: response.status.as_u16(),
            body: response.body,
        })
    }
}

/// Held by the caller running a refresh. If that caller is dropped before
/// completing, the gate is reopened and queued requests are rejected.
struct LeaderGuard<'a, T: Transport> {
    client: &'a SessionClient<T>,
    generation: u64,
    armed: bool,
}

impl<'a, T: Transport> LeaderGuard<'a, T> {
    fn new(client: &'a SessionClient<T>, generation: u64) -> Self {
        Self {
            client,
            generation,
            armed: true,
        }
    }

    /// Reopen the gate and hand `outcome` to everything queued. The session
    /// status follows the outcome only if the session was not ended meanwhile.
    fn complete(mut self, outcome: RefreshOutcome) -> RefreshOutcome {
        self.armed = false;

        let (pending, current) = {
            let mut gate = self.client.gate();
            let pending = gate.finish();
            let current = gate.is_current(self.generation);
            if current {
                match &outcome {
                    Ok(()) => self.client.set_status(SessionStatus::Active),
                    Err(e) => {
                        warn!(error = %e, "Session refresh failed, logging out");
                        self.client.set_status(SessionStatus::LoggedOut);
                    }
                }
            }
            (pending, current)
        };

        if !current {
            let released = release(pending, &self.client.superseded_outcome());
            debug!(released, "Session ended during refresh, outcome ignored");
            return Err(ClientError::LoggedOut);
        }

        let released = release(pending, &outcome);
        debug!(released, "Released queued requests");
        outcome
    }
}

impl<T: Transport> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Refresh abandoned before completing");
        let (pending, current) = {
            let mut gate = self.client.gate();
            (gate.finish(), gate.is_current(self.generation))
        };
        let outcome = if current {
            Err(ClientError::RefreshFailed("refresh was abandoned".to_string()))
        } else {
            self.client.superseded_outcome()
        };
        release(pending, &outcome);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Fake backend: resource paths answer 401 until the session is refreshed.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub state: Arc<MockState>,
    }

    #[derive(Default)]
    pub(crate) struct MockState {
        pub authorized: AtomicBool,
        pub refresh_fails: AtomicBool,
        pub login_rejected: AtomicBool,
        pub hold_refresh: AtomicBool,
        pub refresh_gate: Notify,
        pub refresh_calls: AtomicUsize,
        pub calls: Mutex<Vec<(String, bool)>>,
        pub bodies: Mutex<Vec<(String, Option<serde_json::Value>)>>,
    }

    impl MockTransport {
        pub fn expired() -> Self {
            Self::default()
        }

        pub fn authorized() -> Self {
            let transport = Self::default();
            transport.state.authorized.store(true, Ordering::SeqCst);
            transport
        }

        pub fn holding_refresh(self) -> Self {
            self.state.hold_refresh.store(true, Ordering::SeqCst);
            self
        }

        pub fn failing_refresh(self) -> Self {
            self.state.refresh_fails.store(true, Ordering::SeqCst);
            self
        }

        pub fn rejecting_login(self) -> Self {
            self.state.login_rejected.store(true, Ordering::SeqCst);
            self
        }

        pub fn refresh_calls(&self) -> usize {
            self.state.refresh_calls.load(Ordering::SeqCst)
        }

        /// How often each label was sent, split into first attempts and retries.
        pub fn attempts(&self) -> HashMap<String, (usize, usize)> {
            let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
            for (label, retried) in self.state.calls.lock().unwrap().iter() {
                let entry = counts.entry(label.clone()).or_default();
                if *retried {
                    entry.1 += 1;
                } else {
                    entry.0 += 1;
                }
            }
            counts
        }

        pub fn last_body(&self, label: &str) -> Option<serde_json::Value> {
            self.state
                .bodies
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(l, _)| l == label)
                .and_then(|(_, body)| body.clone())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
            let label = request.label();
            self.state
                .calls
                .lock()
                .unwrap()
                .push((label.clone(), request.is_retried()));
            self.state
                .bodies
                .lock()
                .unwrap()
                .push((label, request.body.clone()));

            let state = &self.state;
            let authorized = || state.authorized.load(Ordering::SeqCst);
            let answer = |ok: bool, body: &str| {
                if ok {
                    Ok(ApiResponse::new(StatusCode::OK, body))
                } else {
                    Ok(ApiResponse::new(StatusCode::UNAUTHORIZED, ""))
                }
            };

            match request.path.as_str() {
                "/auth/refresh" => {
                    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
                    if state.hold_refresh.load(Ordering::SeqCst) {
                        state.refresh_gate.notified().await;
                    }
                    let ok = !state.refresh_fails.load(Ordering::SeqCst);
                    if ok {
                        state.authorized.store(true, Ordering::SeqCst);
                    }
                    answer(ok, "")
                }
                "/auth/login" => {
                    let ok = !state.login_rejected.load(Ordering::SeqCst);
                    if ok {
                        state.authorized.store(true, Ordering::SeqCst);
                    }
                    answer(ok, "")
                }
                "/auth/logout" => {
                    state.authorized.store(false, Ordering::SeqCst);
                    answer(true, "")
                }
                "/auth/me" => answer(
                    authorized(),
                    r#"{"id": 1, "name": "Mia", "email": "mia@example.com", "role": "admin"}"#,
                ),
                "/always-401" => answer(false, ""),
                "/broken" => Ok(ApiResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
                "/offline" => Err(ClientError::Transport {
                    call: request.label(),
                    message: "connection refused".to_string(),
                }),
                "/tasks" => answer(authorized(), r#"[{"id": 1, "title": "Launch", "channel": "email"}]"#),
                _ => answer(authorized(), "{}"),
            }
        }
    }

    pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition was not reached in time");
    }

    #[tokio::test]
    async fn passes_through_success() {
        let client = SessionClient::new(MockTransport::authorized());
        let response = client.request(ApiRequest::get("/tasks")).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(client.transport().refresh_calls(), 0);
    }

    #[tokio::test]
    async fn refreshes_once_and_retries_on_401() {
        let client = SessionClient::new(MockTransport::expired());

        let response = client.request(ApiRequest::get("/tasks")).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(client.transport().refresh_calls(), 1);
        assert_eq!(client.transport().attempts()["GET /tasks"], (1, 1));
        assert!(!client.refresh_in_flight());
        assert_eq!(client.status(), SessionStatus::Active);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        const N: usize = 5;
        let client = Arc::new(SessionClient::new(MockTransport::expired().holding_refresh()));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.request(ApiRequest::get(format!("/tasks/{i}"))).await })
            })
            .collect();

        wait_until(|| client.queued_requests() == N - 1).await;
        assert!(client.refresh_in_flight());
        client.transport().state.refresh_gate.notify_one();

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status, StatusCode::OK);
        }

        assert_eq!(client.transport().refresh_calls(), 1);
        let attempts = client.transport().attempts();
        for i in 0..N {
            assert_eq!(attempts[&format!("GET /tasks/{i}")], (1, 1));
        }
        assert!(!client.refresh_in_flight());
        assert_eq!(client.queued_requests(), 0);
    }

    #[tokio::test]
    async fn retried_request_never_refreshes_again() {
        let client = SessionClient::new(MockTransport::expired());

        let err = client.request(ApiRequest::get("/always-401")).await.unwrap_err();

        assert_eq!(
            err,
            ClientError::Unauthorized {
                call: "GET /always-401".to_string()
            }
        );
        assert_eq!(client.transport().refresh_calls(), 1);
        assert_eq!(client.transport().attempts()["GET /always-401"], (1, 1));
    }

    #[tokio::test]
    async fn already_retried_request_is_not_intercepted() {
        let client = SessionClient::new(MockTransport::expired());
        let mut request = ApiRequest::get("/tasks");
        request.mark_retried();

        let err = client.request(request).await.unwrap_err();

        assert!(matches!(err, ClientError::Unauthorized { .. }));
        assert_eq!(client.transport().refresh_calls(), 0);
    }

    #[tokio::test]
    async fn auth_flow_requests_never_trigger_refresh() {
        let transport = MockTransport::expired().failing_refresh();
        let client = SessionClient::new(transport);

        for request in [
            ApiRequest::get("/auth/me"),
            ApiRequest::post("/auth/refresh"),
        ] {
            let err = client.request(request).await.unwrap_err();
            assert!(matches!(err, ClientError::Unauthorized { .. }));
        }
        client.send_without_body(ApiRequest::post("/auth/logout")).await.unwrap();

        // Only the explicit call to /auth/refresh reached the endpoint.
        assert_eq!(client.transport().refresh_calls(), 1);
        assert_eq!(client.queued_requests(), 0);
        assert!(!client.refresh_in_flight());
        let attempts = client.transport().attempts();
        assert_eq!(attempts["GET /auth/me"], (1, 0));
        assert_eq!(attempts["POST /auth/refresh"], (1, 0));
    }

    #[tokio::test]
    async fn rejected_login_never_triggers_refresh() {
        let client = SessionClient::new(MockTransport::expired().rejecting_login());

        let err = client
            .request(ApiRequest::post("/auth/login"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ClientError::Unauthorized {
                call: "POST /auth/login".to_string()
            }
        );
        assert_eq!(client.transport().refresh_calls(), 0);
        assert_eq!(client.queued_requests(), 0);
        assert!(!client.refresh_in_flight());
        assert_eq!(client.transport().attempts()["POST /auth/login"], (1, 0));
    }

    #[tokio::test]
    async fn refresh_failure_rejects_whole_batch() {
        const N: usize = 4;
        let client = Arc::new(SessionClient::new(
            MockTransport::expired().failing_refresh().holding_refresh(),
        ));
        let mut status = client.subscribe();

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move { client.request(ApiRequest::get(format!("/users/{i}"))).await })
            })
            .collect();

        wait_until(|| client.queued_requests() == N - 1).await;
        client.transport().state.refresh_gate.notify_one();

        let expected = ClientError::RefreshFailed("POST /auth/refresh returned 401 Unauthorized".to_string());
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap_err(), expected);
        }

        assert_eq!(client.transport().refresh_calls(), 1);
        assert!(!client.refresh_in_flight());
        status.changed().await.unwrap();
        assert_eq!(*status.borrow(), SessionStatus::LoggedOut);
        for i in 0..N {
            assert_eq!(client.transport().attempts()[&format!("GET /users/{i}")], (1, 0));
        }
    }

    #[tokio::test]
    async fn other_failures_pass_through() {
        let client = SessionClient::new(MockTransport::authorized());

        let err = client.request(ApiRequest::get("/broken")).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Status {
                call: "GET /broken".to_string(),
                status: 500,
                body: "boom".to_string(),
            }
        );

        let err = client.request(ApiRequest::get("/offline")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport { .. }));
        assert_eq!(client.transport().refresh_calls(), 0);
    }

    #[tokio::test]
    async fn end_session_rejects_queued_requests() {
        let client = Arc::new(SessionClient::new(MockTransport::expired().holding_refresh()));

        let leader = {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get("/tasks/1")).await })
        };
        wait_until(|| client.refresh_in_flight()).await;
        let follower = {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get("/tasks/2")).await })
        };
        wait_until(|| client.queued_requests() == 1).await;

        client.end_session();
        assert_eq!(follower.await.unwrap().unwrap_err(), ClientError::LoggedOut);
        assert_eq!(client.status(), SessionStatus::LoggedOut);

        client.transport().state.refresh_gate.notify_one();
        assert_eq!(leader.await.unwrap().unwrap_err(), ClientError::LoggedOut);
        assert_eq!(client.status(), SessionStatus::LoggedOut);
    }

    #[tokio::test]
    async fn logout_during_refresh_keeps_a_single_refresh() {
        let client = Arc::new(SessionClient::new(MockTransport::expired().holding_refresh()));
        let spawn = |path: &'static str| {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get(path)).await })
        };

        let leader = spawn("/tasks/1");
        wait_until(|| client.refresh_in_flight()).await;
        client.end_session();

        // A 401 after the logout waits for the running refresh instead of
        // starting another one.
        let late = spawn("/tasks/2");
        wait_until(|| client.queued_requests() == 1).await;
        assert!(client.refresh_in_flight());
        assert_eq!(client.transport().refresh_calls(), 1);

        client.transport().state.refresh_gate.notify_one();
        assert_eq!(leader.await.unwrap().unwrap_err(), ClientError::LoggedOut);
        assert_eq!(late.await.unwrap().unwrap_err(), ClientError::LoggedOut);

        assert_eq!(client.transport().refresh_calls(), 1);
        assert_eq!(client.status(), SessionStatus::LoggedOut);
        assert!(!client.refresh_in_flight());
        assert_eq!(client.transport().attempts()["GET /tasks/2"], (1, 0));
    }

    #[tokio::test]
    async fn refresh_outliving_a_relogin_leaves_the_new_session_alone() {
        let client = Arc::new(SessionClient::new(
            MockTransport::expired().holding_refresh().failing_refresh(),
        ));
        let leader = {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get("/tasks/1")).await })
        };
        wait_until(|| client.refresh_in_flight()).await;

        client.end_session();
        client.set_status(SessionStatus::Active);

        client.transport().state.refresh_gate.notify_one();
        assert_eq!(leader.await.unwrap().unwrap_err(), ClientError::LoggedOut);
        // The failed refresh belonged to the old session.
        assert_eq!(client.status(), SessionStatus::Active);
        assert!(!client.refresh_in_flight());
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_disturb_the_queue() {
        let client = Arc::new(SessionClient::new(MockTransport::expired().holding_refresh()));

        let spawn = |path: &'static str| {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get(path)).await })
        };
        let leader = spawn("/tasks/1");
        wait_until(|| client.refresh_in_flight()).await;
        let abandoned = spawn("/tasks/2");
        let patient = spawn("/tasks/3");
        wait_until(|| client.queued_requests() == 2).await;

        abandoned.abort();
        let _ = abandoned.await;
        client.transport().state.refresh_gate.notify_one();

        assert!(leader.await.unwrap().is_ok());
        assert!(patient.await.unwrap().is_ok());
        // The abandoned request got its first 401 but was never re-issued.
        assert_eq!(client.transport().attempts()["GET /tasks/2"], (1, 0));
        assert_eq!(client.transport().refresh_calls(), 1);
    }

    #[tokio::test]
    async fn abandoned_refresh_releases_waiters() {
        let client = Arc::new(SessionClient::new(MockTransport::expired().holding_refresh()));

        let leader = {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get("/tasks/1")).await })
        };
        wait_until(|| client.refresh_in_flight()).await;
        let follower = {
            let client = client.clone();
            tokio::spawn(async move { client.request(ApiRequest::get("/tasks/2")).await })
        };
        wait_until(|| client.queued_requests() == 1).await;

        leader.abort();
        let _ = leader.await;

        assert!(matches!(
            follower.await.unwrap().unwrap_err(),
            ClientError::RefreshFailed(_)
        ));
        assert!(!client.refresh_in_flight());
    }
}
