use anyhow::Context;
use chrono::Duration as ChronoDuration;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::auth::{
    attacher_for, AuthMode, CredentialAttacher, CredentialStore, Episode, RefreshCoordinator,
    RefreshError, Session,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};

/// Path of the refresh endpoint relative to the API base
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Session lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// Refresh failed; the application should return to its sign-in entry point
    Ended,
}

/// Authenticated request gateway
///
/// Attaches the current credential, and on a 401 refreshes once through the
/// single-flight coordinator and retries the request exactly once.
pub struct AuthenticatedClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    attacher: Arc<dyn CredentialAttacher>,
    coordinator: RefreshCoordinator,
    clock: Arc<dyn Clock>,

    /// Refresh proactively when a known expiry is this close
    refresh_threshold: ChronoDuration,

    events: broadcast::Sender<SessionEvent>,

    /// Highest refresh epoch whose failure already ended the session
    ended_epoch: Mutex<u64>,
}

impl AuthenticatedClient {
    /// Create a gateway from explicit parts
    pub fn new(
        base_url: &str,
        mode: AuthMode,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        refresh_threshold_secs: u64,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        let attacher = attacher_for(mode);
        let coordinator = RefreshCoordinator::new(
            transport.clone(),
            store.clone(),
            attacher.clone(),
            clock.clone(),
            format!("{}{}", base_url, REFRESH_PATH),
        );
        let (events, _) = broadcast::channel(16);

        Self {
            base_url,
            transport,
            store,
            attacher,
            coordinator,
            clock,
            refresh_threshold: ChronoDuration::seconds(refresh_threshold_secs as i64),
            events,
            ended_epoch: Mutex::new(0),
        }
    }

    /// Create a gateway backed by reqwest, as configured at boot
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(config.http_connect_timeout, config.http_request_timeout)
            .context("Failed to initialize HTTP transport")?;

        Ok(Self::new(
            &config.api_base_url,
            config.auth_mode,
            Arc::new(transport),
            store,
            Arc::new(SystemClock),
            config.token_refresh_threshold,
        ))
    }

    pub fn mode(&self) -> AuthMode {
        self.attacher.mode()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Build a request against the API base
    pub fn request(&self, method: Method, path: &str) -> ApiRequest {
        ApiRequest::new(method, format!("{}{}", self.base_url, path))
    }

    pub fn session(&self) -> Result<Session> {
        self.store
            .read()
            .map_err(|e| ClientError::Store(format!("{:#}", e)))
    }

    /// Persist a new session (login / confirmation)
    pub fn start_session(&self, session: &Session) -> Result<()> {
        self.store
            .save(session)
            .map_err(|e| ClientError::Store(format!("{:#}", e)))?;
        self.coordinator.reset();
        let _ = self.events.send(SessionEvent::SignedIn);
        Ok(())
    }

    /// Clear the session on explicit sign-out
    pub fn sign_out(&self) -> Result<()> {
        self.store
            .clear()
            .map_err(|e| ClientError::Store(format!("{:#}", e)))?;
        self.coordinator.reset();
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }

    /// Execute a request with the current credential, refreshing and retrying once on 401
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        tracing::debug!(method = %request.method, url = %request.url, "Sending authenticated request");

        let mut observed_epoch = self.coordinator.epoch();
        let mut session = self.session()?;

        if self.expiring_soon(&session) {
            tracing::debug!("Access token expiring soon, refreshing before request");
            let episode = self
                .coordinator
                .acquire_fresh_credential(Some(observed_epoch))
                .await;
            observed_epoch = episode.epoch;
            session = self.settle(episode)?;
        }

        let response = self.execute_with(&request, &session).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!(url = %request.url, "Received 401, refreshing session and retrying once");

        let episode = self
            .coordinator
            .acquire_fresh_credential(Some(observed_epoch))
            .await;
        let session = self.settle(episode)?;

        let retried = self.execute_with(&request, &session).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(url = %request.url, "Still unauthorized after refresh, not retrying again");
        }
        Ok(retried)
    }

    /// Execute a request with the current credential and no refresh handling
    ///
    /// Used for the sign-in endpoints, where a 401 means bad input rather than an expired session.
    pub async fn send_once(&self, request: ApiRequest) -> Result<ApiResponse> {
        let session = self.session()?;
        self.execute_with(&request, &session).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(Method::GET, path)).await?;
        decode(response)
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).json(body)?;
        decode(self.send(request).await?)
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::PUT, path).json(body)?;
        decode(self.send(request).await?)
    }

    /// PUT that only cares about success
    pub async fn put(&self, path: &str, body: &impl Serialize) -> Result<()> {
        let request = self.request(Method::PUT, path).json(body)?;
        ensure_success(self.send(request).await?).map(|_| ())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(self.request(Method::DELETE, path)).await?;
        ensure_success(response).map(|_| ())
    }

    async fn execute_with(&self, request: &ApiRequest, session: &Session) -> Result<ApiResponse> {
        let mut outbound = request.clone();
        self.attacher.attach(&mut outbound, session);

        let response = self.transport.execute(outbound).await?;
        tracing::debug!(status = %response.status(), url = %request.url, "Received response");
        Ok(response)
    }

    fn expiring_soon(&self, session: &Session) -> bool {
        match (&session.access_token, session.access_expires_at) {
            (Some(_), Some(expires_at)) => expires_at <= self.clock.now() + self.refresh_threshold,
            _ => false,
        }
    }

    /// Turn a settled refresh episode into a session, ending it on failure
    fn settle(&self, episode: Episode) -> Result<Session> {
        let superseded = !self.coordinator.is_current(episode.epoch)
            || matches!(episode.outcome, Err(RefreshError::Superseded));
        if superseded {
            // Signed in or out while refreshing; whatever is stored now wins
            let session = self.session()?;
            if session.is_empty() {
                tracing::debug!(epoch = episode.epoch, "Signed out during refresh");
                return Err(ClientError::SessionEnded("Signed out".to_string()));
            }
            tracing::debug!(epoch = episode.epoch, "Session replaced during refresh, using new session");
            return Ok(session);
        }

        match episode.outcome {
            Ok(session) => Ok(session),
            Err(e) => {
                self.end_session(episode.epoch);
                Err(ClientError::SessionEnded(e.to_string()))
            }
        }
    }

    /// Clear credentials and notify, once per failed episode
    fn end_session(&self, epoch: u64) {
        let mut ended = self.ended_epoch.lock().unwrap_or_else(|e| e.into_inner());
        if *ended >= epoch {
            return;
        }
        *ended = epoch;

        tracing::warn!(epoch, "Session expired, logging out");
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear credential store: {:#}", e);
        }
        let _ = self.events.send(SessionEvent::Ended);
    }
}

/// Decode a success body, or surface the error body verbatim
pub fn decode<T: DeserializeOwned>(response: ApiResponse) -> Result<T> {
    let response = ensure_success(response)?;
    response
        .json()
        .map_err(|e| ClientError::Decode(e.to_string()))
}

/// Map non-success statuses to `ClientError::Api`
pub fn ensure_success(response: ApiResponse) -> Result<ApiResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.json_or_placeholder();
    tracing::debug!(status, body = %body, "Service returned error response");
    Err(ClientError::Api { status, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryStore, RefreshState, TokenGrant};
    use crate::clock::ManualClock;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{CredentialsPolicy, TransportError};
    use chrono::Utc;
    use reqwest::header::AUTHORIZATION;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const BASE: &str = "http://api.test";

    /// Memory store that counts clears
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        clears: AtomicUsize,
    }

    impl CredentialStore for CountingStore {
        fn save(&self, session: &Session) -> anyhow::Result<()> {
            self.inner.save(session)
        }

        fn read(&self) -> anyhow::Result<Session> {
            self.inner.read()
        }

        fn clear(&self) -> anyhow::Result<()> {
            self.clears.fetch_add(1, Ordering::SeqCst);
            self.inner.clear()
        }

        fn update_access(
            &self,
            basis: &Session,
            grant: &TokenGrant,
        ) -> anyhow::Result<Option<Session>> {
            self.inner.update_access(basis, grant)
        }
    }

    fn bearer_session() -> Session {
        Session {
            access_token: Some("stale".to_string()),
            refresh_token: Some("ref".to_string()),
            subject: Some("user-1".to_string()),
            ..Default::default()
        }
    }

    fn bearer_of(req: &ApiRequest) -> Option<String> {
        req.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// `/players` accepts only the fresh token; refresh responds with `refresh_status`
    fn players_transport(refresh_status: StatusCode) -> ScriptedTransport {
        ScriptedTransport::new(move |req| {
            if req.path() == REFRESH_PATH {
                return Ok(if refresh_status.is_success() {
                    ApiResponse::from_json(refresh_status, &json!({"accessToken": "fresh"}))
                } else {
                    ApiResponse::from_json(refresh_status, &json!({"error": "refresh expired"}))
                });
            }
            if bearer_of(req).as_deref() == Some("Bearer fresh") {
                Ok(ApiResponse::from_json(StatusCode::OK, &json!([{"id": "p1"}])))
            } else {
                Ok(ApiResponse::from_json(
                    StatusCode::UNAUTHORIZED,
                    &json!({"error": "token expired"}),
                ))
            }
        })
    }

    fn client(
        mode: AuthMode,
        transport: Arc<ScriptedTransport>,
        store: Arc<dyn CredentialStore>,
    ) -> AuthenticatedClient {
        AuthenticatedClient::new(BASE, mode, transport, store, Arc::new(SystemClock), 30)
    }

    fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_non_401_passthrough() {
        for status in [StatusCode::FORBIDDEN, StatusCode::INTERNAL_SERVER_ERROR] {
            let transport = Arc::new(ScriptedTransport::new(move |_| {
                Ok(ApiResponse::from_json(status, &json!({"error": "nope"})))
            }));
            let store = Arc::new(MemoryStore::with_session(bearer_session()));
            let client = client(AuthMode::Bearer, transport.clone(), store.clone());

            let response = client
                .send(client.request(Method::GET, "/players"))
                .await
                .unwrap();

            assert_eq!(response.status(), status);
            assert_eq!(response.json_or_placeholder()["error"], "nope");
            assert_eq!(transport.count(REFRESH_PATH), 0);
            assert_eq!(transport.count("/players"), 1);
            assert_eq!(store.read().unwrap(), bearer_session());
        }
    }

    #[tokio::test]
    async fn test_401_refreshes_and_retries_once() {
        let transport = Arc::new(players_transport(StatusCode::OK));
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());

        let players: Value = client.get_json("/players").await.unwrap();

        assert_eq!(players[0]["id"], "p1");
        assert_eq!(transport.count(REFRESH_PATH), 1);

        let calls = transport.requests_to("/players");
        assert_eq!(calls.len(), 2);
        assert_eq!(bearer_of(&calls[0]).as_deref(), Some("Bearer stale"));
        assert_eq!(bearer_of(&calls[1]).as_deref(), Some("Bearer fresh"));
        assert_eq!(store.read().unwrap().access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_second_401_is_surfaced_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(|req| {
            if req.path() == REFRESH_PATH {
                Ok(ApiResponse::from_json(StatusCode::OK, &json!({"accessToken": "fresh"})))
            } else {
                Ok(ApiResponse::from_json(StatusCode::UNAUTHORIZED, &json!({})))
            }
        }));
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());

        let response = client
            .send(client.request(Method::GET, "/players"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count("/players"), 2);
        assert_eq!(transport.count(REFRESH_PATH), 1);
        // Refresh succeeded, so the session survives
        assert_eq!(store.read().unwrap().access_token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_refresh_failure_ends_session() {
        let transport = Arc::new(players_transport(StatusCode::UNAUTHORIZED));
        let store = Arc::new(CountingStore::default());
        store.save(&bearer_session()).unwrap();
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());
        let mut events = client.subscribe();

        let err = client
            .send(client.request(Method::GET, "/players"))
            .await
            .unwrap_err();

        assert!(err.is_session_ended());
        assert!(store.read().unwrap().is_empty());
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
        assert_eq!(drain(&mut events), vec![SessionEvent::Ended]);
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(transport.count("/players"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let transport = Arc::new(
            players_transport(StatusCode::OK).with_delay(REFRESH_PATH, Duration::from_millis(50)),
        );
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport.clone(), store);

        let (a, b) = tokio::join!(
            client.get_json::<Value>("/players"),
            client.get_json::<Value>("/players"),
        );

        assert_eq!(a.unwrap()[0]["id"], "p1");
        assert_eq!(b.unwrap()[0]["id"], "p1");
        assert_eq!(transport.count(REFRESH_PATH), 1);

        let retries: Vec<_> = transport
            .requests_to("/players")
            .iter()
            .filter_map(bearer_of)
            .filter(|h| h == "Bearer fresh")
            .collect();
        assert_eq!(retries.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_failure_clears_once() {
        let transport = Arc::new(
            players_transport(StatusCode::BAD_REQUEST)
                .with_delay(REFRESH_PATH, Duration::from_millis(50)),
        );
        let store = Arc::new(CountingStore::default());
        store.save(&bearer_session()).unwrap();
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());
        let mut events = client.subscribe();

        let (a, b, c) = tokio::join!(
            client.get_json::<Value>("/players"),
            client.get_json::<Value>("/players"),
            client.get_json::<Value>("/players"),
        );

        for result in [a, b, c] {
            assert!(result.unwrap_err().is_session_ended());
        }
        assert_eq!(transport.count(REFRESH_PATH), 1);
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
        assert_eq!(drain(&mut events), vec![SessionEvent::Ended]);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_ends_session_without_refresh_call() {
        let transport = Arc::new(players_transport(StatusCode::OK));
        let store = Arc::new(MemoryStore::with_session(Session {
            access_token: Some("stale".to_string()),
            ..Default::default()
        }));
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());

        let err = client.get_json::<Value>("/players").await.unwrap_err();

        assert!(err.is_session_ended());
        assert_eq!(transport.count(REFRESH_PATH), 0);
        assert!(store.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cookie_mode_includes_credentials() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = Arc::new(ScriptedTransport::new(move |req| {
            if req.path() == REFRESH_PATH {
                return Ok(ApiResponse::from_json(StatusCode::OK, &json!({})));
            }
            // First call sees an expired cookie, the retry a rotated one
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(ApiResponse::from_json(StatusCode::UNAUTHORIZED, &json!({})))
            } else {
                Ok(ApiResponse::from_json(StatusCode::OK, &json!({"ok": true})))
            }
        }));
        let store = Arc::new(MemoryStore::new());
        let client = client(AuthMode::Cookie, transport.clone(), store);

        let body: Value = client.get_json("/players").await.unwrap();
        assert_eq!(body["ok"], true);

        for req in transport.requests_to("/players") {
            assert_eq!(req.credentials, CredentialsPolicy::Include);
            assert!(bearer_of(&req).is_none());
        }
        let refresh = transport.requests_to(REFRESH_PATH);
        assert_eq!(refresh.len(), 1);
        assert_eq!(refresh[0].credentials, CredentialsPolicy::Include);
    }

    #[tokio::test]
    async fn test_no_proactive_refresh_outside_threshold() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(players_transport(StatusCode::OK));
        let mut session = bearer_session();
        session.access_expires_at = Some(clock.now() + ChronoDuration::seconds(120));
        let store = Arc::new(MemoryStore::with_session(session));
        let client = AuthenticatedClient::new(
            BASE,
            AuthMode::Bearer,
            transport.clone(),
            store,
            clock.clone(),
            30,
        );

        // Not yet within the threshold: the stale token goes out and gets a 401
        clock.advance(ChronoDuration::seconds(60));
        let _ = client.get_json::<Value>("/players").await.unwrap();
        assert_eq!(transport.count("/players"), 2);
        assert_eq!(transport.count(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn test_proactive_refresh_skips_the_401() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(players_transport(StatusCode::OK));
        let mut session = bearer_session();
        session.access_expires_at = Some(clock.now() + ChronoDuration::seconds(10));
        let store = Arc::new(MemoryStore::with_session(session));
        let client = AuthenticatedClient::new(
            BASE,
            AuthMode::Bearer,
            transport.clone(),
            store,
            clock,
            30,
        );

        let _ = client.get_json::<Value>("/players").await.unwrap();
        let calls = transport.requests_to("/players");
        assert_eq!(calls.len(), 1);
        assert_eq!(bearer_of(&calls[0]).as_deref(), Some("Bearer fresh"));
        assert_eq!(transport.count(REFRESH_PATH), 1);
    }

    #[tokio::test]
    async fn test_sign_out_during_refresh_keeps_store_empty() {
        let transport = Arc::new(
            players_transport(StatusCode::OK).with_delay(REFRESH_PATH, Duration::from_millis(100)),
        );
        let store = Arc::new(CountingStore::default());
        store.save(&bearer_session()).unwrap();
        let client = Arc::new(client(AuthMode::Bearer, transport.clone(), store.clone()));
        let mut events = client.subscribe();

        let background = client.clone();
        let handle = tokio::spawn(async move { background.get_json::<Value>("/players").await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        client.sign_out().unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_session_ended());
        assert!(store.read().unwrap().is_empty());
        // Only the explicit sign-out cleared the store; the request was not retried
        assert_eq!(store.clears.load(Ordering::SeqCst), 1);
        assert_eq!(transport.count("/players"), 1);
        assert_eq!(drain(&mut events), vec![SessionEvent::SignedOut]);
    }

    #[tokio::test]
    async fn test_sign_in_during_failed_refresh_uses_new_session() {
        let transport = Arc::new(
            players_transport(StatusCode::UNAUTHORIZED)
                .with_delay(REFRESH_PATH, Duration::from_millis(100)),
        );
        let store = Arc::new(CountingStore::default());
        store.save(&bearer_session()).unwrap();
        let client = Arc::new(client(AuthMode::Bearer, transport.clone(), store.clone()));
        let mut events = client.subscribe();

        let background = client.clone();
        let handle = tokio::spawn(async move { background.get_json::<Value>("/players").await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let signed_in = Session {
            access_token: Some("fresh".to_string()),
            refresh_token: Some("ref-2".to_string()),
            subject: Some("user-1".to_string()),
            ..Default::default()
        };
        client.start_session(&signed_in).unwrap();

        let players = handle.await.unwrap().unwrap();
        assert_eq!(players[0]["id"], "p1");
        assert_eq!(store.read().unwrap(), signed_in);
        assert_eq!(store.clears.load(Ordering::SeqCst), 0);
        assert_eq!(drain(&mut events), vec![SessionEvent::SignedIn]);
        assert_eq!(client.coordinator().state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_without_refresh() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Err(TransportError {
                kind: "connection_failed",
                message: "connection refused".to_string(),
            })
        }));
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport.clone(), store.clone());

        let err = client.get_json::<Value>("/players").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert_eq!(transport.count(REFRESH_PATH), 0);
        assert_eq!(store.read().unwrap(), bearer_session());
    }

    #[tokio::test]
    async fn test_validation_error_surfaced_verbatim() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(ApiResponse::from_json(
                StatusCode::CONFLICT,
                &json!({"error": "Player already exists"}),
            ))
        }));
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport, store.clone());

        let err = client
            .post_json::<_, Value>("/players", &json!({"name": "A"}))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(409));
        assert_eq!(err.user_message(), "Player already exists");
        assert_eq!(store.read().unwrap(), bearer_session());
    }

    #[tokio::test]
    async fn test_non_json_error_body_gets_placeholder() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(ApiResponse::new(
                StatusCode::BAD_GATEWAY,
                bytes::Bytes::from("<html>upstream down</html>"),
            ))
        }));
        let client = client(AuthMode::Cookie, transport, Arc::new(MemoryStore::new()));

        let err = client.get_json::<Value>("/players").await.unwrap_err();
        match err {
            ClientError::Api { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body["error"], "Invalid response");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_once_never_refreshes() {
        let transport = Arc::new(players_transport(StatusCode::OK));
        let store = Arc::new(MemoryStore::with_session(bearer_session()));
        let client = client(AuthMode::Bearer, transport.clone(), store);

        let response = client
            .send_once(client.request(Method::POST, "/auth/login"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(transport.count(REFRESH_PATH), 0);
    }

    #[tokio::test]
    async fn test_session_events() {
        let transport = Arc::new(players_transport(StatusCode::OK));
        let client = client(AuthMode::Bearer, transport, Arc::new(MemoryStore::new()));
        let mut events = client.subscribe();

        client.start_session(&bearer_session()).unwrap();
        assert_eq!(client.session().unwrap(), bearer_session());
        client.sign_out().unwrap();
        assert!(client.session().unwrap().is_empty());

        assert_eq!(
            drain(&mut events),
            vec![SessionEvent::SignedIn, SessionEvent::SignedOut]
        );
    }
}
