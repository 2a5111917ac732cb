// Identity service: sign-up, sign-in, sign-out and password reset

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::types::{
    ConfirmRequest, ConfirmResponse, ForgotPasswordRequest, LoginRequest, LoginResponse,
    MeResponse, MessageResponse, RegisterRequest, ResetPasswordRequest,
};
use crate::auth::{AuthMode, Session, UserProfile};
use crate::error::{ClientError, Result};
use crate::http_client::{decode, ensure_success, AuthenticatedClient};
use crate::transport::ApiResponse;

pub struct AuthApi {
    client: Arc<AuthenticatedClient>,
}

impl AuthApi {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    pub fn current_session(&self) -> Result<Session> {
        self.client.session()
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<MessageResponse> {
        if request.name.trim().is_empty()
            || request.email.trim().is_empty()
            || request.password.is_empty()
        {
            return Err(ClientError::Validation(
                "Name, email and password required".to_string(),
            ));
        }

        let response = self.post_public("/auth/register", request).await?;
        tracing::info!(email = %request.email, "Registration submitted, awaiting confirmation");
        message(response)
    }

    /// Confirm a registration code
    ///
    /// Returns the new session when the service signs the user in on confirmation.
    pub async fn confirm_registration(&self, email: &str, code: &str) -> Result<Option<Session>> {
        if email.trim().is_empty() || code.trim().is_empty() {
            return Err(ClientError::Validation("Email and code required".to_string()));
        }

        let body = ConfirmRequest {
            email: email.trim().to_string(),
            code: code.trim().to_string(),
        };
        let response: ConfirmResponse = decode_or_default(
            self.post_public("/auth/confirm", &body).await?,
        )?;

        let session = self.session_from(response.login);
        let signed_in = match self.client.mode() {
            AuthMode::Bearer => session.access_token.is_some(),
            AuthMode::Cookie => session.profile.is_some(),
        };
        if !signed_in {
            tracing::info!(email, "Registration confirmed");
            return Ok(None);
        }

        self.client.start_session(&session)?;
        tracing::info!(email, "Registration confirmed, signed in");
        Ok(Some(session))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "Email and password required".to_string(),
            ));
        }

        let body = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = decode(self.post_public("/auth/login", &body).await?)?;

        let session = self.session_from(response);
        if self.client.mode() == AuthMode::Bearer && session.access_token.is_none() {
            return Err(ClientError::Decode(
                "login response does not contain accessToken".to_string(),
            ));
        }

        self.client.start_session(&session)?;
        tracing::info!(email = %body.email, "Signed in");
        Ok(session)
    }

    /// Sign out; local credentials are cleared whatever the service says
    pub async fn logout(&self) -> Result<()> {
        let request = self.client.request(Method::POST, "/auth/logout");
        match self.client.send_once(request).await {
            Ok(response) if !response.is_success() => {
                tracing::warn!(status = %response.status(), "Logout rejected by service");
            }
            Err(e) => tracing::warn!(error = %e, "Logout request failed"),
            Ok(_) => {}
        }

        self.client.sign_out()?;
        tracing::info!("Signed out");
        Ok(())
    }

    pub async fn forgot_password(&self, email: &str) -> Result<MessageResponse> {
        if email.trim().is_empty() {
            return Err(ClientError::Validation("Email required".to_string()));
        }

        let body = ForgotPasswordRequest {
            email: email.trim().to_string(),
        };
        message(self.post_public("/auth/forgot-password", &body).await?)
    }

    pub async fn confirm_forgot_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<MessageResponse> {
        if email.trim().is_empty() || code.trim().is_empty() || new_password.is_empty() {
            return Err(ClientError::Validation(
                "Email, code and new password required".to_string(),
            ));
        }

        let body = ResetPasswordRequest {
            email: email.trim().to_string(),
            code: code.trim().to_string(),
            new_password: new_password.to_string(),
        };
        message(self.post_public("/auth/confirm-forgot-password", &body).await?)
    }

    /// Current user as seen by the service (authenticated, refreshes on 401)
    pub async fn me(&self) -> Result<Option<UserProfile>> {
        let response: MeResponse = self.client.get_json("/auth/me").await?;
        Ok(response.user)
    }

    /// Public identity endpoints: a 401 here is bad input, not an expired session
    async fn post_public<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        let request = self.client.request(Method::POST, path).json(body)?;
        self.client.send_once(request).await
    }

    /// Tokens only exist client-side in bearer deployments
    fn session_from(&self, response: LoginResponse) -> Session {
        let mut session = response.into_session(self.client.clock().now());
        if self.client.mode() == AuthMode::Cookie {
            session.access_token = None;
            session.refresh_token = None;
            session.id_token = None;
            session.access_expires_at = None;
        }
        session
    }
}

fn message(response: ApiResponse) -> Result<MessageResponse> {
    decode_or_default(response)
}

/// Like `decode`, but an empty success body yields the default value
fn decode_or_default<T: DeserializeOwned + Default>(response: ApiResponse) -> Result<T> {
    let response = ensure_success(response)?;
    if response.body().is_empty() {
        return Ok(T::default());
    }
    decode(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialStore, MemoryStore};
    use crate::clock::SystemClock;
    use crate::http_client::REFRESH_PATH;
    use crate::transport::testing::ScriptedTransport;
    use reqwest::header::AUTHORIZATION;
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    fn api(
        mode: AuthMode,
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryStore>,
    ) -> AuthApi {
        AuthApi::new(Arc::new(AuthenticatedClient::new(
            "http://api.test",
            mode,
            transport,
            store,
            Arc::new(SystemClock),
            30,
        )))
    }

    fn login_transport() -> ScriptedTransport {
        ScriptedTransport::new(|req| {
            let body: Value = serde_json::from_slice(req.body.as_deref().unwrap_or(&b"{}"[..])).unwrap();
            if body["password"] != "x" {
                return Ok(ApiResponse::from_json(
                    StatusCode::UNAUTHORIZED,
                    &json!({"error": "Incorrect username or password."}),
                ));
            }
            Ok(ApiResponse::from_json(
                StatusCode::OK,
                &json!({
                    "name": "A",
                    "email": "a@b.com",
                    "accessToken": "acc",
                    "refreshToken": "ref",
                    "idToken": "id",
                    "username": "user-1",
                    "expiresIn": 3600
                }),
            ))
        })
    }

    #[tokio::test]
    async fn test_login_rejects_empty_credentials_without_network() {
        let transport = Arc::new(login_transport());
        let api = api(AuthMode::Bearer, transport.clone(), Arc::new(MemoryStore::new()));

        for (email, password) in [("", "x"), ("a@b.com", ""), ("   ", "x")] {
            let err = api.login(email, password).await.unwrap_err();
            assert_eq!(err.user_message(), "Email and password required");
        }
        assert_eq!(transport.count("/auth/login"), 0);
    }

    #[tokio::test]
    async fn test_login_bearer_persists_tokens_and_profile() {
        let transport = Arc::new(login_transport());
        let store = Arc::new(MemoryStore::new());
        let api = api(AuthMode::Bearer, transport, store.clone());

        let session = api.login("a@b.com", "x").await.unwrap();

        assert_eq!(session.profile.as_ref().unwrap().name.as_deref(), Some("A"));
        let stored = store.read().unwrap();
        assert_eq!(stored, session);
        assert_eq!(stored.access_token.as_deref(), Some("acc"));
        assert_eq!(stored.subject.as_deref(), Some("user-1"));
        assert!(stored.access_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_login_cookie_mode_keeps_only_profile() {
        let transport = Arc::new(login_transport());
        let store = Arc::new(MemoryStore::new());
        let api = api(AuthMode::Cookie, transport.clone(), store.clone());

        api.login("a@b.com", "x").await.unwrap();

        let stored = store.read().unwrap();
        assert!(stored.access_token.is_none());
        assert!(stored.refresh_token.is_none());
        assert_eq!(stored.profile.unwrap().email.as_deref(), Some("a@b.com"));
        assert_eq!(
            transport.requests_to("/auth/login")[0].credentials,
            crate::transport::CredentialsPolicy::Include
        );
    }

    #[tokio::test]
    async fn test_bad_password_surfaces_error_without_refresh() {
        let transport = Arc::new(login_transport());
        let existing = Session {
            profile: Some(UserProfile {
                name: Some("Old".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::with_session(existing.clone()));
        let api = api(AuthMode::Bearer, transport.clone(), store.clone());

        let err = api.login("a@b.com", "wrong").await.unwrap_err();

        assert_eq!(err.status(), Some(401));
        assert_eq!(err.user_message(), "Incorrect username or password.");
        assert_eq!(transport.count(REFRESH_PATH), 0);
        assert_eq!(store.read().unwrap(), existing);
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_service_fails() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(ApiResponse::from_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({"error": "boom"}),
            ))
        }));
        let store = Arc::new(MemoryStore::with_session(Session {
            access_token: Some("acc".into()),
            ..Default::default()
        }));
        let api = api(AuthMode::Bearer, transport.clone(), store.clone());

        api.logout().await.unwrap();

        assert!(store.read().unwrap().is_empty());
        let sent = transport.requests_to("/auth/logout");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].headers.get(AUTHORIZATION).unwrap(), "Bearer acc");
    }

    #[tokio::test]
    async fn test_register_validates_and_surfaces_duplicate() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(ApiResponse::from_json(
                StatusCode::BAD_REQUEST,
                &json!({"error": "User already exists"}),
            ))
        }));
        let api = api(AuthMode::Bearer, transport.clone(), Arc::new(MemoryStore::new()));

        let err = api.register(&RegisterRequest::default()).await.unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(transport.count("/auth/register"), 0);

        let request = RegisterRequest {
            name: "A".into(),
            email: "a@b.com".into(),
            password: "Secret123!".into(),
            ..Default::default()
        };
        let err = api.register(&request).await.unwrap_err();
        assert_eq!(err.user_message(), "User already exists");
    }

    #[tokio::test]
    async fn test_confirm_registration_with_and_without_sign_in() {
        let transport = Arc::new(ScriptedTransport::new(|req| {
            let body: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
            if body["code"] == "111111" {
                Ok(ApiResponse::from_json(StatusCode::OK, &json!({"message": "User confirmed"})))
            } else {
                Ok(ApiResponse::from_json(
                    StatusCode::OK,
                    &json!({
                        "message": "User confirmed",
                        "name": "A",
                        "accessToken": "acc",
                        "refreshToken": "ref",
                        "username": "user-1"
                    }),
                ))
            }
        }));
        let store = Arc::new(MemoryStore::new());
        let api = api(AuthMode::Bearer, transport, store.clone());

        assert!(api.confirm_registration("a@b.com", "111111").await.unwrap().is_none());
        assert!(store.read().unwrap().is_empty());

        let session = api
            .confirm_registration("a@b.com", "222222")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.access_token.as_deref(), Some("acc"));
        assert_eq!(store.read().unwrap(), session);
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let transport = Arc::new(ScriptedTransport::new(|req| {
            if req.path() == "/auth/forgot-password" {
                Ok(ApiResponse::from_json(StatusCode::OK, &json!({"message": "Code sent"})))
            } else {
                let body: Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
                assert_eq!(body["newPassword"], "N3w!pass");
                Ok(ApiResponse::new(StatusCode::OK, Default::default()))
            }
        }));
        let api = api(AuthMode::Bearer, transport, Arc::new(MemoryStore::new()));

        assert_eq!(api.forgot_password("a@b.com").await.unwrap().message, "Code sent");
        let reset = api
            .confirm_forgot_password("a@b.com", "123456", "N3w!pass")
            .await
            .unwrap();
        assert_eq!(reset, MessageResponse::default());

        assert!(matches!(
            api.forgot_password(" ").await,
            Err(ClientError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_me_refreshes_on_401() {
        let transport = Arc::new(ScriptedTransport::new(|req| {
            if req.path() == REFRESH_PATH {
                return Ok(ApiResponse::from_json(StatusCode::OK, &json!({"accessToken": "fresh"})));
            }
            match req.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                Some("Bearer fresh") => Ok(ApiResponse::from_json(
                    StatusCode::OK,
                    &json!({"user": {"name": "A", "email": "a@b.com"}}),
                )),
                _ => Ok(ApiResponse::from_json(StatusCode::UNAUTHORIZED, &json!({}))),
            }
        }));
        let store = Arc::new(MemoryStore::with_session(Session {
            access_token: Some("stale".into()),
            refresh_token: Some("ref".into()),
            subject: Some("user-1".into()),
            ..Default::default()
        }));
        let api = api(AuthMode::Bearer, transport.clone(), store);

        let profile = api.me().await.unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("A"));
        assert_eq!(transport.count(REFRESH_PATH), 1);
    }
}
