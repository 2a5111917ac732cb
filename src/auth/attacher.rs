// Credential attachment strategies
// One implementation per deployment auth mode

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Method;
use std::sync::Arc;

use super::refresh::RefreshError;
use super::types::{expiry_from, AuthMode, RefreshRequest, RefreshResponse, Session, TokenGrant};
use crate::transport::{ApiRequest, ApiResponse, CredentialsPolicy};

/// Mode-specific credential handling used by the gateway and the refresh coordinator
pub trait CredentialAttacher: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// Attach the session's credential to an outbound request
    fn attach(&self, request: &mut ApiRequest, session: &Session);

    /// Build the refresh exchange for the current session
    fn refresh_request(&self, url: &str, session: &Session) -> Result<ApiRequest, RefreshError>;

    /// Interpret a successful refresh response
    fn token_grant(
        &self,
        response: &ApiResponse,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, RefreshError>;
}

/// Pick the attacher for a configured mode
pub fn attacher_for(mode: AuthMode) -> Arc<dyn CredentialAttacher> {
    match mode {
        AuthMode::Cookie => Arc::new(CookieAttacher),
        AuthMode::Bearer => Arc::new(BearerAttacher),
    }
}

/// `Authorization: Bearer <access token>` with tokens held by the credential store
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerAttacher;

impl CredentialAttacher for BearerAttacher {
    fn mode(&self) -> AuthMode {
        AuthMode::Bearer
    }

    fn attach(&self, request: &mut ApiRequest, session: &Session) {
        let Some(ref token) = session.access_token else {
            request.headers.remove(AUTHORIZATION);
            return;
        };
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => request.set_header(AUTHORIZATION, value),
            Err(_) => {
                tracing::warn!("Stored access token is not a valid header value; sending without it");
                request.headers.remove(AUTHORIZATION);
            }
        }
    }

    fn refresh_request(&self, url: &str, session: &Session) -> Result<ApiRequest, RefreshError> {
        let (Some(refresh_token), Some(username)) =
            (session.refresh_token.clone(), session.subject.clone())
        else {
            return Err(RefreshError::MissingCredential);
        };

        ApiRequest::new(Method::POST, url)
            .json(&RefreshRequest {
                refresh_token,
                username,
            })
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }

    fn token_grant(
        &self,
        response: &ApiResponse,
        now: DateTime<Utc>,
    ) -> Result<TokenGrant, RefreshError> {
        let data: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        if data.access_token.is_empty() {
            return Err(RefreshError::InvalidResponse(
                "response does not contain accessToken".to_string(),
            ));
        }

        Ok(TokenGrant {
            expires_at: expiry_from(now, data.expires_in),
            access_token: Some(data.access_token),
            id_token: data.id_token,
            refresh_token: data.refresh_token,
        })
    }
}

/// httponly cookies: the client only opts requests into sending them
#[derive(Debug, Default, Clone, Copy)]
pub struct CookieAttacher;

impl CredentialAttacher for CookieAttacher {
    fn mode(&self) -> AuthMode {
        AuthMode::Cookie
    }

    fn attach(&self, request: &mut ApiRequest, _session: &Session) {
        request.credentials = CredentialsPolicy::Include;
    }

    fn refresh_request(&self, url: &str, _session: &Session) -> Result<ApiRequest, RefreshError> {
        Ok(ApiRequest::new(Method::POST, url).with_credentials(CredentialsPolicy::Include))
    }

    fn token_grant(
        &self,
        _response: &ApiResponse,
        _now: DateTime<Utc>,
    ) -> Result<TokenGrant, RefreshError> {
        // Rotation happens in the cookie jar
        Ok(TokenGrant::default())
    }
}
