// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Seconds shaved off a token lifetime so it is renewed before the server rejects it
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// How the deployment authenticates API calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// httponly cookies managed by the service; no token is visible to the client
    Cookie,
    /// Tokens persisted client-side and sent as `Authorization: Bearer`
    Bearer,
}

/// Profile of the signed-in user, as returned by the login endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl UserProfile {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Current session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    /// Identity-provider username the refresh exchange is bound to
    pub subject: Option<String>,
    pub profile: Option<UserProfile>,
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// True for the absent session
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Same sign-in as `other`: refresh credential, subject and profile all match
    ///
    /// Access-token fields are ignored since a refresh replaces them.
    pub fn same_login(&self, other: &Session) -> bool {
        self.refresh_token == other.refresh_token
            && self.subject == other.subject
            && self.profile == other.profile
    }

    /// Apply a refresh grant; the refresh token only changes when the service rotated it
    pub fn apply_grant(&mut self, grant: &TokenGrant) {
        if let Some(ref token) = grant.access_token {
            self.access_token = Some(token.clone());
            self.access_expires_at = grant.expires_at;
        }
        if let Some(ref id_token) = grant.id_token {
            self.id_token = Some(id_token.clone());
        }
        if let Some(ref refresh_token) = grant.refresh_token {
            self.refresh_token = Some(refresh_token.clone());
        }
    }
}

/// Credential material produced by a successful refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenGrant {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Compute an expiry with the safety buffer applied
///
/// Lifetimes too large to represent are treated as unknown.
pub fn expiry_from(now: DateTime<Utc>, expires_in: Option<u64>) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(expires_in?).ok()?;
    let lifetime = Duration::try_seconds(secs.saturating_sub(EXPIRY_BUFFER_SECS))?;
    now.checked_add_signed(lifetime)
}

// ==================================================================================================
// Wire types
// ==================================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Login response: profile fields plus tokens in bearer deployments
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    #[serde(default, rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, rename = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, rename = "idToken")]
    pub id_token: Option<String>,
    #[serde(default, alias = "cognitoUsername")]
    pub username: Option<String>,
    #[serde(default, rename = "expiresIn")]
    pub expires_in: Option<u64>,
}

impl LoginResponse {
    pub fn into_session(self, now: DateTime<Utc>) -> Session {
        let access_expires_at = self
            .access_token
            .as_ref()
            .and_then(|_| expiry_from(now, self.expires_in));
        let profile = if self.profile.is_empty() {
            None
        } else {
            Some(self.profile)
        };
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            subject: self.username,
            profile,
            access_expires_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmRequest {
    pub email: String,
    pub code: String,
}

/// Confirmation response; some deployments sign the user in on confirmation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub login: LoginResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// Bearer-mode refresh request
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub username: String,
}

/// Bearer-mode refresh response
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
}

/// `/auth/me` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeResponse {
    #[serde(default)]
    pub user: Option<UserProfile>,
}
