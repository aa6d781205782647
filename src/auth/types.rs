// Authentication types

use serde::{Deserialize, Serialize};

/// Access and refresh token, always stored and cleared together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Refresh endpoint response body
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

/// Session transitions the UI layer reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Refresh failed and credentials were cleared; the UI must send the
    /// user to `login_route`
    Expired { login_route: String },

    /// Credentials were cleared by an explicit logout
    LoggedOut,
}
