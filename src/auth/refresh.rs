// Token endpoint calls

use reqwest::Method;

use super::types::{CredentialPair, RefreshResponse};
use crate::error::{RefreshError, TransportError};
use crate::http_client::{ApiRequest, Transport};

pub const REFRESH_PATH: &str = "/token/refresh";
pub const LOGOUT_PATH: &str = "/token/logout";

/// Exchange the refresh token for a new credential pair.
///
/// `POST /token/refresh` with the refresh token as bearer credential and no
/// body. Any non-2xx status, including 401 from an intermediary, is a
/// failure; so is a body without both tokens.
pub async fn refresh_credentials(
    transport: &dyn Transport,
    refresh_token: &str,
) -> Result<CredentialPair, RefreshError> {
    tracing::info!("Refreshing access token...");

    let mut request = ApiRequest::new(Method::POST, REFRESH_PATH);
    request.set_bearer(refresh_token);

    let response = transport.send(&request).await?;

    if !response.status.is_success() {
        let error_text = response.text();
        tracing::error!(
            status = response.status.as_u16(),
            body = %error_text,
            "Token refresh failed"
        );
        return Err(RefreshError::Rejected {
            status: response.status.as_u16(),
            message: error_text,
        });
    }

    let data: RefreshResponse = serde_json::from_slice(&response.body)
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;

    if data.access_token.is_empty() || data.refresh_token.is_empty() {
        return Err(RefreshError::Malformed(
            "response does not contain both tokens".to_string(),
        ));
    }

    tracing::info!("Access token refreshed");

    Ok(CredentialPair {
        access_token: data.access_token,
        refresh_token: data.refresh_token,
    })
}

/// Tell the server to revoke the session. Best effort: callers clear local
/// credentials whatever this returns.
pub async fn revoke_session(
    transport: &dyn Transport,
    access_token: Option<&str>,
) -> Result<(), TransportError> {
    let mut request = ApiRequest::new(Method::DELETE, LOGOUT_PATH);
    if let Some(token) = access_token {
        request.set_bearer(token);
    }

    let response = transport.send(&request).await?;
    if !response.status.is_success() {
        tracing::warn!(
            status = response.status.as_u16(),
            "Logout request was not accepted by the server"
        );
    }

    Ok(())
}
