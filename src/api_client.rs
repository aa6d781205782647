use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::auth::{
    revoke_session, CredentialPair, CredentialStore, RefreshCoordinator, RequestAuthenticator,
    SessionEvent, SessionEvents, SqliteStore,
};
use crate::config::Config;
use crate::error::{ClientError, Result};
use crate::http_client::{ApiRequest, ApiResponse, ReqwestTransport, RequestHook, Transport};

/// Authenticated API client.
///
/// Every request runs through the pre-send hooks (the authenticator first),
/// the transport, and the refresh coordinator. The verb helpers return only
/// the decoded payload.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    hooks: Vec<Arc<dyn RequestHook>>,
    coordinator: RefreshCoordinator,
    session: SessionEvents,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        session: SessionEvents,
    ) -> Self {
        let coordinator =
            RefreshCoordinator::new(store.clone(), transport.clone(), session.clone());
        let authenticator: Arc<dyn RequestHook> =
            Arc::new(RequestAuthenticator::new(store.clone()));

        Self {
            transport,
            store,
            hooks: vec![authenticator],
            coordinator,
            session,
        }
    }

    /// Client over reqwest and the SQLite credential file named in `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = ReqwestTransport::new(
            &config.api_base_url,
            config.http_max_connections,
            config.http_connect_timeout,
            config.http_request_timeout,
        )?;
        let store = CredentialStore::new(SqliteStore::open(&config.credentials_db_file)?);

        Ok(Self::new(
            Arc::new(transport),
            Arc::new(store),
            SessionEvents::new(config.login_route.clone()),
        ))
    }

    /// Add a pre-send hook; hooks run in insertion order after the authenticator
    pub fn with_hook(mut self, hook: Arc<dyn RequestHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Subscribe to session transitions (forced re-authentication, logout)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Store credentials obtained by a login flow
    pub fn sign_in(&self, pair: &CredentialPair) -> Result<()> {
        self.store.set(pair)?;
        tracing::info!("Credentials stored");
        Ok(())
    }

    /// Revoke the session server-side (best effort) and clear local credentials
    pub async fn logout(&self) -> Result<()> {
        let access_token = self.store.access_token();
        if let Err(e) = revoke_session(self.transport.as_ref(), access_token.as_deref()).await {
            tracing::warn!("Logout request failed, clearing local credentials anyway: {}", e);
        }

        self.store.clear()?;
        self.session.logged_out();
        tracing::info!("Logged out");
        Ok(())
    }

    /// Send a request through the full pipeline and return the raw response.
    ///
    /// Authentication failures are recovered or turned into errors; other
    /// statuses come back untouched.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        for hook in &self.hooks {
            hook.before_send(&mut request);
        }

        let response = self.transport.send(&request).await?;
        self.coordinator.handle_response(request, response).await
    }

    /// Send `method path` with an optional JSON body and decode the payload
    pub async fn request<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = ApiRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_json(body)?;
        }

        let response = self.send(request).await?;
        decode_payload(response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<(), T>(Method::DELETE, path, None).await
    }
}

/// Unwrap the payload of a successful response
fn decode_payload<T: DeserializeOwned>(response: ApiResponse) -> Result<T> {
    if !response.status.is_success() {
        return Err(ClientError::Api {
            status: response.status.as_u16(),
            message: response.text(),
        });
    }

    // Empty bodies (204, bare 200) decode as JSON null
    if response.body.is_empty() {
        return Ok(serde_json::from_slice(b"null")?);
    }

    Ok(serde_json::from_slice(&response.body)?)
}
