// Pre-send hook attaching the stored access token

use std::sync::Arc;

use super::credentials::CredentialStore;
use crate::http_client::{ApiRequest, RequestHook};

/// Adds `Authorization: Bearer <access token>` to outgoing requests.
///
/// Without a stored token the request goes out unauthenticated and the
/// server's answer decides what happens next.
pub struct RequestAuthenticator {
    store: Arc<CredentialStore>,
}

impl RequestAuthenticator {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self { store }
    }
}

impl RequestHook for RequestAuthenticator {
    fn before_send(&self, request: &mut ApiRequest) {
        if let Some(token) = self.store.access_token() {
            request.set_bearer(&token);
        }
    }
}
