// Session lifecycle notifications for the UI layer

use tokio::sync::broadcast;

use super::types::SessionEvent;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Broadcasts session transitions to any number of subscribers.
///
/// Sending never blocks and never fails the caller; events emitted while
/// nobody is subscribed are dropped.
#[derive(Clone)]
pub struct SessionEvents {
    sender: broadcast::Sender<SessionEvent>,
    login_route: String,
}

impl SessionEvents {
    pub fn new(login_route: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sender,
            login_route: login_route.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Force re-authentication
    pub fn expired(&self) {
        tracing::warn!(
            login_route = %self.login_route,
            "Session expired, re-authentication required"
        );
        self.emit(SessionEvent::Expired {
            login_route: self.login_route.clone(),
        });
    }

    pub fn logged_out(&self) {
        self.emit(SessionEvent::LoggedOut);
    }

    fn emit(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("No session subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_expired_carries_login_route() {
        let events = SessionEvents::new("/login");
        let mut rx = events.subscribe();

        events.expired();

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Expired {
                login_route: "/login".to_string()
            }
        );
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_every_subscriber_sees_event() {
        let events = SessionEvents::new("/auth/sign-in");
        let mut first = events.subscribe();
        let mut second = events.clone().subscribe();

        events.logged_out();

        assert_eq!(first.try_recv().unwrap(), SessionEvent::LoggedOut);
        assert_eq!(second.try_recv().unwrap(), SessionEvent::LoggedOut);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let events = SessionEvents::new("/login");
        events.expired();
        events.logged_out();

        // Only events sent after subscribing are delivered
        let mut late = events.subscribe();
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
    }
}
