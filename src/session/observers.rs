//! Observer slots and the context handed to callbacks
//!
//! Callbacks run synchronously while the session processes transport events.
//! They cannot borrow the session; instead they queue follow-up publishes and
//! subscriptions on the [`SessionContext`], which the session performs once
//! the callback has returned.

use super::state::SessionState;
use crate::protocol::TopicKind;
use crate::transport::QoS;

/// Error returned by an observer callback
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

pub type CallbackResult = Result<(), CallbackError>;

type ConnectCallback = Box<dyn FnMut(&mut SessionContext, u8) -> CallbackResult + Send>;
type DisconnectCallback = Box<dyn FnMut(&mut SessionContext) -> CallbackResult + Send>;
type MessageCallback = Box<dyn FnMut(&mut SessionContext, &str, &[u8]) -> CallbackResult + Send>;
type SubscribeCallback = Box<dyn FnMut(&mut SessionContext, u16, &[u8]) -> CallbackResult + Send>;

/// Follow-up work queued by a callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Publish {
        kind: TopicKind,
        payload: Vec<u8>,
        subfolder: Option<String>,
        qos: QoS,
    },
    Subscribe {
        kind: TopicKind,
        qos: QoS,
    },
}

/// Handle passed to observer callbacks
#[derive(Debug)]
pub struct SessionContext {
    state: SessionState,
    pending: Vec<PendingAction>,
}

impl SessionContext {
    pub(crate) fn new(state: SessionState) -> Self {
        Self {
            state,
            pending: Vec::new(),
        }
    }

    /// Session state at the time of the event
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Queue a publish to run after the callback returns
    pub fn publish(
        &mut self,
        kind: TopicKind,
        payload: impl Into<Vec<u8>>,
        subfolder: Option<&str>,
        qos: QoS,
    ) {
        self.pending.push(PendingAction::Publish {
            kind,
            payload: payload.into(),
            subfolder: subfolder.map(str::to_string),
            qos,
        });
    }

    pub fn publish_state(&mut self, payload: impl Into<Vec<u8>>) {
        self.publish(TopicKind::State, payload, None, QoS::AtMostOnce);
    }

    /// Queue a subscription to run after the callback returns
    pub fn subscribe(&mut self, kind: TopicKind, qos: QoS) {
        self.pending.push(PendingAction::Subscribe { kind, qos });
    }

    pub fn pending(&self) -> &[PendingAction] {
        &self.pending
    }

    pub(crate) fn into_pending(self) -> Vec<PendingAction> {
        self.pending
    }
}

/// Event delivered to the observer slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notification {
    Connect(u8),
    Disconnect,
    Message { topic: String, payload: Vec<u8> },
    Subscribe { packet_id: u16, return_codes: Vec<u8> },
}

/// The four observer slots of a session
#[derive(Default)]
pub struct Observers {
    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
    on_message: Option<MessageCallback>,
    on_subscribe: Option<SubscribeCallback>,
}

impl Observers {
    pub fn set_on_connect(
        &mut self,
        callback: impl FnMut(&mut SessionContext, u8) -> CallbackResult + Send + 'static,
    ) {
        self.on_connect = Some(Box::new(callback));
    }

    pub fn set_on_disconnect(
        &mut self,
        callback: impl FnMut(&mut SessionContext) -> CallbackResult + Send + 'static,
    ) {
        self.on_disconnect = Some(Box::new(callback));
    }

    pub fn set_on_message(
        &mut self,
        callback: impl FnMut(&mut SessionContext, &str, &[u8]) -> CallbackResult + Send + 'static,
    ) {
        self.on_message = Some(Box::new(callback));
    }

    pub fn set_on_subscribe(
        &mut self,
        callback: impl FnMut(&mut SessionContext, u16, &[u8]) -> CallbackResult + Send + 'static,
    ) {
        self.on_subscribe = Some(Box::new(callback));
    }

    /// Number of occupied slots
    pub fn registered(&self) -> usize {
        [
            self.on_connect.is_some(),
            self.on_disconnect.is_some(),
            self.on_message.is_some(),
            self.on_subscribe.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.registered() == 0
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Invoke the slot matching `notification`, if one is registered
    pub(crate) fn dispatch(
        &mut self,
        context: &mut SessionContext,
        notification: &Notification,
    ) -> CallbackResult {
        match notification {
            Notification::Connect(code) => match self.on_connect.as_mut() {
                Some(callback) => callback(context, *code),
                None => Ok(()),
            },
            Notification::Disconnect => match self.on_disconnect.as_mut() {
                Some(callback) => callback(context),
                None => Ok(()),
            },
            Notification::Message { topic, payload } => match self.on_message.as_mut() {
                Some(callback) => callback(context, topic, payload),
                None => Ok(()),
            },
            Notification::Subscribe {
                packet_id,
                return_codes,
            } => match self.on_subscribe.as_mut() {
                Some(callback) => callback(context, *packet_id, return_codes),
                None => Ok(()),
            },
        }
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_subscribe", &self.on_subscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_reaches_matching_slot() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::default();

        let log = seen.clone();
        observers.set_on_message(move |_, topic, payload| {
            log.lock().unwrap().push((topic.to_string(), payload.to_vec()));
            Ok(())
        });

        let mut context = SessionContext::new(SessionState::Connected);
        observers
            .dispatch(
                &mut context,
                &Notification::Message {
                    topic: "t".to_string(),
                    payload: b"p".to_vec(),
                },
            )
            .unwrap();
        // Empty slots are a no-op
        observers
            .dispatch(&mut context, &Notification::Connect(0))
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("t".to_string(), b"p".to_vec())]
        );
    }

    #[test]
    fn test_callback_error_is_returned() {
        let mut observers = Observers::default();
        observers.set_on_disconnect(|_| Err("lost".into()));

        let mut context = SessionContext::new(SessionState::Disconnected);
        let result = observers.dispatch(&mut context, &Notification::Disconnect);
        assert_eq!(result.unwrap_err().to_string(), "lost");
    }

    #[test]
    fn test_context_queues_actions() {
        let mut context = SessionContext::new(SessionState::Connected);
        context.publish_state(b"on".to_vec());
        context.subscribe(TopicKind::Config, QoS::AtLeastOnce);

        assert_eq!(
            context.into_pending(),
            vec![
                PendingAction::Publish {
                    kind: TopicKind::State,
                    payload: b"on".to_vec(),
                    subfolder: None,
                    qos: QoS::AtMostOnce,
                },
                PendingAction::Subscribe {
                    kind: TopicKind::Config,
                    qos: QoS::AtLeastOnce,
                },
            ]
        );
    }

    #[test]
    fn test_clear_empties_every_slot() {
        let mut observers = Observers::default();
        observers.set_on_connect(|_, _| Ok(()));
        observers.set_on_disconnect(|_| Ok(()));
        observers.set_on_message(|_, _, _| Ok(()));
        observers.set_on_subscribe(|_, _, _| Ok(()));
        assert_eq!(observers.registered(), 4);

        observers.clear();
        assert!(observers.is_empty());
    }
}
