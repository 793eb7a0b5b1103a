//! Handler registry.
//!
//! Maps event names to handlers and holds the singleton lifecycle hooks. The
//! dispatch path takes the read lock only long enough to clone an `Arc` to
//! the handler; handlers and hooks always run with the lock released, so a
//! handler may register or unsubscribe other handlers.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use bytes::Bytes;

use crate::error::EtpError;

/// Fire-and-forget handler.
pub type EventHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Reply-producing handler; its return value travels back as the ack
/// payload.
pub type ReplyHandler = Arc<dyn Fn(Bytes) -> Bytes + Send + Sync>;

/// Handler for events without a registered handler.
pub type DefaultHandler = Arc<dyn Fn(&str, Bytes) + Send + Sync>;

/// Hook invoked once a connection is established.
pub type ConnectHook = Arc<dyn Fn() + Send + Sync>;

/// Hook invoked with an error (disconnect cause or recoverable failure).
pub type ErrorHook = Arc<dyn Fn(&EtpError) + Send + Sync>;

/// Handler bound to an event name. A name maps to exactly one kind.
#[derive(Clone)]
enum Route {
    Event(EventHandler),
    Reply(ReplyHandler),
}

#[derive(Default)]
struct Routes {
    events: HashMap<String, Route>,
    default: Option<DefaultHandler>,
    connect: Option<ConnectHook>,
    disconnect: Option<ErrorHook>,
    error: Option<ErrorHook>,
}

/// Thread-safe event handler registry.
#[derive(Default)]
pub struct HandlerRegistry {
    routes: RwLock<Routes>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fire-and-forget handler to `event`, replacing any handler of
    /// either kind.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.write().events.insert(event.into(), Route::Event(Arc::new(handler)));
    }

    /// Bind a reply handler to `event`, replacing any handler of either kind.
    pub fn on_with_ack<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Bytes) -> Bytes + Send + Sync + 'static,
    {
        self.write().events.insert(event.into(), Route::Reply(Arc::new(handler)));
    }

    /// Remove the handler bound to `event`. Returns `true` if one existed.
    pub fn unsubscribe(&self, event: &str) -> bool {
        self.write().events.remove(event).is_some()
    }

    /// Set the handler for events nobody subscribed to.
    pub fn on_default<F>(&self, handler: F)
    where
        F: Fn(&str, Bytes) + Send + Sync + 'static,
    {
        self.write().default = Some(Arc::new(handler));
    }

    /// Set the connect hook.
    pub fn on_connect<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.write().connect = Some(Arc::new(hook));
    }

    /// Set the disconnect hook.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: Fn(&EtpError) + Send + Sync + 'static,
    {
        self.write().disconnect = Some(Arc::new(hook));
    }

    /// Set the error hook.
    pub fn on_error<F>(&self, hook: F)
    where
        F: Fn(&EtpError) + Send + Sync + 'static,
    {
        self.write().error = Some(Arc::new(hook));
    }

    /// Fire-and-forget handler bound to `event`.
    pub fn event_handler(&self, event: &str) -> Option<EventHandler> {
        match self.read().events.get(event) {
            Some(Route::Event(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    /// Reply handler bound to `event`.
    pub fn reply_handler(&self, event: &str) -> Option<ReplyHandler> {
        match self.read().events.get(event) {
            Some(Route::Reply(handler)) => Some(handler.clone()),
            _ => None,
        }
    }

    /// Default handler, if set.
    pub fn default_handler(&self) -> Option<DefaultHandler> {
        self.read().default.clone()
    }

    /// True if any handler is bound to `event`.
    pub fn contains(&self, event: &str) -> bool {
        self.read().events.contains_key(event)
    }

    /// Invoke the connect hook.
    pub fn notify_connect(&self) {
        let hook = self.read().connect.clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Invoke the disconnect hook.
    pub fn notify_disconnect(&self, err: &EtpError) {
        let hook = self.read().disconnect.clone();
        if let Some(hook) = hook {
            hook(err);
        }
    }

    /// Invoke the error hook.
    pub fn notify_error(&self, err: &EtpError) {
        let hook = self.read().error.clone();
        if let Some(hook) = hook {
            hook(err);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Routes> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Routes> {
        self.routes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.read();
        f.debug_struct("HandlerRegistry")
            .field("events", &routes.events.len())
            .field("default", &routes.default.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn event_and_reply_handlers_are_exclusive() {
        let registry = HandlerRegistry::new();
        registry.on("sum", |_| {});
        assert!(registry.event_handler("sum").is_some());
        assert!(registry.reply_handler("sum").is_none());

        registry.on_with_ack("sum", |payload| payload);
        assert!(registry.event_handler("sum").is_none());
        assert!(registry.reply_handler("sum").is_some());
    }

    #[test]
    fn unsubscribe_removes_either_kind() {
        let registry = HandlerRegistry::new();
        registry.on("a", |_| {});
        registry.on_with_ack("b", |payload| payload);

        assert!(registry.unsubscribe("a"));
        assert!(registry.unsubscribe("b"));
        assert!(!registry.unsubscribe("a"));
        assert!(!registry.contains("b"));
    }

    #[test]
    fn reply_handler_returns_payload() {
        let registry = HandlerRegistry::new();
        registry.on_with_ack("upper", |payload| Bytes::from(payload.to_ascii_uppercase()));

        let handler = registry.reply_handler("upper").unwrap();
        assert_eq!(handler(Bytes::from_static(b"abc")), Bytes::from_static(b"ABC"));
    }

    #[test]
    fn hooks_are_optional() {
        let registry = HandlerRegistry::new();
        registry.notify_connect();
        registry.notify_disconnect(&EtpError::ConnectionClosed);
        registry.notify_error(&EtpError::ConnectionClosed);
    }

    #[test]
    fn hooks_replace_previous() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        registry.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&second);
        registry.on_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify_error(&EtpError::NotConnected);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = Arc::clone(&registry);
        registry.on("subscribe", move |_| inner.on("late", |_| {}));

        let handler = registry.event_handler("subscribe").unwrap();
        handler(Bytes::new());
        assert!(registry.contains("late"));
    }
}
