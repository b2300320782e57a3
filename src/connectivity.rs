//! Network reachability reporting.
//!
//! [`ConnectivityMonitor`] is an explicitly owned value: clones share the same
//! state and subscriber list, so every component that needs connectivity gets
//! a handle passed in rather than reading a global flag.

use crate::config::ConnectivityConfig;
use log::{debug, info};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpStream, task::JoinHandle, time};
use trait_variant::make;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectivityState {
    pub connected: bool,
}

impl ConnectivityState {
    pub const CONNECTED: Self = Self { connected: true };
    pub const DISCONNECTED: Self = Self { connected: false };
}

pub type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

type Listeners = Mutex<Vec<(u64, Listener)>>;

#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ConnectivityProbe {
    /// Point-in-time reachability check.
    async fn current_state(&self) -> ConnectivityState;

    /// Invoke `listener` on every transition until the subscription is dropped.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
            debug!("connectivity listener {} unsubscribed", self.id);
        }
    }
}

/// Aborts the background polling task when dropped.
pub struct Polling(JoinHandle<()>);

impl Drop for Polling {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    connected: AtomicBool,
    listeners: Arc<Listeners>,
    next_id: AtomicU64,
    target: Option<String>,
    probe_timeout: Duration,
}

impl ConnectivityMonitor {
    pub fn new(target: Option<String>, probe_timeout: Duration) -> Self {
        Self::with_initial_state(target, probe_timeout, ConnectivityState::CONNECTED)
    }

    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self::new(config.target.clone(), config.probe_timeout)
    }

    /// A monitor without a probe target; its state changes only through [`Self::report`].
    pub fn manual(initial: ConnectivityState) -> Self {
        Self::with_initial_state(None, Duration::ZERO, initial)
    }

    fn with_initial_state(
        target: Option<String>,
        probe_timeout: Duration,
        initial: ConnectivityState,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(initial.connected),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_id: AtomicU64::new(0),
                target,
                probe_timeout,
            }),
        }
    }

    /// Last known state, without probing.
    pub fn last_state(&self) -> ConnectivityState {
        ConnectivityState {
            connected: self.inner.connected.load(Ordering::SeqCst),
        }
    }

    /// Record a new state and notify subscribers if it differs from the previous one.
    pub fn report(&self, state: ConnectivityState) {
        let previous = self.inner.connected.swap(state.connected, Ordering::SeqCst);
        if previous == state.connected {
            return;
        }

        info!(
            "connectivity changed: {}",
            if state.connected { "online" } else { "offline" }
        );

        // call listeners outside the lock so they may (un)subscribe
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener(state);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Re-probe the target every `every` until the returned handle is dropped.
    pub fn spawn_polling(&self, every: Duration) -> Polling {
        let monitor = self.clone();

        Polling(tokio::spawn(async move {
            let mut ticker = time::interval(every);
            loop {
                ticker.tick().await;
                monitor.current_state().await;
            }
        }))
    }

    async fn probe(&self, target: &str) -> ConnectivityState {
        let connected = matches!(
            time::timeout(self.inner.probe_timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        );
        debug!("probe {target}: connected={connected}");
        ConnectivityState { connected }
    }
}

impl ConnectivityProbe for ConnectivityMonitor {
    async fn current_state(&self) -> ConnectivityState {
        let Some(target) = self.inner.target.as_deref() else {
            return self.last_state();
        };

        let state = self.probe(target).await;
        self.report(state);
        state
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        debug!("connectivity listener {id} subscribed");

        Subscription {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }
}
