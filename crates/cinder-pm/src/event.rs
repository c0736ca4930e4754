//! Event bus for transaction lifecycle notifications.
//!
//! Listeners observe events in happens-before order relative to the
//! action that produced them: publication happens under the bus lock
//! after the producing mutation completed.

use std::sync::{Arc, Mutex};

use crate::installer::TransactionState;
use crate::package::Package;

/// A lifecycle notification published by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    InstallCompleted { package: Package },
    UninstallCompleted { package: Package },
    RepositorySynced { name: String },
    TransactionStateChanged { state: TransactionState },
}

pub trait EventListener: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Dispatches events to subscribed listeners, in subscription order.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn publish(&self, event: &Event) {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.handle(event);
        }
    }
}
