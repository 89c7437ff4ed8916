use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::channels::{Interaction, MessageHandle};

/// Hands inbound interactions to the flow suspended on that message.
///
/// At most one waiter per message: a flow subscribes, renders, then awaits
/// exactly one interaction before subscribing again.
#[derive(Default)]
pub struct InteractionBus {
    waiters: Mutex<HashMap<String, oneshot::Sender<Interaction>>>,
}

impl InteractionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handle: &MessageHandle) -> oneshot::Receiver<Interaction> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
        waiters.retain(|_, w| !w.is_closed());
        waiters.insert(handle.key(), tx);
        rx
    }

    /// Returns the interaction back when no live flow is waiting for it.
    pub fn deliver(&self, interaction: Interaction) -> Result<(), Interaction> {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&interaction.handle.key());
        match waiter {
            Some(tx) => tx.send(interaction),
            None => Err(interaction),
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|w| !w.is_closed())
            .count()
    }
}
