//! services/bot/src/bot/dispatcher.rs
//!
//! Routes inbound events to per-user mailboxes. Each mailbox is drained by one
//! worker task, so events of one user are handled strictly in arrival order
//! while different users proceed concurrently.

use prezentor_core::domain::UserId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::bot::controller;
use crate::bot::protocol::InboundEvent;
use crate::bot::state::AppState;

/// A worker exits after this long without events.
const WORKER_IDLE: Duration = Duration::from_secs(300);

type Mailboxes = Arc<Mutex<HashMap<UserId, mpsc::UnboundedSender<InboundEvent>>>>;

#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<AppState>,
    mailboxes: Mailboxes,
    idle: Duration,
}

fn lock(mailboxes: &Mailboxes) -> MutexGuard<'_, HashMap<UserId, mpsc::UnboundedSender<InboundEvent>>> {
    mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self::with_idle_timeout(state, WORKER_IDLE)
    }

    pub fn with_idle_timeout(state: Arc<AppState>, idle: Duration) -> Self {
        Self {
            state,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Drops every mailbox sender. Workers finish what is queued and exit.
    pub fn close(&self) {
        lock(&self.mailboxes).clear();
    }

    /// Queues the event behind the user's earlier events.
    pub fn dispatch(&self, event: InboundEvent) {
        let mut mailboxes = lock(&self.mailboxes);
        let event = match mailboxes.get(&event.user) {
            Some(sender) => match sender.send(event) {
                Ok(()) => return,
                // The worker is gone; take the event back and start a new one.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let user = event.user.clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        // A fresh channel with a live receiver cannot refuse.
        let _ = sender.send(event);
        mailboxes.insert(user.clone(), sender);
        drop(mailboxes);

        debug!(%user, "Starting mailbox worker");
        self.state.tracker.spawn(worker(
            self.state.clone(),
            self.mailboxes.clone(),
            user,
            receiver,
            self.idle,
        ));
    }
}

async fn worker(
    state: Arc<AppState>,
    mailboxes: Mailboxes,
    user: UserId,
    mut receiver: mpsc::UnboundedReceiver<InboundEvent>,
    idle: Duration,
) {
    loop {
        match tokio::time::timeout(idle, receiver.recv()).await {
            Ok(Some(event)) => controller::handle(&state, event).await,
            Ok(None) => break,
            Err(_) => {
                // Senders queue under the same lock, so an empty receiver here
                // means nothing can be lost by retiring.
                let mut mailboxes = lock(&mailboxes);
                if receiver.is_empty() {
                    mailboxes.remove(&user);
                    break;
                }
            }
        }
    }
    debug!(%user, "Mailbox worker retired");
}
