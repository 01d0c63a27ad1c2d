//! Progress callbacks for a handshake run
//!
//! Observers are display-only: they see every normalized response and the
//! decoded challenge, but cannot change the outcome. All methods default to
//! no-ops so an observer only overrides what it prints.

use serde_json::Value;
use xcat_core::{IdempotencyKey, TaskId};

use crate::payment::PaymentChallenge;
use crate::state_machine::State;

/// Trait for handshake progress observers
pub trait HandshakeObserver: Send + Sync {
    /// Filtered tool names, sorted, before any call is made
    fn on_tools(&self, _names: &[String]) {}

    /// Key reused by the create call and its retry
    fn on_idempotency_key(&self, _key: &IdempotencyKey) {}

    /// Normalized result of a tool call
    fn on_response(&self, _tool: &str, _response: &Value) {}

    /// Challenge decoded from a `PAYMENT_REQUIRED` failure
    fn on_challenge(&self, _challenge: &PaymentChallenge) {}

    /// Every state the driver passes through, terminal ones included
    fn on_state(&self, _state: &State) {}

    /// Artifact written for `task_id`
    fn on_saved(&self, _task_id: TaskId, _bytes: u64) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl HandshakeObserver for NoopObserver {}
