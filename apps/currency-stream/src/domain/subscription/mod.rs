//! Subscription Registry
//!
//! Tracks which instrument codes each live-channel connection wants pushed,
//! and the reverse index from code to interested connections (the code's
//! topic group).
//!
//! # Design
//!
//! The registry tracks:
//! - One subscription set per registered connection
//! - One topic group per code with at least one subscriber
//!
//! Both maps live behind a single lock so a connection's set and its topic
//! memberships are always updated together. A connection appears in a topic
//! group only while it is registered, so fan-out never addresses a
//! connection that has already gone away.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::domain::quote::{InstrumentCode, normalize_code};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a live-channel connection.
pub type ConnectionId = u64;

/// Default cap on codes accepted in a single subscribe call.
pub const DEFAULT_MAX_CODES_PER_REQUEST: usize = 100;

/// Subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// Request carried more codes than a single call accepts.
    #[error("Maximum {max} currencies allowed per subscription (got {requested})")]
    TooManyCodes {
        /// Codes in the request.
        requested: usize,
        /// Configured cap.
        max: usize,
    },

    /// The connection is not registered.
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
}

/// Result of a subscribe or unsubscribe call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChange {
    /// Normalized codes that changed membership in this call.
    pub changed: Vec<InstrumentCode>,
    /// Size of the connection's subscription set after the call.
    pub total: usize,
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    /// Map from connection to its subscribed codes.
    connections: HashMap<ConnectionId, HashSet<InstrumentCode>>,
    /// Map from code to the connections subscribed to it.
    topics: HashMap<InstrumentCode, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn join(&mut self, connection: ConnectionId, code: &str) {
        self.topics
            .entry(code.to_string())
            .or_default()
            .insert(connection);
    }

    fn leave(&mut self, connection: ConnectionId, code: &str) {
        if let Some(members) = self.topics.get_mut(code) {
            members.remove(&connection);
            if members.is_empty() {
                self.topics.remove(code);
            }
        }
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Per-connection subscription sets with topic-group membership.
///
/// # Example
///
/// ```rust
/// use currency_stream::domain::subscription::SubscriptionRegistry;
///
/// let registry = SubscriptionRegistry::new();
/// registry.on_connect(1);
///
/// registry.subscribe(1, &["usd".to_string(), "EUR".to_string()]).unwrap();
/// assert_eq!(registry.topic_members("USD"), vec![1]);
///
/// registry.on_disconnect(1);
/// assert!(registry.topic_members("USD").is_empty());
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
    max_codes_per_request: usize,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create a registry with the default per-call cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_codes(DEFAULT_MAX_CODES_PER_REQUEST)
    }

    /// Create a registry with a custom per-call cap.
    #[must_use]
    pub fn with_max_codes(max_codes_per_request: usize) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            max_codes_per_request,
        }
    }

    /// Per-call cap on requested codes.
    #[must_use]
    pub const fn max_codes_per_request(&self) -> usize {
        self.max_codes_per_request
    }

    /// Register a connection with an empty subscription set.
    ///
    /// Re-registering an existing id keeps its current set.
    pub fn on_connect(&self, connection: ConnectionId) {
        self.state
            .write()
            .connections
            .entry(connection)
            .or_default();
    }

    /// Remove a connection and every topic membership it holds.
    ///
    /// Removing an unknown id is a no-op. Returns the codes the connection
    /// was subscribed to.
    pub fn on_disconnect(&self, connection: ConnectionId) -> Vec<InstrumentCode> {
        let mut state = self.state.write();
        let Some(codes) = state.connections.remove(&connection) else {
            return vec![];
        };

        for code in &codes {
            state.leave(connection, code);
        }

        codes.into_iter().collect()
    }

    /// Add codes to a connection's subscription set.
    ///
    /// Codes are normalized to upper case and unioned into the existing set;
    /// the connection joins each code's topic group.
    ///
    /// # Errors
    ///
    /// `TooManyCodes` if the request exceeds the per-call cap, and
    /// `UnknownConnection` if the connection is not registered. Neither
    /// case changes any state.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        codes: &[String],
    ) -> Result<SubscriptionChange, SubscriptionError> {
        self.check_request_size(codes)?;

        let mut state = self.state.write();
        let set = state
            .connections
            .get_mut(&connection)
            .ok_or(SubscriptionError::UnknownConnection(connection))?;

        let mut changed = Vec::new();
        for code in codes.iter().map(|c| normalize_code(c)) {
            if code.is_empty() {
                continue;
            }
            if set.insert(code.clone()) {
                changed.push(code);
            }
        }
        let total = set.len();

        for code in &changed {
            state.join(connection, code);
        }

        Ok(SubscriptionChange { changed, total })
    }

    /// Remove codes from a connection's subscription set.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::subscribe`].
    pub fn unsubscribe(
        &self,
        connection: ConnectionId,
        codes: &[String],
    ) -> Result<SubscriptionChange, SubscriptionError> {
        self.check_request_size(codes)?;

        let mut state = self.state.write();
        let set = state
            .connections
            .get_mut(&connection)
            .ok_or(SubscriptionError::UnknownConnection(connection))?;

        let mut changed = Vec::new();
        for code in codes.iter().map(|c| normalize_code(c)) {
            if set.remove(&code) {
                changed.push(code);
            }
        }
        let total = set.len();

        for code in &changed {
            state.leave(connection, code);
        }

        Ok(SubscriptionChange { changed, total })
    }

    /// Connections in the topic group for `code`.
    #[must_use]
    pub fn topic_members(&self, code: &str) -> Vec<ConnectionId> {
        self.state
            .read()
            .topics
            .get(code)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Codes a connection is subscribed to.
    #[must_use]
    pub fn subscriptions_of(&self, connection: ConnectionId) -> Vec<InstrumentCode> {
        self.state
            .read()
            .connections
            .get(&connection)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether the connection is registered.
    #[must_use]
    pub fn is_registered(&self, connection: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&connection)
    }

    /// Registry statistics. Observability only.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let active_connections = state.connections.len();
        let total_subscriptions: usize = state.connections.values().map(HashSet::len).sum();

        #[allow(clippy::cast_precision_loss)]
        let average = if active_connections > 0 {
            total_subscriptions as f64 / active_connections as f64
        } else {
            0.0
        };

        RegistryStats {
            active_connections,
            total_subscriptions,
            average_subscriptions_per_connection: average,
            active_topics: state.topics.len(),
        }
    }

    const fn check_request_size(&self, codes: &[String]) -> Result<(), SubscriptionError> {
        if codes.len() > self.max_codes_per_request {
            return Err(SubscriptionError::TooManyCodes {
                requested: codes.len(),
                max: self.max_codes_per_request,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Connection and subscription counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Registered connections.
    pub active_connections: usize,
    /// Sum of subscription set sizes across connections.
    pub total_subscriptions: usize,
    /// Mean subscription set size, 0 with no connections.
    pub average_subscriptions_per_connection: f64,
    /// Codes with at least one subscriber.
    pub active_topics: usize,
}

// =============================================================================
// Tests
// =============================================================================
