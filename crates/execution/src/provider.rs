//! Broker adapter contract
//!
//! Adapters submit orders to a backend and deliver asynchronous events
//! (fills, status changes) back through an [`EngineEventSink`] handle bound
//! once at registration. The handle is deliberately narrow: adapters never
//! see the engine itself, only the two ingress calls.
//!
//! Contract requirements for implementations:
//! - All methods must be safe to call from multiple threads.
//! - The synchronous `submit`/`cancel`/`modify` paths must return promptly
//!   and must NOT call back into the sink.
//! - Sink calls must be made without holding the adapter's own locks.
//! - Pending asynchronous fills for a cancelled order must be suppressed.

use std::sync::Weak;

use thiserror::Error;

use hermes_core::{Fill, OrderModification, OrderRequest, OrderUpdate};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider not connected")]
    NotConnected,
    #[error("provider failure: {0}")]
    Failed(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Engine-side ingress for adapter events
///
/// Implemented by the execution engine; adapters hold it as a `Weak`
/// reference so the dependency stays one-directional.
pub trait EngineEventSink: Send + Sync {
    /// A fill was executed for one of our orders
    fn on_fill(&self, fill: Fill);

    /// The broker reported an order status change
    fn on_order_update(&self, update: OrderUpdate);
}

/// Pluggable order-execution backend
pub trait ExecutionProvider: Send + Sync {
    /// Submit an order; returns the initial status (usually Acknowledged or
    /// Rejected)
    fn submit(&self, order: &OrderRequest) -> ProviderResult<OrderUpdate>;

    /// Cancel a pending order; returns the resulting status. If the order is
    /// already terminal the current state is returned unchanged.
    fn cancel(&self, order_id: &str) -> ProviderResult<OrderUpdate>;

    /// Modify a pending order
    fn modify(&self, modification: &OrderModification) -> ProviderResult<OrderUpdate>;

    /// Current broker-side status, if the order is known
    fn status(&self, order_id: &str) -> Option<OrderUpdate>;

    fn connect(&self);

    /// Disconnect and drain any pending asynchronous work
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Stable adapter name used for routing
    fn name(&self) -> &str;

    /// Bind the engine sink; called once when the adapter is registered
    fn bind(&self, sink: Weak<dyn EngineEventSink>);
}
