//! Hermes Execution Engine
//!
//! The only entry point strategies use to act on the market:
//! - **Engine**: risk-gated submit/cancel/modify, broker routing, fill
//!   reconciliation, order-state machine, coordinated shutdown
//! - **Provider contract**: pluggable broker adapters behind
//!   [`ExecutionProvider`], delivering asynchronous events through a
//!   [`EngineEventSink`] capability handle
//! - **Event bus**: order and fill records published as self-describing JSON
//! - **Mock broker**: deterministic adapter for tests and simulation
//!
//! ## Threading
//!
//! Strategy threads call `submit`/`cancel`/`modify`; adapter threads deliver
//! fills and status updates through the sink. Each component owns a single
//! mutex; the permitted lock order is engine, then risk, then position.
//! Callbacks may run on either kind of thread and must not re-enter the
//! engine.

pub mod callbacks;
pub mod engine;
pub mod mock;
pub mod provider;
pub mod publisher;

pub use callbacks::SubscriberId;
pub use engine::{EngineConfig, EngineStats, ExecutionEngine};
pub use mock::{MockBroker, MockBrokerConfig, MockStats};
pub use provider::{EngineEventSink, ExecutionProvider, ProviderError, ProviderResult};
pub use publisher::{BroadcastBus, BusError, BusMessage, EventBus, NullBus};
