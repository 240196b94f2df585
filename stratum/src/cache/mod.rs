//! Cache Module
//!
//! - Coordinator: two-tier reads/writes with promotion and push updates
//! - Subscriptions: per-key listener fan-out
//! - Tuner: capacity and eviction policy driven by the statistics window

pub mod coordinator;
pub mod subscriptions;
pub mod tuner;

pub use coordinator::TieredCache;
pub use subscriptions::{DispatchReport, UpdateListener, UpdateSubscription};
pub use tuner::{AdaptiveTuner, TuningReport};
