//! In-memory main update bus.
//!
//! Delivery is best-effort per subscriber: a slow subscriber observes
//! `Lagged` and is expected to resync with a connect update rather than
//! replay the gap. Screen-scoped records additionally fan out to that
//! screen's channel so web-share watchers do not see unrelated traffic.

mod bus;

pub use bus::{UpdateBus, UpdateBusConfig, DEFAULT_GLOBAL_BUFFER_CAPACITY, DEFAULT_SCREEN_BUFFER_CAPACITY};
