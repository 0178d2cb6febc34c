#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Turnpike 🛣️
//!
//! Fixed-window rate limiting over a shared counter store.
//!
//! The limiter keeps no local state: every decision reads and writes a
//! counter in an external store, so any number of processes pointed at the
//! same store enforce one shared budget. Windows are calendar-aligned (per
//! second, minute, or hour), and each window's counter expires on its own.
//!
//! ## Features
//!
//! - **Shared budgets** so replicas behind a load balancer agree on the count
//! - **Calendar windows** per second, minute, or hour, with pluggable hashers
//! - **Race-safe admission** via conditional increments, no store-side locks
//! - **Pluggable storage** with in-memory and Redis (`turnpike-redis`) backends
//! - **Tower middleware** that turns rejections into retry-after errors
//!
//! ## Quick Start
//!
//! ```rust
//! use turnpike::{InMemoryCounterStore, PerMinuteHasher, RateLimiter};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Five attempts per client per calendar minute.
//!     let limiter = RateLimiter::new(InMemoryCounterStore::new(), PerMinuteHasher::new(), 5);
//!
//!     if limiter.attempt("203.0.113.7").await.unwrap() {
//!         // handle the request
//!     } else {
//!         // reject; the budget resets when the minute rolls over
//!     }
//! }
//! ```

pub mod addr;
pub mod clock;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod store;
pub mod window;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::LimitError;
pub use limiter::RateLimiter;
pub use middleware::{ThrottleError, ThrottleLayer, ThrottleService};
pub use store::{CounterStore, InMemoryCounterStore};
pub use window::{PerHourHasher, PerMinuteHasher, PerSecondHasher, WindowHasher};
