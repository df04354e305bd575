//! HTTP request handlers.

pub mod health;
pub mod hello;
pub mod metrics;

pub use self::health::{health_check, readiness};
pub use self::hello::{hello, HELLO_ADDRESS};
pub use self::metrics::metrics;
