// Application layer - lifecycle orchestration over the storage layer.
// The service owns the single write path: every loan transition is one
// transaction covering state, custody moves and the emitted event.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
