//! Utility modules for common functionality

pub mod cancel;
pub mod lock;

pub use cancel::CancelToken;
pub use lock::setup_signal_handlers;

// vim: ts=4
