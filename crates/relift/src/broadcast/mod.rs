//! Broadcasting module for real-time progress streaming.
//!
//! Events are transient: a publish with no subscriber is dropped, and a
//! reconnecting observer must fall back to reading the job state store.

pub mod progress;

pub use progress::{JobSubscription, ProgressBroadcaster, ProgressEvent};
