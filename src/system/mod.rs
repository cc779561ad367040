//! System integration
//!
//! Host resource sizing for the inference engine.

pub mod resources;

pub use resources::{available_cores, recommended_threads, thread_count};
