//! Built-in search plugins.
//!
//! Each plugin is an opaque capability provider behind the engine's
//! `SearchBackend` trait; the orchestrator never looks inside.

pub mod discourse;

pub use discourse::DiscourseBackend;
