//! Agent-based model of phage infecting bacteria that carry
//! restriction-modification systems.
//!
//! [`engine::Engine`] runs the model step by step and collects
//! [`record::StepRecord`]s; [`manager::Manager`] drives runs stored in a
//! simulation directory.

pub mod analysis;
pub mod config;
pub mod encounter;
pub mod engine;
pub mod evolvable;
pub mod manager;
pub mod model;
pub mod record;
pub mod schedule;
pub mod stats;
