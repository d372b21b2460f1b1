//! Splatstream daemon library
//!
//! This module re-exports the daemon's modules for integration testing.

pub mod config;
pub mod pose;
pub mod render_loop;
pub mod renderer;
pub mod version;
