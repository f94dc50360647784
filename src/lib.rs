//! SpecForge: spec-driven development orchestrator.
//!
//! The core is a dependency-aware parallel task execution engine: a
//! durable store mirrored to an append-only change log, isolated
//! per-task git workspaces, a staged agent pipeline with bounded retry,
//! and a scheduler that serializes merges back to the mainline.

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
