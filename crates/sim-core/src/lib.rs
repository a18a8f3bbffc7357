//! Simulation kernel for an LLM-driven life sim.
//!
//! The kernel is pure and synchronous: it owns the world entity tree, the
//! command grammar agents reply in, the action resolver, the discrete-event
//! scheduler, and the turn orchestrator. All I/O (model calls, persistence,
//! HTTP) lives in the crates layered on top; the model boundary here is the
//! narrow [`turn::ModelClient`] trait.

pub mod actions;
pub mod attrs;
pub mod error;
pub mod game;
pub mod grammar;
pub mod logbook;
pub mod person;
pub mod scheduler;
pub mod turn;
pub mod world;
