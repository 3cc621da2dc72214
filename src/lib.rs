//! Deterministic agentic execution core: event log & bus, mode/stage/
//! autonomy control, the agentic tool-use loop, and the checkpoint &
//! edit pipeline, as a host-independent library.
//!
//! Split into a library and a thin binary: this crate holds the logic,
//! `main.rs` is wiring.

pub mod agentic_loop;
pub mod autonomy;
pub mod checkpoint;
pub mod command_phase;
pub mod command_policy;
pub mod config;
pub mod conversation;
pub mod diff;
pub mod error;
pub mod event;
pub mod evidence;
pub mod external;
pub mod ids;
pub mod llm_edit;
pub mod mode;
pub mod scaffold;
pub mod streaming;
pub mod truncation;

pub use error::{CoreError, CoreResult};
