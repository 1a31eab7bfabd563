//! valet: an agent-delegation runtime for calendar assistants.
//!
//! The crate wires four layers together: a provider adapter that speaks
//! OpenAI, Anthropic, and Google behind one trait; a profile catalog
//! resolving personas to concrete models; a tool dispatch table with
//! concurrent fan-out; and a bounded delegation graph driven by a
//! streaming turn runner with persistent sessions.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use valet::config::ValetConfig;
//! use valet::runner::{Runtime, StreamEvent, TurnRequest};
//! use valet::session::MemoryBackend;
//! use valet::tools::Services;
//!
//! # async fn demo() -> valet::error::Result<()> {
//! let runtime = Runtime::new(ValetConfig::from_env(), Services::in_memory())?
//!     .with_session_backend(Arc::new(MemoryBackend::new()));
//!
//! let mut turn = runtime.run_agent_turn(
//!     TurnRequest::builder()
//!         .profile_id("ally-pro")
//!         .user_id("user-1")
//!         .text("Schedule lunch with Sam tomorrow at noon")
//!         .build(),
//! );
//!
//! while let Some(event) = turn.next_event().await {
//!     if let StreamEvent::TextDelta { content } = event {
//!         print!("{content}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod profile;
pub mod provider;
pub mod runner;
pub mod session;
pub mod tools;
pub mod types;

pub use config::ValetConfig;
pub use error::{Result, ValetError};
pub use runner::{Runtime, StreamEvent, TurnOutcome, TurnRequest};
