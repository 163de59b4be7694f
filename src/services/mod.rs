//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.

pub mod analysis;
pub mod attempts;
pub mod escalation;
pub mod generation;
pub mod ocr;
pub mod presence;
pub mod queue;
pub mod relay;
