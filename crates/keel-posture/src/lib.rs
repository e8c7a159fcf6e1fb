//! keel-posture — deterministic capital analysis engines.
//!
//! Pure functions over validated inputs: capital posture and risk bands,
//! multi-entity consolidation, spend simulation, and debt ranking. No
//! store access; the tool handlers supply inputs and stamp the output
//! hash over the returned fields.

pub mod consolidation;
pub mod debt;
pub mod posture;
pub mod simulation;
