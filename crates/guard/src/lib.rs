//! Pre-flight risk and validation layer.
//!
//! Inspects a proposed tool call **before** execution so invalid calls
//! never consume a Tool Backend invocation. Checks, in order:
//!
//! 1. Tool is known and arguments are well-formed
//! 2. Required fields are present (per-tool schema)
//! 3. Target-existence plausibility (read/modify) and parent existence
//!    (create), with nearest-target suggestions by string similarity
//! 4. Placeholder / incomplete-content detection on content fields
//! 5. Structural sanity (balanced delimiters) for code-like payloads
//!
//! Any Critical finding makes the call invalid; the findings plus
//! suggestions are folded back to the model as actionable feedback so it
//! can self-correct without wasting a backend call.

pub mod patterns;
pub mod validator;

pub use validator::{Finding, Severity, Validation, Validator};
