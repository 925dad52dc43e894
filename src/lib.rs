//! WIR POC umbrella crate.
//!
//! Re-exports the domain types and the workflow engine; the end-to-end
//! scenario suite lives under `tests/`.

pub use wir_poc_types as types;
pub use wir_workflow as workflow;
