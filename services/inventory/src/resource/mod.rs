//! Resource model: records, envelopes and document ids

mod document_id;
mod types;

pub use document_id::*;
pub use types::*;
