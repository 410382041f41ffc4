//! Deterministic document ids
//!
//! The same resource identifier always maps to the same search document,
//! regardless of letter case, so repeated discovery runs update one
//! document instead of creating duplicates.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use md5::{Digest, Md5};
use thiserror::Error;
use uuid::Builder;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentIdError {
    #[error("Cannot derive a document id from an empty identifier")]
    EmptyIdentifier,
}

/// Derive the document id for a resource identifier.
///
/// The identifier is lowercased and hashed into a name-based UUID (v3: MD5
/// of the raw bytes, no namespace, version and variant bits set); the 16
/// raw bytes are encoded as URL-safe base64 without padding, giving a 22
/// character id.
pub fn document_id(identifier: &str) -> Result<String, DocumentIdError> {
    if identifier.is_empty() {
        return Err(DocumentIdError::EmptyIdentifier);
    }

    let lowered = identifier.to_lowercase();
    let hash: [u8; 16] = Md5::digest(lowered.as_bytes()).into();
    let uuid = Builder::from_md5_bytes(hash).into_uuid();

    Ok(URL_SAFE_NO_PAD.encode(uuid.as_bytes()))
}
