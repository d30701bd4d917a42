//! Configurator payload protocol: the text forms a web configurator hands to the
//! chat workflow through a start parameter.

pub mod decoder;
pub mod encoder;
pub mod signature;

pub use decoder::{DecodeFailure, DecodedFields, Grammar, decode, is_reference_token};
pub use encoder::{CompactFields, EnvelopeBody, encode_envelope, encode_v1};

use crate::domain::order::IdentityKey;
use crate::domain::ports::PayloadReferenceStore;
use crate::error::{IntakeError, Result};
use tracing::debug;

/// Decodes `raw`, following a single `calc_ref_` indirection through `references`.
///
/// An unknown token is `ReferenceNotFound`; a reference that points at another
/// reference is malformed.
pub async fn decode_resolving(
    raw: &str,
    secret: Option<&[u8]>,
    references: &dyn PayloadReferenceStore,
) -> Result<DecodedFields> {
    match decode(raw, secret) {
        Ok(fields) => Ok(fields),
        Err(DecodeFailure::NeedsLookup(token)) => {
            let reference = references
                .get(&token)
                .await?
                .ok_or_else(|| IntakeError::ReferenceNotFound(token.clone()))?;
            debug!(token = %token, "resolved payload reference");
            match decode(&reference.payload, secret) {
                Ok(fields) => Ok(fields),
                Err(DecodeFailure::NeedsLookup(_)) => Err(IntakeError::MalformedPayload(
                    "payload reference points at another reference".into(),
                )),
                Err(failure) => Err(failure.into()),
            }
        }
        Err(failure) => Err(failure.into()),
    }
}

/// Dedup hash binding a payload fingerprint to the requester.
pub fn build_payload_hash(fingerprint: &str, key: &IdentityKey) -> String {
    let owner = match key {
        IdentityKey::Chat(id) => id.to_string(),
        IdentityKey::Email(email) => email.clone(),
    };
    signature::sha256_hex(&format!("{}:{}", fingerprint, owner))
}
