use super::decoder::{COMPACT_V1_PREFIX, ENVELOPE_PREFIX, V1_TEXT_FIELDS};
use super::signature::{SIGN_MARKER, sign};
use crate::domain::catalog::{MAX_TEST_COUNT, PayoutTier};
use crate::error::{IntakeError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Everything the `calc_v1` grammar carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactFields {
    pub geo: String,
    pub test_count: u32,
    pub payout: PayoutTier,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub price: Option<u64>,
}

/// JSON body of an `o1_` envelope. Keys match what configurators emit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tests: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdraw: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Builds a canonical `calc_v1` payload, signed when a secret is given.
///
/// Empty text fields are left out, since the decoder treats them as absent.
pub fn encode_v1(fields: &CompactFields, secret: Option<&[u8]>) -> Result<String> {
    let geo = fields.geo.trim();
    if geo.len() != 2 || !geo.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(IntakeError::Validation(format!(
            "geo must be two letters, got `{}`",
            fields.geo
        )));
    }
    if !(1..=MAX_TEST_COUNT).contains(&fields.test_count) {
        return Err(IntakeError::Validation(format!(
            "Test count must be between 1 and {}",
            MAX_TEST_COUNT
        )));
    }

    let mut out = format!(
        "{}geo{}_tests{}_payout{}",
        COMPACT_V1_PREFIX,
        geo.to_ascii_uppercase(),
        fields.test_count,
        fields.payout.code()
    );
    let texts = [
        &fields.payment_method,
        &fields.site_url,
        &fields.login,
        &fields.password,
        &fields.comments,
    ];
    for (name, value) in V1_TEXT_FIELDS.iter().zip(texts) {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            out.push_str(&format!("_{}<{}>", name, URL_SAFE_NO_PAD.encode(value)));
        }
    }
    if let Some(price) = fields.price {
        out.push_str(&format!("_price{}", price));
    }
    if let Some(secret) = secret {
        let signature = sign(&out, secret);
        out.push_str(&format!("{}{}>", SIGN_MARKER, signature));
    }
    Ok(out)
}

/// Builds an `o1_` envelope from its JSON body.
pub fn encode_envelope(body: &EnvelopeBody) -> Result<String> {
    let json = serde_json::to_string(body)?;
    Ok(format!("{}{}", ENVELOPE_PREFIX, URL_SAFE_NO_PAD.encode(json)))
}
