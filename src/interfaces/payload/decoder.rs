use super::signature::{sha256_hex, split_signed, verify};
use crate::domain::catalog::{MAX_TEST_COUNT, PayoutTier};
use crate::error::IntakeError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const REFERENCE_PREFIX: &str = "calc_ref_";
pub const ENVELOPE_PREFIX: &str = "o1_";
pub const COMPACT_V1_PREFIX: &str = "calc_v1_";
pub const COMPACT_LEGACY_PREFIX: &str = "calc_geo";
pub const PACKAGE_PREFIX: &str = "pkg_";

/// Optional `calc_v1` sub-fields, in the only order the grammar accepts them.
pub(crate) const V1_TEXT_FIELDS: [&str; 5] = ["method", "site", "login", "password", "comments"];

/// Which grammar produced a [`DecodedFields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Grammar {
    Envelope,
    CompactV1,
    CompactLegacy,
    Package,
}

/// Every field a configurator payload can prefill. Absent or invalid fields are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedFields {
    pub grammar: Grammar,
    pub geo: Option<String>,
    pub test_count: Option<u32>,
    pub payout: Option<PayoutTier>,
    pub custom_test_required: Option<bool>,
    pub payment_method: Option<String>,
    pub site_url: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub comments: Option<String>,
    pub package_type: Option<String>,
    /// Price the configurator showed. Informational only.
    pub price_hint: Option<u64>,
    /// Content hash used for order-level deduplication.
    pub fingerprint: Option<String>,
}

impl DecodedFields {
    pub fn empty(grammar: Grammar) -> Self {
        Self {
            grammar,
            geo: None,
            test_count: None,
            payout: None,
            custom_test_required: None,
            payment_method: None,
            site_url: None,
            login: None,
            password: None,
            comments: None,
            package_type: None,
            price_hint: None,
            fingerprint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unsupported payload format")]
    Unsupported,
    #[error("payload signature is invalid")]
    SignatureInvalid,
    #[error("payload reference {0} must be looked up")]
    NeedsLookup(String),
}

impl From<DecodeFailure> for IntakeError {
    fn from(failure: DecodeFailure) -> Self {
        match failure {
            DecodeFailure::SignatureInvalid => IntakeError::SignatureInvalid,
            DecodeFailure::NeedsLookup(token) => {
                IntakeError::MalformedPayload(format!("unresolved payload reference {}", token))
            }
            other => IntakeError::MalformedPayload(other.to_string()),
        }
    }
}

type Decoded = std::result::Result<DecodedFields, DecodeFailure>;

/// Decodes a configurator payload.
///
/// Grammars are tried in priority order: reference, envelope, `calc_v1`, legacy
/// `calc_`, package. A signature is checked before any grammar is matched, so a
/// corrupted signed prefix always surfaces as [`DecodeFailure::SignatureInvalid`].
/// Without a secret, signatures are stripped and not verified.
pub fn decode(raw: &str, secret: Option<&[u8]>) -> Decoded {
    let raw = raw.trim();

    if let Some(token) = raw.strip_prefix(REFERENCE_PREFIX) {
        return decode_reference(token);
    }
    if let Some(data) = raw.strip_prefix(ENVELOPE_PREFIX) {
        return decode_envelope(data);
    }

    let unsigned = match split_signed(raw) {
        Some((prefix, signature)) => {
            if let Some(secret) = secret
                && !verify(prefix, signature, secret)
            {
                return Err(DecodeFailure::SignatureInvalid);
            }
            prefix
        }
        None => raw,
    };

    if let Some(body) = unsigned.strip_prefix(COMPACT_V1_PREFIX) {
        return decode_compact_v1(body).map(|fields| with_fingerprint(fields, unsigned));
    }
    if let Some(body) = unsigned.strip_prefix(COMPACT_LEGACY_PREFIX) {
        return decode_compact_legacy(body).map(|fields| with_fingerprint(fields, unsigned));
    }
    if let Some(body) = unsigned.strip_prefix(PACKAGE_PREFIX) {
        return decode_package(body);
    }
    Err(DecodeFailure::Unsupported)
}

fn with_fingerprint(mut fields: DecodedFields, unsigned: &str) -> DecodedFields {
    fields.fingerprint = Some(sha256_hex(unsigned));
    fields
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// True for tokens a `calc_ref_` payload can carry: `[A-Za-z0-9_-]+`.
pub fn is_reference_token(token: &str) -> bool {
    !token.is_empty() && token.chars().all(is_token_char)
}

fn decode_reference(token: &str) -> Decoded {
    if !is_reference_token(token) {
        return Err(DecodeFailure::Malformed("invalid reference token".into()));
    }
    Err(DecodeFailure::NeedsLookup(token.to_string()))
}

fn geo_code(raw: &str) -> Option<String> {
    (raw.len() == 2 && raw.chars().all(|c| c.is_ascii_alphabetic())).then(|| raw.to_ascii_uppercase())
}

fn test_count(value: u64) -> Option<u32> {
    u32::try_from(value)
        .ok()
        .filter(|n| (1..=MAX_TEST_COUNT).contains(n))
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn base64_text(raw: &str) -> std::result::Result<String, DecodeFailure> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw.trim_end_matches('=').as_bytes())
        .map_err(|e| DecodeFailure::Malformed(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes).map_err(|_| DecodeFailure::Malformed("invalid utf-8".into()))
}

fn decode_envelope(data: &str) -> Decoded {
    if data.is_empty() || !data.chars().all(is_token_char) {
        return Err(DecodeFailure::Malformed("invalid envelope encoding".into()));
    }
    let raw_json = base64_text(data)?;
    let parsed: Value = serde_json::from_str(&raw_json)
        .map_err(|e| DecodeFailure::Malformed(format!("invalid envelope json: {}", e)))?;
    let Value::Object(map) = parsed else {
        return Err(DecodeFailure::Malformed("envelope is not an object".into()));
    };

    let text = |key: &str| map.get(key).and_then(Value::as_str).and_then(non_empty);
    let flag = |key: &str| map.get(key).and_then(Value::as_bool);

    let mut fields = DecodedFields::empty(Grammar::Envelope);
    fields.geo = map.get("geo").and_then(Value::as_str).and_then(geo_code);
    fields.test_count = map.get("tests").and_then(Value::as_u64).and_then(test_count);
    fields.payment_method = text("method");
    fields.payout = text("payout")
        .and_then(|key| PayoutTier::from_key(&key))
        .or_else(|| match (flag("withdraw"), flag("kyc")) {
            (None, None) => None,
            (withdraw, kyc) => Some(PayoutTier::from_flags(
                withdraw.unwrap_or(false),
                kyc.unwrap_or(false),
            )),
        });
    fields.price_hint = map.get("price").and_then(Value::as_u64);
    fields.comments = text("comments");
    fields.site_url = text("site");
    fields.login = text("login");
    fields.password = text("password");
    fields.fingerprint = Some(sha256_hex(&raw_json));
    Ok(fields)
}

/// Cursor over the compact grammars.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn eat(&mut self, literal: &str) -> bool {
        match self.rest.strip_prefix(literal) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, literal: &str) -> std::result::Result<(), DecodeFailure> {
        if self.eat(literal) {
            Ok(())
        } else {
            Err(DecodeFailure::Malformed(format!("expected `{}`", literal)))
        }
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let end = self
            .rest
            .find(|c: char| !predicate(c))
            .unwrap_or(self.rest.len());
        let (taken, rest) = self.rest.split_at(end);
        self.rest = rest;
        taken
    }

    fn geo(&mut self) -> std::result::Result<String, DecodeFailure> {
        let letters = self.take_while(|c| c.is_ascii_alphabetic());
        geo_code(letters).ok_or_else(|| DecodeFailure::Malformed("geo must be two letters".into()))
    }

    /// Digits as written; an unparsable or out-of-range count is dropped by the caller.
    fn digits(&mut self) -> std::result::Result<&'a str, DecodeFailure> {
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Err(DecodeFailure::Malformed("expected digits".into()));
        }
        Ok(digits)
    }

    /// `<...>` group; the value itself may not contain `>`.
    fn bracketed(&mut self) -> std::result::Result<&'a str, DecodeFailure> {
        self.expect("<")?;
        let value = self.take_while(|c| c != '>');
        self.expect(">")?;
        Ok(value)
    }

    fn finish(&self) -> std::result::Result<(), DecodeFailure> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(DecodeFailure::Malformed(format!(
                "unexpected trailing text `{}`",
                self.rest
            )))
        }
    }
}

fn decode_compact_v1(body: &str) -> Decoded {
    let mut scanner = Scanner { rest: body };
    let mut fields = DecodedFields::empty(Grammar::CompactV1);

    scanner.expect("geo")?;
    fields.geo = Some(scanner.geo()?);
    scanner.expect("_tests")?;
    fields.test_count = scanner.digits()?.parse().ok().and_then(test_count);
    scanner.expect("_payout")?;
    let code = scanner.take_while(|c| c.is_ascii_alphabetic());
    let mut chars = code.chars();
    fields.payout = match (chars.next(), chars.next()) {
        (Some(c), None) => PayoutTier::from_code(c),
        _ => None,
    };
    if fields.payout.is_none() {
        return Err(DecodeFailure::Malformed("payout code must be N, W or K".into()));
    }

    for name in V1_TEXT_FIELDS {
        if !scanner.eat(&format!("_{}", name)) {
            continue;
        }
        let value = non_empty(&base64_text(scanner.bracketed()?)?);
        match name {
            "method" => fields.payment_method = value,
            "site" => fields.site_url = value,
            "login" => fields.login = value,
            "password" => fields.password = value,
            _ => fields.comments = value,
        }
    }
    if scanner.eat("_price") {
        fields.price_hint = scanner.digits()?.parse().ok();
    }
    scanner.finish()?;
    Ok(fields)
}

fn decode_compact_legacy(body: &str) -> Decoded {
    let mut scanner = Scanner { rest: body };
    let mut fields = DecodedFields::empty(Grammar::CompactLegacy);

    fields.geo = Some(scanner.geo()?);
    scanner.expect("_tests")?;
    fields.test_count = scanner.digits()?.parse().ok().and_then(test_count);
    scanner.expect("_opt")?;
    let options = scanner.bracketed()?;
    scanner.finish()?;

    let has = |c: char| options.chars().any(|o| o.eq_ignore_ascii_case(&c));
    fields.payout = Some(PayoutTier::from_flags(has('w'), has('k')));
    fields.custom_test_required = Some(has('c'));
    Ok(fields)
}

fn decode_package(body: &str) -> Decoded {
    let (package, geo) = body
        .split_once("_geo_")
        .ok_or_else(|| DecodeFailure::Malformed("expected `_geo_`".into()))?;
    if package.is_empty()
        || !package
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(DecodeFailure::Malformed("invalid package type".into()));
    }
    let mut fields = DecodedFields::empty(Grammar::Package);
    fields.geo = Some(geo_code(geo).ok_or_else(|| DecodeFailure::Malformed("geo must be two letters".into()))?);
    fields.package_type = Some(package.to_string());
    Ok(fields)
}
