//! Runtime configuration loaded from the environment (and `.env` when present).

use crate::application::engine::EngineSettings;
use crate::domain::catalog::{Language, Money, PayoutTier, PricingCatalog};
use crate::domain::geo::normalize_geo;
use crate::domain::ports::CredentialCipherBox;
use crate::error::{IntakeError, Result};
use crate::infrastructure::cipher::{ChaChaCipher, PassthroughCipher};
use crate::interfaces::http::ApiSettings;
use rust_decimal::Decimal;
use std::str::FromStr;

const DEFAULT_KEY_ID: &str = "k1";

#[derive(Debug, Clone)]
pub struct Config {
    pub payload_secret: Option<String>,
    pub encryption_key: Option<String>,
    pub encryption_key_id: String,
    pub base_price_per_test: Money,
    pub payout_surcharges: Vec<(PayoutTier, Money)>,
    pub geo_whitelist: Vec<String>,
    pub payload_retention_hours: i64,
    pub admin_ids: Vec<i64>,
    pub wallet_trc20: Option<String>,
    pub help_contact: String,
    pub default_language: Language,
    pub api_host: String,
    pub api_port: u16,
    pub api_token: Option<String>,
}

impl Config {
    /// Reads the process environment after loading `.env`, if any.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = EngineSettings::default();

        let base_price_per_test = match get("BASE_PRICE_PER_TEST") {
            Some(raw) => parse_money("BASE_PRICE_PER_TEST", &raw)?,
            None => PricingCatalog::default().base_price_per_test(),
        };
        let payout_surcharges = match get("PAYOUT_SURCHARGES") {
            Some(raw) => parse_surcharges(&raw)?,
            None => PricingCatalog::default()
                .options()
                .iter()
                .map(|o| (o.tier, o.surcharge))
                .collect(),
        };
        let geo_whitelist = match get("BOT_GEO_WHITELIST") {
            Some(raw) => parse_geo_list(&raw)?,
            None => defaults.geo_whitelist,
        };
        let admin_ids = match get("ADMIN_IDS") {
            Some(raw) => parse_list("ADMIN_IDS", &raw)?,
            None => Vec::new(),
        };
        let default_language = match get("BOT_DEFAULT_LANG") {
            Some(raw) => Language::parse(&raw).ok_or_else(|| {
                IntakeError::Config(format!("BOT_DEFAULT_LANG must be en or ru, got {}", raw))
            })?,
            None => defaults.default_language,
        };

        Ok(Self {
            payload_secret: get("PAYLOAD_HMAC_SECRET"),
            encryption_key: get("ENCRYPTION_KEY"),
            encryption_key_id: get("ENCRYPTION_KEY_ID").unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
            base_price_per_test,
            payout_surcharges,
            geo_whitelist,
            payload_retention_hours: parse_or("PAYLOAD_RETENTION_HOURS", get("PAYLOAD_RETENTION_HOURS"), 72)?,
            admin_ids,
            wallet_trc20: get("P2P_WALLET_TRC20"),
            help_contact: get("P2P_HELP_CONTACT").unwrap_or(defaults.help_contact),
            default_language,
            api_host: get("API_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            api_port: parse_or("API_PORT", get("API_PORT"), 8080)?,
            api_token: get("API_TOKEN"),
        })
    }

    pub fn catalog(&self) -> PricingCatalog {
        PricingCatalog::new(self.base_price_per_test, self.payout_surcharges.iter().copied())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            catalog: self.catalog(),
            geo_whitelist: self.geo_whitelist.clone(),
            signing_secret: self.payload_secret.as_ref().map(|s| s.as_bytes().to_vec()),
            operator_ids: self.admin_ids.clone(),
            wallet: self.wallet_trc20.clone(),
            help_contact: self.help_contact.clone(),
            default_language: self.default_language,
            ..EngineSettings::default()
        }
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            intake: self.engine_settings(),
            api_token: self.api_token.clone(),
            payload_retention: chrono::Duration::hours(self.payload_retention_hours),
        }
    }

    /// ChaCha20-Poly1305 when `ENCRYPTION_KEY` is set, pass-through otherwise.
    pub fn cipher(&self) -> Result<CredentialCipherBox> {
        match &self.encryption_key {
            Some(key) => Ok(Box::new(ChaChaCipher::from_base64(
                self.encryption_key_id.clone(),
                key,
            )?)),
            None => Ok(Box::new(PassthroughCipher)),
        }
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|_| IntakeError::Config(format!("{} has an invalid value: {}", name, raw))),
        None => Ok(default),
    }
}

fn parse_list<T: FromStr>(name: &str, raw: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse()
                .map_err(|_| IntakeError::Config(format!("{} has an invalid entry: {}", name, item)))
        })
        .collect()
}

fn parse_money(name: &str, raw: &str) -> Result<Money> {
    let amount = Decimal::from_str(raw)
        .map_err(|_| IntakeError::Config(format!("{} must be a number, got {}", name, raw)))?;
    if amount.is_sign_negative() {
        return Err(IntakeError::Config(format!("{} must not be negative", name)));
    }
    Ok(Money::new(amount))
}

fn parse_geo_list(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            normalize_geo(code).ok_or_else(|| {
                IntakeError::Config(format!("BOT_GEO_WHITELIST has an invalid code: {}", code))
            })
        })
        .collect()
}

/// `none=0,withdraw=10,kyc=25`
fn parse_surcharges(raw: &str) -> Result<Vec<(PayoutTier, Money)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (key, amount) = entry.split_once('=').ok_or_else(|| {
                IntakeError::Config(format!("PAYOUT_SURCHARGES entry must be key=amount: {}", entry))
            })?;
            let tier = PayoutTier::from_key(key).ok_or_else(|| {
                IntakeError::Config(format!("PAYOUT_SURCHARGES has an unknown option: {}", key))
            })?;
            Ok((tier, parse_money("PAYOUT_SURCHARGES", amount.trim())?))
        })
        .collect()
}
