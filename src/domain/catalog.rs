use crate::error::{IntakeError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul};

/// Upper bound for the number of test runs in a single order.
pub const MAX_TEST_COUNT: u32 = 25;

/// A EUR amount.
///
/// Wraps `rust_decimal::Decimal` so prices, surcharges and totals can't be mixed up
/// with plain counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn from_eur(amount: i64) -> Self {
        Self(Decimal::from(amount))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Mul<u32> for Money {
    type Output = Self;
    fn mul(self, rhs: u32) -> Self::Output {
        Self(self.0 * Decimal::from(rhs))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "€{}", self.0.normalize())
    }
}

/// Payout verification tier requested for the test runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutTier {
    None,
    Withdraw,
    Kyc,
}

impl PayoutTier {
    pub const ALL: [PayoutTier; 3] = [PayoutTier::None, PayoutTier::Withdraw, PayoutTier::Kyc];

    pub fn key(&self) -> &'static str {
        match self {
            PayoutTier::None => "none",
            PayoutTier::Withdraw => "withdraw",
            PayoutTier::Kyc => "kyc",
        }
    }

    /// Single-letter code used by the `calc_v1` payload grammar.
    pub fn code(&self) -> char {
        match self {
            PayoutTier::None => 'N',
            PayoutTier::Withdraw => 'W',
            PayoutTier::Kyc => 'K',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'N' => Some(PayoutTier::None),
            'W' => Some(PayoutTier::Withdraw),
            'K' => Some(PayoutTier::Kyc),
            _ => None,
        }
    }

    /// Accepts catalog keys (`withdraw`), dotted option keys (`payout.option.withdraw`)
    /// and single-letter codes (`W`).
    pub fn from_key(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let key = raw.strip_prefix("payout.option.").unwrap_or(raw);
        match key.to_ascii_lowercase().as_str() {
            "none" => Some(PayoutTier::None),
            "withdraw" | "payout_check" => Some(PayoutTier::Withdraw),
            "kyc" | "full_kyc" => Some(PayoutTier::Kyc),
            _ => {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Self::from_code(c),
                    _ => None,
                }
            }
        }
    }

    /// Derives the tier from the individual flags carried by older payloads.
    pub fn from_flags(withdraw_required: bool, kyc_required: bool) -> Self {
        if kyc_required {
            PayoutTier::Kyc
        } else if withdraw_required {
            PayoutTier::Withdraw
        } else {
            PayoutTier::None
        }
    }

    pub fn withdraw_required(&self) -> bool {
        matches!(self, PayoutTier::Withdraw | PayoutTier::Kyc)
    }

    pub fn kyc_required(&self) -> bool {
        matches!(self, PayoutTier::Kyc)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ru,
}

impl Language {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Language::En),
            "ru" => Some(Language::Ru),
            _ => None,
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Language::En => Language::Ru,
            Language::Ru => Language::En,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }
}

/// Static catalog entry for a payout tier.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutOption {
    pub tier: PayoutTier,
    pub surcharge: Money,
    title_en: &'static str,
    title_ru: &'static str,
    description_en: &'static str,
    description_ru: &'static str,
}

impl PayoutOption {
    pub fn key(&self) -> &'static str {
        self.tier.key()
    }

    pub fn withdraw_required(&self) -> bool {
        self.tier.withdraw_required()
    }

    pub fn kyc_required(&self) -> bool {
        self.tier.kyc_required()
    }

    pub fn title(&self, language: Language) -> String {
        let title = match language {
            Language::En => self.title_en,
            Language::Ru => self.title_ru,
        };
        format!("{} (+{})", title, self.surcharge)
    }

    pub fn description(&self, language: Language) -> &'static str {
        match language {
            Language::En => self.description_en,
            Language::Ru => self.description_ru,
        }
    }
}

/// Result of pricing an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub base_total: Money,
    pub surcharge: Money,
    pub total: Money,
}

/// Payout options and the per-test base price, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PricingCatalog {
    base_price_per_test: Money,
    options: Vec<PayoutOption>,
}

impl Default for PricingCatalog {
    fn default() -> Self {
        Self::new(
            Money::from_eur(85),
            [
                (PayoutTier::None, Money::ZERO),
                (PayoutTier::Withdraw, Money::from_eur(10)),
                (PayoutTier::Kyc, Money::from_eur(25)),
            ],
        )
    }
}

impl PricingCatalog {
    pub fn new(
        base_price_per_test: Money,
        surcharges: impl IntoIterator<Item = (PayoutTier, Money)>,
    ) -> Self {
        let surcharges: Vec<(PayoutTier, Money)> = surcharges.into_iter().collect();
        let surcharge_for = |tier: PayoutTier| {
            surcharges
                .iter()
                .rev()
                .find(|(t, _)| *t == tier)
                .map(|(_, m)| *m)
                .unwrap_or(Money::ZERO)
        };
        let options = vec![
            PayoutOption {
                tier: PayoutTier::None,
                surcharge: surcharge_for(PayoutTier::None),
                title_en: "No payout needed",
                title_ru: "Без вывода средств",
                description_en: "",
                description_ru: "",
            },
            PayoutOption {
                tier: PayoutTier::Withdraw,
                surcharge: surcharge_for(PayoutTier::Withdraw),
                title_en: "Need payout verification",
                title_ru: "Нужно подтвердить вывод",
                description_en: "Requires account with withdrawal capability.",
                description_ru: "Требуется аккаунт с возможностью вывода средств.",
            },
            PayoutOption {
                tier: PayoutTier::Kyc,
                surcharge: surcharge_for(PayoutTier::Kyc),
                title_en: "Need full KYC verification",
                title_ru: "Нужна полная верификация KYC",
                description_en: "Requires tester’s personal data for KYC.",
                description_ru: "Требуются персональные данные тестера для KYC.",
            },
        ];
        Self {
            base_price_per_test,
            options,
        }
    }

    pub fn base_price_per_test(&self) -> Money {
        self.base_price_per_test
    }

    pub fn options(&self) -> &[PayoutOption] {
        &self.options
    }

    pub fn option(&self, tier: PayoutTier) -> &PayoutOption {
        // Every tier is present: `new` builds one entry per variant.
        self.options
            .iter()
            .find(|o| o.tier == tier)
            .unwrap_or(&self.options[0])
    }

    /// `base_total = test_count × base_price_per_test`, `total = base_total + surcharge`.
    pub fn price(&self, test_count: u32, surcharge: Money) -> Result<PriceBreakdown> {
        if test_count < 1 {
            return Err(IntakeError::Validation(
                "Test count must be at least 1".to_string(),
            ));
        }
        if surcharge.is_negative() {
            return Err(IntakeError::Validation(
                "Surcharge must not be negative".to_string(),
            ));
        }
        let base_total = self.base_price_per_test * test_count;
        Ok(PriceBreakdown {
            base_total,
            surcharge,
            total: base_total + surcharge,
        })
    }

    pub fn quote(&self, test_count: u32, tier: PayoutTier) -> Result<PriceBreakdown> {
        self.price(test_count, self.option(tier).surcharge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_example_withdraw() {
        let catalog = PricingCatalog::default();
        let price = catalog.quote(3, PayoutTier::Withdraw).unwrap();
        assert_eq!(price.base_total, Money::new(dec!(255)));
        assert_eq!(price.surcharge, Money::new(dec!(10)));
        assert_eq!(price.total, Money::new(dec!(265)));
    }

    #[test]
    fn test_single_test_without_surcharge_is_base_price() {
        let catalog = PricingCatalog::default();
        let price = catalog.price(1, Money::ZERO).unwrap();
        assert_eq!(price.total, catalog.base_price_per_test());
    }

    #[test]
    fn test_price_rejects_invalid_input() {
        let catalog = PricingCatalog::default();
        assert!(matches!(
            catalog.price(0, Money::ZERO),
            Err(IntakeError::Validation(_))
        ));
        assert!(matches!(
            catalog.price(1, Money::new(dec!(-1))),
            Err(IntakeError::Validation(_))
        ));
    }

    #[test]
    fn test_price_is_monotonic() {
        let catalog = PricingCatalog::default();
        let mut previous = Money::ZERO;
        for n in 1..=MAX_TEST_COUNT {
            for s in [0, 10, 25, 40] {
                let lower = catalog.price(n, Money::from_eur(s)).unwrap().total;
                let higher_n = catalog.price(n + 1, Money::from_eur(s)).unwrap().total;
                let higher_s = catalog.price(n, Money::from_eur(s + 1)).unwrap().total;
                assert!(higher_n >= lower);
                assert!(higher_s >= lower);
            }
            let current = catalog.price(n, Money::ZERO).unwrap().total;
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_payout_tier_parsing() {
        assert_eq!(PayoutTier::from_key("W"), Some(PayoutTier::Withdraw));
        assert_eq!(PayoutTier::from_key("payout.option.kyc"), Some(PayoutTier::Kyc));
        assert_eq!(PayoutTier::from_key("none"), Some(PayoutTier::None));
        assert_eq!(PayoutTier::from_key("gold"), None);
        assert_eq!(PayoutTier::from_flags(true, true), PayoutTier::Kyc);
        assert!(PayoutTier::Kyc.withdraw_required());
        assert!(!PayoutTier::Withdraw.kyc_required());
    }

    #[test]
    fn test_custom_surcharges() {
        let catalog = PricingCatalog::new(
            Money::from_eur(100),
            [(PayoutTier::Kyc, Money::from_eur(50))],
        );
        assert_eq!(catalog.option(PayoutTier::Withdraw).surcharge, Money::ZERO);
        let price = catalog.quote(2, PayoutTier::Kyc).unwrap();
        assert_eq!(price.total, Money::from_eur(250));
        assert_eq!(
            catalog.option(PayoutTier::Kyc).title(Language::En),
            "Need full KYC verification (+€50)"
        );
        assert!(catalog.option(PayoutTier::Kyc).description(Language::Ru).contains("KYC"));
    }
}
