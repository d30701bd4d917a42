//! Step sequence of the order conversation.
//!
//! Applicability and completion of every collectible step are described by a
//! single predicate table, evaluated fresh against the current order on every
//! transition. Linear navigation and gap-filling both walk that table.

use crate::domain::catalog::{Language, MAX_TEST_COUNT, PayoutTier, PricingCatalog};
use crate::domain::geo;
use crate::domain::order::{Order, OrderPatch, Slot};
use crate::error::{IntakeError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Geo,
    Method,
    TestCount,
    Payout,
    Comments,
    SiteUrl,
    Login,
    Password,
    Confirm,
    Payment,
    ProofOfPayment,
}

impl Step {
    /// Steps that collect order fields, in asking order.
    pub const COLLECTIBLE: [Step; 8] = [
        Step::Geo,
        Step::Method,
        Step::TestCount,
        Step::Payout,
        Step::Comments,
        Step::SiteUrl,
        Step::Login,
        Step::Password,
    ];

    /// Steps that accept "skip" as an answer.
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Step::Comments | Step::SiteUrl | Step::Login | Step::Password
        )
    }

    pub fn is_collectible(&self) -> bool {
        Self::COLLECTIBLE.contains(self)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Ask every applicable step in order.
    Linear,
    /// Ask only steps the seeded order does not satisfy yet.
    GapFill,
}

struct StepRule {
    step: Step,
    applies: fn(&Order) -> bool,
    satisfied: fn(&Order) -> bool,
}

fn always(_: &Order) -> bool {
    true
}

const RULES: [StepRule; 8] = [
    StepRule {
        step: Step::Geo,
        applies: always,
        satisfied: |o| o.geo.is_some(),
    },
    StepRule {
        step: Step::Method,
        applies: always,
        satisfied: |o| o.payment_method.is_some(),
    },
    StepRule {
        step: Step::TestCount,
        applies: always,
        satisfied: |o| o.test_count.is_some_and(|n| n >= 1),
    },
    StepRule {
        step: Step::Payout,
        applies: always,
        satisfied: |o| o.payout.is_some(),
    },
    StepRule {
        step: Step::Comments,
        applies: always,
        satisfied: |o| o.comments.is_answered(),
    },
    StepRule {
        step: Step::SiteUrl,
        applies: always,
        satisfied: |o| o.site_url.is_answered(),
    },
    StepRule {
        step: Step::Login,
        applies: Order::credentials_apply,
        satisfied: |o| o.login.is_answered(),
    },
    StepRule {
        step: Step::Password,
        applies: Order::credentials_apply,
        satisfied: |o| o.password.is_answered(),
    },
];

fn rule(step: Step) -> Option<&'static StepRule> {
    RULES.iter().find(|r| r.step == step)
}

pub fn applies(step: Step, order: &Order) -> bool {
    rule(step).is_none_or(|r| (r.applies)(order))
}

pub fn is_satisfied(step: Step, order: &Order) -> bool {
    rule(step).is_none_or(|r| (r.satisfied)(order))
}

/// Gap-fill scan: first applicable step whose field is still missing, else `Confirm`.
pub fn first_unsatisfied(order: &Order) -> Step {
    RULES
        .iter()
        .find(|r| (r.applies)(order) && !(r.satisfied)(order))
        .map(|r| r.step)
        .unwrap_or(Step::Confirm)
}

/// Linear "next": the following applicable step, or `Confirm` after the last one.
pub fn next_step(current: Step, order: &Order) -> Step {
    match current {
        Step::Confirm => Step::Payment,
        Step::Payment | Step::ProofOfPayment => Step::ProofOfPayment,
        _ => RULES
            .iter()
            .skip_while(|r| r.step != current)
            .skip(1)
            .find(|r| (r.applies)(order))
            .map(|r| r.step)
            .unwrap_or(Step::Confirm),
    }
}

/// Linear "back": the preceding applicable step. `None` on the first step and
/// once the order has been submitted.
pub fn previous_step(current: Step, order: &Order) -> Option<Step> {
    let upto = match current {
        Step::Confirm => RULES.len(),
        step if step.is_collectible() => RULES.iter().position(|r| r.step == step)?,
        _ => return None,
    };
    RULES[..upto]
        .iter()
        .rev()
        .find(|r| (r.applies)(order))
        .map(|r| r.step)
}

/// An inbound answer for a collectible step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Skip,
}

/// What a step needs to validate answers.
pub struct StepContext<'a> {
    pub geo_whitelist: &'a [String],
    pub catalog: &'a PricingCatalog,
}

const MAX_COMMENT_LEN: usize = 1000;

fn invalid(message: &str) -> IntakeError {
    IntakeError::Validation(message.to_string())
}

fn char_len_between(text: &str, min: usize, max: usize) -> bool {
    let len = text.chars().count();
    (min..=max).contains(&len)
}

fn parse_geo(text: &str, whitelist: &[String]) -> Option<String> {
    whitelist
        .iter()
        .find(|code| {
            code.eq_ignore_ascii_case(text)
                || geo::format_country(code) == text
                || geo::country_name(code).is_some_and(|n| n.eq_ignore_ascii_case(text))
        })
        .cloned()
}

fn parse_payout(text: &str, catalog: &PricingCatalog) -> Option<PayoutTier> {
    PayoutTier::from_key(text).or_else(|| {
        catalog
            .options()
            .iter()
            .find(|o| [Language::En, Language::Ru].iter().any(|l| o.title(*l) == text))
            .map(|o| o.tier)
    })
}

/// Validates an answer for `step` and turns it into the patch to commit.
///
/// `geo` is the region already chosen, which selects the payment-method catalog.
pub fn validate_answer(
    step: Step,
    answer: &Answer,
    geo: Option<&str>,
    ctx: &StepContext<'_>,
) -> Result<OrderPatch> {
    match answer {
        Answer::Skip if step.is_optional() => Ok(skipped(step)),
        Answer::Skip => Err(invalid("This step can't be skipped")),
        Answer::Text(text) => validate_text(step, text, geo, ctx),
    }
}

/// Text validation shared by chat answers and payload seeds.
pub fn validate_text(
    step: Step,
    text: &str,
    geo: Option<&str>,
    ctx: &StepContext<'_>,
) -> Result<OrderPatch> {
    let text = text.trim();
    let mut patch = OrderPatch::default();
    match step {
        Step::Geo => {
            patch.geo = Some(
                parse_geo(text, ctx.geo_whitelist)
                    .ok_or_else(|| invalid("Please choose one of the supported regions"))?,
            );
        }
        Step::Method => {
            let geo = geo.unwrap_or_default();
            let method = if geo::methods_for(geo).is_empty() {
                char_len_between(text, 2, 100).then(|| text.to_string())
            } else {
                geo::match_method(geo, text).map(str::to_string)
            };
            patch.payment_method =
                Some(method.ok_or_else(|| invalid("Unknown payment method for this region"))?);
        }
        Step::TestCount => {
            let count = text
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=MAX_TEST_COUNT).contains(n))
                .ok_or_else(|| invalid("Test count must be a whole number from 1 to 25"))?;
            patch.test_count = Some(count);
        }
        Step::Payout => {
            patch.payout = Some(
                parse_payout(text, ctx.catalog)
                    .ok_or_else(|| invalid("Please choose one of the payout options"))?,
            );
        }
        Step::Comments => {
            if text.chars().count() > MAX_COMMENT_LEN {
                return Err(invalid("Comments should not exceed 1000 characters"));
            }
            patch.comments = Slot::from_text(text);
        }
        Step::SiteUrl => {
            if !(text.starts_with("http://") || text.starts_with("https://")) {
                return Err(invalid("Site URL must start with http:// or https://"));
            }
            patch.site_url = Slot::Set(text.to_string());
        }
        Step::Login => {
            if !char_len_between(text, 2, 120) {
                return Err(invalid("Login should be 2-120 characters long"));
            }
            patch.login = Slot::Set(text.to_string());
        }
        Step::Password => {
            if !char_len_between(text, 2, 120) {
                return Err(invalid("Password should be 2-120 characters long"));
            }
            patch.password = Slot::Set(text.to_string());
        }
        Step::Confirm | Step::Payment | Step::ProofOfPayment => {
            return Err(invalid("Step does not collect order fields"));
        }
    }
    Ok(patch)
}

fn skipped(step: Step) -> OrderPatch {
    let mut patch = OrderPatch::default();
    match step {
        Step::Comments => patch.comments = Slot::Skipped,
        Step::SiteUrl => patch.site_url = Slot::Skipped,
        Step::Login => patch.login = Slot::Skipped,
        Step::Password => patch.password = Slot::Skipped,
        _ => {}
    }
    patch
}
