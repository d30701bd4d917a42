use crate::domain::catalog::{MAX_TEST_COUNT, Money, PayoutTier};
use crate::error::{IntakeError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type OrderId = u64;

/// Prefix of the start parameter that reattaches a session to an order.
pub const RESUME_PREFIX: &str = "ord_";
const RESUME_TOKEN_LEN: usize = 16;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    InProgress,
    AwaitingPayment,
    ProofReceived,
    Paid,
    Testing,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Draft,
        OrderStatus::InProgress,
        OrderStatus::AwaitingPayment,
        OrderStatus::ProofReceived,
        OrderStatus::Paid,
        OrderStatus::Testing,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::ProofReceived => "proof_received",
            OrderStatus::Paid => "paid",
            OrderStatus::Testing => "testing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == raw.trim())
    }

    /// Draft or in-progress: still collecting fields.
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Draft | OrderStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Submitted or anything after it, excluding cancellation.
    pub fn is_submitted(&self) -> bool {
        !self.is_active() && *self != OrderStatus::Cancelled
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        if *self == next {
            return true;
        }
        if next == Cancelled {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Draft, InProgress)
                | (Draft, AwaitingPayment)
                | (InProgress, AwaitingPayment)
                | (AwaitingPayment, ProofReceived)
                | (AwaitingPayment, Paid)
                | (ProofReceived, Paid)
                | (Paid, Testing)
                | (Testing, Completed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Chat,
    WebConfigurator,
}

/// Who placed the order. At least one of chat id or email is present.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct Identity {
    pub chat_user_id: Option<i64>,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl Identity {
    pub fn chat(user_id: i64, username: Option<String>) -> Self {
        Self {
            chat_user_id: Some(user_id),
            email: None,
            username,
        }
    }

    pub fn email(email: &str) -> Self {
        Self {
            chat_user_id: None,
            email: Some(email.trim().to_lowercase()),
            username: Some(email.trim().to_string()),
        }
    }

    /// Preferred lookup key: chat id first, then email.
    pub fn key(&self) -> Option<IdentityKey> {
        self.chat_user_id
            .map(IdentityKey::Chat)
            .or_else(|| self.email.as_deref().map(IdentityKey::email))
    }

    pub fn matches(&self, key: &IdentityKey) -> bool {
        match key {
            IdentityKey::Chat(id) => self.chat_user_id == Some(*id),
            IdentityKey::Email(email) => self
                .email
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email)),
        }
    }

    pub fn merge(&mut self, other: &Identity) {
        if other.chat_user_id.is_some() {
            self.chat_user_id = other.chat_user_id;
        }
        if other.email.is_some() {
            self.email.clone_from(&other.email);
        }
        if other.username.is_some() {
            self.username.clone_from(&other.username);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Chat(i64),
    Email(String),
}

impl IdentityKey {
    pub fn email(raw: &str) -> Self {
        IdentityKey::Email(raw.trim().to_lowercase())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Chat(id) => write!(f, "chat:{}", id),
            IdentityKey::Email(email) => write!(f, "email:{}", email),
        }
    }
}

/// An optional free-text answer.
///
/// `Skipped` records that the requester was asked and chose to leave it empty,
/// which satisfies the step just like a value does.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Slot<T> {
    #[default]
    Unset,
    Skipped,
    Set(T),
}

impl<T> Slot<T> {
    pub fn is_answered(&self) -> bool {
        !matches!(self, Slot::Unset)
    }

    pub fn as_option(&self) -> Option<&T> {
        match self {
            Slot::Set(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Clone> Slot<T> {
    /// Later answers win; `Unset` never overwrites.
    pub fn merge(&mut self, other: &Slot<T>) {
        if other.is_answered() {
            *self = other.clone();
        }
    }
}

impl Slot<String> {
    /// Trimmed text becomes `Set`, empty text becomes `Skipped`.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Slot::Skipped
        } else {
            Slot::Set(trimmed.to_string())
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct PaymentInfo {
    pub network: Option<String>,
    pub wallet: Option<String>,
    pub txid: Option<String>,
    pub proof_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentProof {
    /// Claimed on-chain transaction id.
    Txid(String),
    /// Reference to an uploaded file (photo, document).
    Attachment(String),
}

/// A partial field update. `None` / `Slot::Unset` leave the field untouched.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Default)]
pub struct OrderPatch {
    pub geo: Option<String>,
    pub payment_method: Option<String>,
    pub test_count: Option<u32>,
    pub payout: Option<PayoutTier>,
    pub custom_test_required: Option<bool>,
    pub package_type: Option<String>,
    #[serde(default)]
    pub comments: Slot<String>,
    #[serde(default)]
    pub site_url: Slot<String>,
    #[serde(default)]
    pub login: Slot<String>,
    #[serde(default)]
    pub password: Slot<String>,
    pub payload_hash: Option<String>,
    pub payment_network: Option<String>,
    pub payment_wallet: Option<String>,
}

/// Candidate passed to `OrderStore::upsert_draft`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub identity: Identity,
    pub origin: Origin,
    pub patch: OrderPatch,
}

/// The durable record of one testing engagement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub identity: Identity,
    pub origin: Origin,
    pub status: OrderStatus,
    pub geo: Option<String>,
    pub payment_method: Option<String>,
    pub test_count: Option<u32>,
    pub payout: Option<PayoutTier>,
    pub withdraw_required: bool,
    pub kyc_required: bool,
    pub custom_test_required: bool,
    pub package_type: Option<String>,
    pub comments: Slot<String>,
    pub site_url: Slot<String>,
    /// Stored through the credential cipher.
    pub login: Slot<String>,
    /// Stored through the credential cipher.
    pub password: Slot<String>,
    pub price: Option<Money>,
    pub payment: PaymentInfo,
    pub payload_hash: Option<String>,
    pub resume_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new_draft(
        id: OrderId,
        resume_token: String,
        draft: &OrderDraft,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut order = Self {
            id,
            identity: draft.identity.clone(),
            origin: draft.origin,
            status: OrderStatus::Draft,
            geo: None,
            payment_method: None,
            test_count: None,
            payout: None,
            withdraw_required: false,
            kyc_required: false,
            custom_test_required: false,
            package_type: None,
            comments: Slot::Unset,
            site_url: Slot::Unset,
            login: Slot::Unset,
            password: Slot::Unset,
            price: None,
            payment: PaymentInfo::default(),
            payload_hash: None,
            resume_token,
            created_at: now,
            updated_at: now,
        };
        order.apply(&draft.patch, now)?;
        Ok(order)
    }

    /// Merges the patch into the record. Validation happens before any field changes.
    pub fn apply(&mut self, patch: &OrderPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(count) = patch.test_count
            && !(1..=MAX_TEST_COUNT).contains(&count)
        {
            return Err(IntakeError::Validation(format!(
                "Test count must be between 1 and {}",
                MAX_TEST_COUNT
            )));
        }
        let geo = match patch.geo.as_deref() {
            Some(raw) => Some(crate::domain::geo::normalize_geo(raw).ok_or_else(|| {
                IntakeError::Validation(format!("Invalid region code: {}", raw))
            })?),
            None => None,
        };

        if geo.is_some() {
            self.geo = geo;
        }
        if patch.payment_method.is_some() {
            self.payment_method.clone_from(&patch.payment_method);
        }
        if patch.test_count.is_some() {
            self.test_count = patch.test_count;
        }
        if let Some(tier) = patch.payout {
            self.set_payout(tier);
        }
        if let Some(custom) = patch.custom_test_required {
            self.custom_test_required = custom;
        }
        if patch.package_type.is_some() {
            self.package_type.clone_from(&patch.package_type);
        }
        self.comments.merge(&patch.comments);
        self.site_url.merge(&patch.site_url);
        self.login.merge(&patch.login);
        self.password.merge(&patch.password);
        if !self.credentials_apply() {
            self.login = Slot::Unset;
            self.password = Slot::Unset;
        }
        if patch.payload_hash.is_some() {
            self.payload_hash.clone_from(&patch.payload_hash);
        }
        if patch.payment_network.is_some() {
            self.payment.network.clone_from(&patch.payment_network);
        }
        if patch.payment_wallet.is_some() {
            self.payment.wallet.clone_from(&patch.payment_wallet);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Credentials are irrelevant when the tester verifies with their own identity
    /// or when there is no site to log into.
    pub fn credentials_apply(&self) -> bool {
        self.payout != Some(PayoutTier::Kyc) && self.site_url != Slot::Skipped
    }

    /// The tier fixes both verification flags.
    pub fn set_payout(&mut self, tier: PayoutTier) {
        self.payout = Some(tier);
        self.withdraw_required = tier.withdraw_required();
        self.kyc_required = tier.kyc_required();
    }

    pub fn transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(IntakeError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Operator-driven change. An active order only becomes submitted through
    /// [`Order::submit`], which fixes the price.
    pub fn operator_transition(&mut self, next: OrderStatus, now: DateTime<Utc>) -> Result<()> {
        if self.status.is_active() && next.is_submitted() {
            return Err(IntakeError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.transition(next, now)
    }

    /// Chat-side field commit: only while active, and moves a draft to in-progress.
    pub fn advance(&mut self, patch: &OrderPatch, now: DateTime<Utc>) -> Result<()> {
        if !self.status.is_active() {
            return Err(IntakeError::InvalidTransition {
                from: self.status.to_string(),
                to: OrderStatus::InProgress.to_string(),
            });
        }
        self.apply(patch, now)?;
        self.status = OrderStatus::InProgress;
        Ok(())
    }

    /// Returns `false` when the order was already submitted and nothing changed.
    pub fn submit(&mut self, price: Money, now: DateTime<Utc>) -> Result<bool> {
        if self.status.is_submitted() {
            return Ok(false);
        }
        self.transition(OrderStatus::AwaitingPayment, now)?;
        self.price = Some(price);
        Ok(true)
    }

    /// Requester cancellation. Returns `false` for orders that are no longer active.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        true
    }

    pub fn record_proof(&mut self, proof: PaymentProof, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.status,
            OrderStatus::AwaitingPayment | OrderStatus::ProofReceived
        ) {
            return Err(IntakeError::InvalidTransition {
                from: self.status.to_string(),
                to: OrderStatus::ProofReceived.to_string(),
            });
        }
        match proof {
            PaymentProof::Txid(txid) => self.payment.txid = Some(txid),
            PaymentProof::Attachment(reference) => self.payment.proof_ref = Some(reference),
        }
        self.status = OrderStatus::ProofReceived;
        self.updated_at = now;
        Ok(())
    }

    pub fn resume_link(&self) -> String {
        format!("{}{}", RESUME_PREFIX, self.resume_token)
    }
}

/// Random URL-safe token for resumption links and payload references.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESUME_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub identity: Option<IdentityKey>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|s| order.status == s)
            && self
                .identity
                .as_ref()
                .is_none_or(|key| order.identity.matches(key))
    }
}
