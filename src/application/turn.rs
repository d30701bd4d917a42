//! Inputs to and outputs of one conversational turn.
//!
//! Replies are data, not text: rendering into a language happens at the edge.

use crate::domain::catalog::{Language, Money, PayoutTier, PriceBreakdown};
use crate::domain::order::{Identity, IdentityKey, OrderId, OrderStatus};
use crate::domain::workflow::Step;
use serde::Serialize;

/// The chat user sending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub chat_user_id: i64,
    pub username: Option<String>,
}

impl Requester {
    pub fn new(chat_user_id: i64, username: Option<String>) -> Self {
        Self {
            chat_user_id,
            username,
        }
    }

    pub fn key(&self) -> IdentityKey {
        IdentityKey::Chat(self.chat_user_id)
    }

    pub fn identity(&self) -> Identity {
        Identity::chat(self.chat_user_id, self.username.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// `/start` with an optional payload or resumption link.
    Start(Option<String>),
    Cancel,
    Status,
    ToggleLanguage,
    Help,
    Text(String),
    Skip,
    Back,
    Confirm,
    Edit,
    Paid,
    /// Reference to an uploaded photo or document.
    Attachment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadNotice {
    /// Signature mismatch. The payload was not used.
    CouldNotVerify,
    /// The referenced payload expired or never existed.
    ReferenceExpired,
    /// Not a recognizable payload; continuing with manual entry.
    Unreadable,
}

/// An order as shown to its requester. Credentials are masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub status: OrderStatus,
    pub geo: Option<String>,
    pub payment_method: Option<String>,
    pub test_count: Option<u32>,
    pub payout: Option<PayoutTier>,
    pub payout_title: Option<String>,
    pub comments: Option<String>,
    pub site_url: Option<String>,
    pub login: String,
    pub password: String,
    /// Quote from the current catalog.
    pub price: Option<PriceBreakdown>,
    /// Total fixed at submission.
    pub total: Option<Money>,
    pub resume_link: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Welcome,
    Help,
    Prompt {
        step: Step,
        choices: Vec<String>,
        can_skip: bool,
        can_go_back: bool,
    },
    Invalid {
        step: Step,
        message: String,
    },
    Payload(PayloadNotice),
    Prefilled {
        answered: usize,
    },
    Resumed {
        order_id: OrderId,
    },
    Confirm(OrderSummary),
    Duplicate(OrderSummary),
    Submitted(OrderSummary),
    PaymentDetails {
        order_id: OrderId,
        total: Money,
        network: String,
        wallet: Option<String>,
        help_contact: String,
    },
    ProofRequested,
    ProofReceived {
        order_id: OrderId,
    },
    Cancelled {
        order_id: OrderId,
    },
    /// Cancel arrived after submission; the order is unchanged.
    AlreadySubmitted(OrderSummary),
    NothingToCancel,
    /// The bound order left the active states behind the requester's back.
    OrderClosed(OrderSummary),
    Status(Option<OrderSummary>),
    LanguageChanged(Language),
    InvalidLink,
    CannotGoBack,
    NoSession,
}

/// Everything produced for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub language: Language,
    pub replies: Vec<Reply>,
}

/// `***1234` for long values, `***` for short ones, `—` when empty.
pub fn mask_secret(value: Option<&str>) -> String {
    match value {
        None | Some("") => "—".to_string(),
        Some(v) if v.chars().count() <= 4 => "***".to_string(),
        Some(v) => {
            let skip = v.chars().count() - 4;
            format!("***{}", v.chars().skip(skip).collect::<String>())
        }
    }
}
