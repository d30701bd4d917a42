use crate::application::seed::{seal_credentials, seed_patch};
use crate::application::session::{Conversation, Session, SessionRegistry};
use crate::application::turn::{
    Input, OrderSummary, PayloadNotice, Reply, Requester, Turn, mask_secret,
};
use crate::domain::catalog::{Language, PriceBreakdown, PricingCatalog};
use crate::domain::geo;
use crate::domain::order::{
    Order, OrderDraft, OrderPatch, OrderStatus, Origin, PaymentProof, RESUME_PREFIX, Slot,
};
use crate::domain::ports::{CredentialCipherBox, NotifierBox, OrderStoreBox, PayloadReferenceStoreBox};
use crate::domain::workflow::{
    self, Answer, Mode, Step, StepContext, first_unsatisfied, next_step, previous_step,
    validate_answer,
};
use crate::error::{IntakeError, Result};
use crate::interfaces::payload::{DecodedFields, build_payload_hash, decode_resolving};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

const MIN_TXID_LEN: usize = 5;

/// Read-only settings of the conversation, loaded once at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub catalog: PricingCatalog,
    pub geo_whitelist: Vec<String>,
    pub signing_secret: Option<Vec<u8>>,
    pub operator_ids: Vec<i64>,
    pub payment_network: String,
    pub wallet: Option<String>,
    pub help_contact: String,
    pub default_language: Language,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            catalog: PricingCatalog::default(),
            geo_whitelist: ["IN", "BD", "PK", "ID", "MY", "TH", "PH", "EG", "KZ", "UZ", "CI", "AR"]
                .into_iter()
                .map(String::from)
                .collect(),
            signing_secret: None,
            operator_ids: Vec::new(),
            payment_network: "USDT TRC-20".to_string(),
            wallet: None,
            help_contact: "@support".to_string(),
            default_language: Language::En,
        }
    }
}

/// Drives the order conversation.
///
/// Each inbound message is one turn: the requester's conversation lock is held
/// for the whole turn, every committed field goes through the order store, and
/// the replies come back as data for the transport to render.
pub struct IntakeEngine {
    orders: OrderStoreBox,
    references: PayloadReferenceStoreBox,
    notifier: NotifierBox,
    cipher: CredentialCipherBox,
    settings: EngineSettings,
    sessions: SessionRegistry,
}

type Outcome = (Option<Session>, Vec<Reply>);

impl IntakeEngine {
    /// Creates a new `IntakeEngine`.
    ///
    /// # Arguments
    ///
    /// * `orders` - Durable order records.
    /// * `references` - Cached long payloads behind `calc_ref_` tokens.
    /// * `notifier` - Operator notifications, best-effort.
    /// * `cipher` - Encryption of stored credentials.
    /// * `settings` - Catalog, whitelist and payment details.
    pub fn new(
        orders: OrderStoreBox,
        references: PayloadReferenceStoreBox,
        notifier: NotifierBox,
        cipher: CredentialCipherBox,
        settings: EngineSettings,
    ) -> Self {
        let sessions = SessionRegistry::new(settings.default_language);
        Self {
            orders,
            references,
            notifier,
            cipher,
            settings,
            sessions,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Handles one inbound message.
    ///
    /// Recoverable problems (bad answers, unreadable payloads, stale links) become
    /// replies. An `Err` means the store failed; the conversation stays where it
    /// was so the same message can be sent again.
    pub async fn handle(&self, requester: &Requester, input: Input) -> Result<Turn> {
        let key = requester.key();
        let turn = {
            let conversation = self.sessions.conversation(&key).await;
            let mut conversation = conversation.lock().await;
            self.handle_locked(requester, &mut conversation, input).await
        };
        self.sessions.release(&key).await;
        turn
    }

    async fn handle_locked(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
        input: Input,
    ) -> Result<Turn> {
        debug!(user = requester.chat_user_id, input = ?input, "handling message");

        let replies = match input {
            Input::Start(arg) => {
                let arg = arg.map(|a| a.trim().to_string()).filter(|a| !a.is_empty());
                match arg {
                    None => self.start_blank(requester, conversation).await?,
                    Some(arg) => match arg.strip_prefix(RESUME_PREFIX) {
                        Some(token) => self.resume(requester, conversation, token).await?,
                        None => self.start_with_payload(requester, conversation, &arg).await?,
                    },
                }
            }
            Input::Cancel => self.cancel(requester, conversation).await?,
            Input::Status => {
                let latest = self.orders.latest_for(&requester.key()).await?;
                vec![Reply::Status(
                    latest.map(|o| self.summarize(&o, conversation.language)),
                )]
            }
            Input::ToggleLanguage => {
                conversation.language = conversation.language.toggled();
                let mut replies = vec![Reply::LanguageChanged(conversation.language)];
                if let Some(session) = conversation.session.clone() {
                    let order = self.bound_order(&session).await?;
                    replies.push(self.present(&session, order.as_ref(), conversation.language));
                }
                replies
            }
            Input::Help => vec![Reply::Help],
            input => match conversation.session.clone() {
                Some(session) => {
                    let (next, replies) = self
                        .step(requester, session, input, conversation.language)
                        .await?;
                    conversation.session = next;
                    replies
                }
                None => self.without_session(requester, conversation, input).await?,
            },
        };

        Ok(Turn {
            language: conversation.language,
            replies,
        })
    }

    async fn start_blank(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
    ) -> Result<Vec<Reply>> {
        let mut session = Session::linear();
        let active = self.orders.find_active(&requester.key()).await?;
        session.order_id = active.as_ref().map(|o| o.id);
        let prompt = self.present(&session, active.as_ref(), conversation.language);
        conversation.session = Some(session);
        Ok(vec![Reply::Welcome, prompt])
    }

    async fn start_with_payload(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
        raw: &str,
    ) -> Result<Vec<Reply>> {
        let secret = self.settings.signing_secret.as_deref();
        let fields = match decode_resolving(raw, secret, &*self.references).await {
            Ok(fields) => fields,
            Err(IntakeError::SignatureInvalid) => {
                warn!(user = requester.chat_user_id, "payload signature mismatch");
                conversation.session = None;
                return Ok(vec![Reply::Payload(PayloadNotice::CouldNotVerify)]);
            }
            Err(IntakeError::ReferenceNotFound(token)) => {
                info!(user = requester.chat_user_id, token = %token, "payload reference not found");
                let mut replies = vec![Reply::Payload(PayloadNotice::ReferenceExpired)];
                replies.extend(self.start_blank(requester, conversation).await?);
                return Ok(replies);
            }
            Err(IntakeError::MalformedPayload(reason)) => {
                info!(user = requester.chat_user_id, reason = %reason, "unreadable payload");
                let mut replies = vec![Reply::Payload(PayloadNotice::Unreadable)];
                replies.extend(self.start_blank(requester, conversation).await?);
                return Ok(replies);
            }
            Err(e) => return Err(e),
        };

        let patch = self.seeded_patch(&fields, requester)?;
        let order = self
            .orders
            .upsert_draft(
                OrderDraft {
                    identity: requester.identity(),
                    origin: Origin::WebConfigurator,
                    patch,
                },
                &requester.key(),
            )
            .await?;
        info!(
            user = requester.chat_user_id,
            order_id = order.id,
            grammar = ?fields.grammar,
            "order seeded from payload"
        );

        let mut session = Session::gap_fill(order.id, first_unsatisfied(&order));
        session.price_hint = fields.price_hint;
        let answered = Step::COLLECTIBLE
            .iter()
            .filter(|s| workflow::applies(**s, &order) && workflow::is_satisfied(**s, &order))
            .count();
        let replies = vec![
            Reply::Prefilled { answered },
            self.present(&session, Some(&order), conversation.language),
        ];
        conversation.session = Some(session);
        Ok(replies)
    }

    /// Seeded patch plus the payment details and the requester-bound dedup hash.
    fn seeded_patch(&self, fields: &DecodedFields, requester: &Requester) -> Result<OrderPatch> {
        let mut patch = self.payment_patch();
        merge_patch(&mut patch, seed_patch(fields, &self.step_context()));
        patch.payload_hash = fields
            .fingerprint
            .as_deref()
            .map(|f| build_payload_hash(f, &requester.key()));
        seal_credentials(&mut patch, &*self.cipher)?;
        Ok(patch)
    }

    async fn resume(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
        token: &str,
    ) -> Result<Vec<Reply>> {
        let found = self.orders.find_by_resume_token(token).await?;
        let Some(order) = found.filter(|o| {
            o.identity
                .chat_user_id
                .is_none_or(|id| id == requester.chat_user_id)
        }) else {
            info!(user = requester.chat_user_id, "unknown resumption link");
            return Ok(vec![Reply::InvalidLink]);
        };

        let order = if order.identity.chat_user_id.is_none() {
            // Opened from another surface: the chat identity takes the order over,
            // replacing whatever draft it had going.
            if order.status.is_active()
                && let Some(other) = self.orders.find_active(&requester.key()).await?
                && other.id != order.id
            {
                self.orders.cancel(other.id).await?;
            }
            self.orders.claim(order.id, requester.identity()).await?
        } else {
            order
        };

        let language = conversation.language;
        let session = match order.status {
            status if status.is_active() => {
                Session::gap_fill(order.id, first_unsatisfied(&order))
            }
            OrderStatus::AwaitingPayment => Session {
                step: Step::Payment,
                mode: Mode::GapFill,
                order_id: Some(order.id),
                price_hint: None,
            },
            _ => {
                conversation.session = None;
                return Ok(vec![Reply::Status(Some(self.summarize(&order, language)))]);
            }
        };
        let replies = vec![
            Reply::Resumed { order_id: order.id },
            self.present(&session, Some(&order), language),
        ];
        conversation.session = Some(session);
        Ok(replies)
    }

    async fn cancel(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
    ) -> Result<Vec<Reply>> {
        let bound = conversation.session.as_ref().and_then(|s| s.order_id);
        let target = match bound {
            Some(id) => Some(id),
            None => self
                .orders
                .find_active(&requester.key())
                .await?
                .map(|o| o.id),
        };
        let Some(id) = target else {
            conversation.session = None;
            return Ok(vec![Reply::NothingToCancel]);
        };

        let order = match self.orders.cancel(id).await {
            Ok(order) => order,
            Err(IntakeError::NotFound(_)) => {
                conversation.session = None;
                return Ok(vec![Reply::NothingToCancel]);
            }
            Err(e) => return Err(e),
        };
        conversation.session = None;
        if order.status == OrderStatus::Cancelled {
            info!(user = requester.chat_user_id, order_id = id, "order cancelled");
            Ok(vec![Reply::Cancelled { order_id: id }])
        } else {
            Ok(vec![Reply::AlreadySubmitted(
                self.summarize(&order, conversation.language),
            )])
        }
    }

    /// Messages outside a conversation: reattach to an active order if there is one,
    /// and accept a payment screenshot for an order awaiting payment.
    async fn without_session(
        &self,
        requester: &Requester,
        conversation: &mut Conversation,
        input: Input,
    ) -> Result<Vec<Reply>> {
        let key = requester.key();
        if let Input::Attachment(reference) = &input
            && let Some(latest) = self.orders.latest_for(&key).await?
            && latest.status == OrderStatus::AwaitingPayment
        {
            let session = Session {
                step: Step::ProofOfPayment,
                mode: Mode::GapFill,
                order_id: Some(latest.id),
                price_hint: None,
            };
            let (next, replies) = self
                .record_proof(requester, session, PaymentProof::Attachment(reference.clone()), conversation.language)
                .await?;
            conversation.session = next;
            return Ok(replies);
        }

        match self.orders.find_active(&key).await? {
            Some(active) => {
                let session = Session::gap_fill(active.id, first_unsatisfied(&active));
                let replies = vec![
                    Reply::Resumed { order_id: active.id },
                    self.present(&session, Some(&active), conversation.language),
                ];
                conversation.session = Some(session);
                Ok(replies)
            }
            None => Ok(vec![Reply::NoSession]),
        }
    }

    /// One input at the session's current step.
    async fn step(
        &self,
        requester: &Requester,
        mut session: Session,
        input: Input,
        language: Language,
    ) -> Result<Outcome> {
        match (session.step, input) {
            (step, Input::Text(text)) if step.is_collectible() => {
                self.commit(requester, session, Answer::Text(text), language)
                    .await
            }
            (step, Input::Skip) if step.is_collectible() => {
                self.commit(requester, session, Answer::Skip, language).await
            }
            (step, Input::Back) if step.is_collectible() || step == Step::Confirm => {
                let order = self.bound_order(&session).await?;
                match order.as_ref().and_then(|o| previous_step(step, o)) {
                    Some(previous) => {
                        session.mode = Mode::Linear;
                        session.step = previous;
                        let reply = self.present(&session, order.as_ref(), language);
                        Ok((Some(session), vec![reply]))
                    }
                    None => {
                        let reply = self.present(&session, order.as_ref(), language);
                        Ok((Some(session), vec![Reply::CannotGoBack, reply]))
                    }
                }
            }
            (Step::Confirm, Input::Confirm) => self.confirm(requester, session, language).await,
            (Step::Confirm, Input::Edit) => {
                session.mode = Mode::Linear;
                session.step = Step::Geo;
                let order = self.bound_order(&session).await?;
                let reply = self.present(&session, order.as_ref(), language);
                Ok((Some(session), vec![reply]))
            }
            (Step::Payment, Input::Paid) => {
                session.step = Step::ProofOfPayment;
                Ok((Some(session), vec![Reply::ProofRequested]))
            }
            (Step::Payment | Step::ProofOfPayment, Input::Attachment(reference)) => {
                self.record_proof(requester, session, PaymentProof::Attachment(reference), language)
                    .await
            }
            (Step::ProofOfPayment, Input::Text(text)) => {
                let txid = text.trim();
                if txid.chars().count() < MIN_TXID_LEN {
                    return Ok((
                        Some(session),
                        vec![
                            Reply::Invalid {
                                step: Step::ProofOfPayment,
                                message: format!(
                                    "Transaction id must be at least {} characters",
                                    MIN_TXID_LEN
                                ),
                            },
                            Reply::ProofRequested,
                        ],
                    ));
                }
                self.record_proof(requester, session, PaymentProof::Txid(txid.to_string()), language)
                    .await
            }
            _ => {
                let order = self.bound_order(&session).await?;
                let reply = self.present(&session, order.as_ref(), language);
                Ok((Some(session), vec![reply]))
            }
        }
    }

    async fn commit(
        &self,
        requester: &Requester,
        mut session: Session,
        answer: Answer,
        language: Language,
    ) -> Result<Outcome> {
        let step = session.step;
        let current = self.bound_order(&session).await?;
        let geo = current.as_ref().and_then(|o| o.geo.as_deref());

        let mut patch = match validate_answer(step, &answer, geo, &self.step_context()) {
            Ok(patch) => patch,
            Err(IntakeError::Validation(message)) => {
                let reply = self.present(&session, current.as_ref(), language);
                return Ok((Some(session), vec![Reply::Invalid { step, message }, reply]));
            }
            Err(e) => return Err(e),
        };
        seal_credentials(&mut patch, &*self.cipher)?;

        let saved = match session.order_id {
            None => {
                let mut first = self.payment_patch();
                merge_patch(&mut first, patch);
                self.orders
                    .upsert_draft(
                        OrderDraft {
                            identity: requester.identity(),
                            origin: Origin::Chat,
                            patch: first,
                        },
                        &requester.key(),
                    )
                    .await
            }
            Some(id) => self.orders.advance_from_chat(id, patch).await,
        };
        let order = match saved {
            Ok(order) => order,
            Err(IntakeError::InvalidTransition { .. }) => {
                return self.closed(&session, language).await;
            }
            Err(IntakeError::NotFound(_)) => return Ok((None, vec![Reply::NoSession])),
            Err(e) => return Err(e),
        };

        session.order_id = Some(order.id);
        session.step = match session.mode {
            Mode::Linear => next_step(step, &order),
            Mode::GapFill => first_unsatisfied(&order),
        };
        let reply = self.present(&session, Some(&order), language);
        Ok((Some(session), vec![reply]))
    }

    async fn confirm(
        &self,
        requester: &Requester,
        mut session: Session,
        language: Language,
    ) -> Result<Outcome> {
        let Some(order) = self.bound_order(&session).await? else {
            let session = Session::linear();
            let reply = self.present(&session, None, language);
            return Ok((Some(session), vec![reply]));
        };
        if !order.status.is_active() {
            return self.closed(&session, language).await;
        }
        let pending = first_unsatisfied(&order);
        if pending != Step::Confirm {
            session.mode = Mode::GapFill;
            session.step = pending;
            let reply = self.present(&session, Some(&order), language);
            return Ok((Some(session), vec![reply]));
        }

        match self.ensure_unique(requester, &order).await {
            Ok(()) => {}
            Err(IntakeError::DuplicateSubmission(prior_id)) => {
                let prior = self.orders.get(prior_id).await?;
                return self.resolve_duplicate(requester, &order, prior, language).await;
            }
            Err(e) => return Err(e),
        }

        let quote = self.quote(&order)?;
        if let Some(hint) = session.price_hint
            && Decimal::from(hint) != quote.total.value()
        {
            info!(
                order_id = order.id,
                hint,
                total = %quote.total,
                "configurator price differs from computed price"
            );
        }

        let submitted = self.orders.submit(order.id, quote.total).await?;
        info!(user = requester.chat_user_id, order_id = submitted.id, total = %quote.total, "order submitted");
        self.notify_operators(&self.new_order_notice(&submitted, requester))
            .await;

        session.step = Step::Payment;
        Ok((
            Some(session),
            vec![
                Reply::Submitted(self.summarize(&submitted, language)),
                self.payment_details(&submitted),
            ],
        ))
    }

    /// `DuplicateSubmission` naming the earlier order when the requester already
    /// submitted the same payload.
    async fn ensure_unique(&self, requester: &Requester, order: &Order) -> Result<()> {
        if let Some(hash) = order.payload_hash.as_deref()
            && let Some(prior) = self
                .orders
                .find_by_payload_hash(&requester.key(), hash)
                .await?
            && prior.id != order.id
        {
            return Err(IntakeError::DuplicateSubmission(prior.id));
        }
        Ok(())
    }

    /// Drops the redundant draft and carries on with the earlier order.
    async fn resolve_duplicate(
        &self,
        requester: &Requester,
        order: &Order,
        prior: Order,
        language: Language,
    ) -> Result<Outcome> {
        info!(
            user = requester.chat_user_id,
            order_id = order.id,
            prior_id = prior.id,
            "duplicate submission, keeping the earlier order"
        );
        self.orders.cancel(order.id).await?;
        let mut replies = vec![Reply::Duplicate(self.summarize(&prior, language))];
        if prior.status != OrderStatus::AwaitingPayment {
            return Ok((None, replies));
        }
        replies.push(self.payment_details(&prior));
        let session = Session {
            step: Step::Payment,
            mode: Mode::GapFill,
            order_id: Some(prior.id),
            price_hint: None,
        };
        Ok((Some(session), replies))
    }

    async fn record_proof(
        &self,
        requester: &Requester,
        session: Session,
        proof: PaymentProof,
        language: Language,
    ) -> Result<Outcome> {
        let Some(id) = session.order_id else {
            return Ok((None, vec![Reply::NoSession]));
        };
        let notice_detail = match &proof {
            PaymentProof::Txid(txid) => format!("Txid: {}", txid),
            PaymentProof::Attachment(reference) => format!("Attachment: {}", reference),
        };
        match self.orders.record_proof(id, proof).await {
            Ok(order) => {
                info!(user = requester.chat_user_id, order_id = id, "payment proof received");
                self.notify_operators(&format!(
                    "💸 Payment proof for order #{}\nFrom: {}\n{}",
                    order.id,
                    display_name(requester),
                    notice_detail
                ))
                .await;
                Ok((None, vec![Reply::ProofReceived { order_id: id }]))
            }
            Err(IntakeError::InvalidTransition { .. }) => self.closed(&session, language).await,
            Err(e) => Err(e),
        }
    }

    async fn closed(&self, session: &Session, language: Language) -> Result<Outcome> {
        match self.bound_order(session).await? {
            Some(order) => Ok((None, vec![Reply::OrderClosed(self.summarize(&order, language))])),
            None => Ok((None, vec![Reply::NoSession])),
        }
    }

    async fn bound_order(&self, session: &Session) -> Result<Option<Order>> {
        match session.order_id {
            Some(id) => match self.orders.get(id).await {
                Ok(order) => Ok(Some(order)),
                Err(IntakeError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    async fn notify_operators(&self, text: &str) {
        for operator in &self.settings.operator_ids {
            if let Err(e) = self.notifier.notify(*operator, text).await {
                warn!(operator, error = %e, "operator notification failed");
            }
        }
    }

    fn new_order_notice(&self, order: &Order, requester: &Requester) -> String {
        let total = order
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "—".to_string());
        format!(
            "🆕 Order #{}\nFrom: {}\nGeo: {}\nMethod: {}\nTests: {}\nPayout: {}\nTotal: {}",
            order.id,
            display_name(requester),
            order.geo.as_deref().map(geo::format_country).unwrap_or_default(),
            order.payment_method.as_deref().unwrap_or("—"),
            order.test_count.unwrap_or_default(),
            order.payout.map(|p| p.key()).unwrap_or("—"),
            total
        )
    }

    fn step_context(&self) -> StepContext<'_> {
        StepContext {
            geo_whitelist: &self.settings.geo_whitelist,
            catalog: &self.settings.catalog,
        }
    }

    fn payment_patch(&self) -> OrderPatch {
        OrderPatch {
            payment_network: Some(self.settings.payment_network.clone()),
            payment_wallet: self.settings.wallet.clone(),
            ..Default::default()
        }
    }

    fn reveal(&self, slot: &Slot<String>) -> String {
        match slot.as_option() {
            Some(sealed) => match self.cipher.decrypt(sealed) {
                Ok(plain) => mask_secret(Some(&plain)),
                Err(e) => {
                    warn!(error = %e, "stored credential could not be decrypted");
                    mask_secret(None)
                }
            },
            None => mask_secret(None),
        }
    }

    fn quote(&self, order: &Order) -> Result<PriceBreakdown> {
        match (order.test_count, order.payout) {
            (Some(count), Some(tier)) => self.settings.catalog.quote(count, tier),
            _ => Err(IntakeError::Validation(
                "Order is missing the test count or payout option".to_string(),
            )),
        }
    }

    fn summarize(&self, order: &Order, language: Language) -> OrderSummary {
        OrderSummary {
            id: order.id,
            status: order.status,
            geo: order.geo.clone(),
            payment_method: order.payment_method.clone(),
            test_count: order.test_count,
            payout: order.payout,
            payout_title: order
                .payout
                .map(|tier| self.settings.catalog.option(tier).title(language)),
            comments: order.comments.as_option().cloned(),
            site_url: order.site_url.as_option().cloned(),
            login: self.reveal(&order.login),
            password: self.reveal(&order.password),
            price: self.quote(order).ok(),
            total: order.price,
            resume_link: order.resume_link(),
        }
    }

    fn payment_details(&self, order: &Order) -> Reply {
        Reply::PaymentDetails {
            order_id: order.id,
            total: order
                .price
                .or_else(|| self.quote(order).ok().map(|q| q.total))
                .unwrap_or_default(),
            network: order
                .payment
                .network
                .clone()
                .unwrap_or_else(|| self.settings.payment_network.clone()),
            wallet: order
                .payment
                .wallet
                .clone()
                .or_else(|| self.settings.wallet.clone()),
            help_contact: self.settings.help_contact.clone(),
        }
    }

    fn choices(&self, step: Step, order: Option<&Order>, language: Language) -> Vec<String> {
        match step {
            Step::Geo => self
                .settings
                .geo_whitelist
                .iter()
                .map(|code| geo::format_country(code))
                .collect(),
            Step::Method => {
                let region = order.and_then(|o| o.geo.as_deref()).unwrap_or_default();
                geo::methods_for(region)
                    .iter()
                    .map(|m| m.to_string())
                    .collect()
            }
            Step::Payout => self
                .settings
                .catalog
                .options()
                .iter()
                .map(|o| o.title(language))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// What the requester sees for the session's current step.
    fn present(&self, session: &Session, order: Option<&Order>, language: Language) -> Reply {
        match (session.step, order) {
            (Step::Confirm, Some(order)) => Reply::Confirm(self.summarize(order, language)),
            (Step::Payment, Some(order)) => self.payment_details(order),
            (Step::ProofOfPayment, _) => Reply::ProofRequested,
            (step, order) => Reply::Prompt {
                step,
                choices: self.choices(step, order, language),
                can_skip: step.is_optional(),
                can_go_back: order.is_some_and(|o| previous_step(step, o).is_some()),
            },
        }
    }
}

fn display_name(requester: &Requester) -> String {
    match &requester.username {
        Some(name) => format!("@{} ({})", name, requester.chat_user_id),
        None => requester.chat_user_id.to_string(),
    }
}

/// Copies every field `patch` sets onto `base`.
fn merge_patch(base: &mut OrderPatch, patch: OrderPatch) {
    let OrderPatch {
        geo,
        payment_method,
        test_count,
        payout,
        custom_test_required,
        package_type,
        comments,
        site_url,
        login,
        password,
        payload_hash,
        payment_network,
        payment_wallet,
    } = patch;
    base.geo = geo.or(base.geo.take());
    base.payment_method = payment_method.or(base.payment_method.take());
    base.test_count = test_count.or(base.test_count);
    base.payout = payout.or(base.payout);
    base.custom_test_required = custom_test_required.or(base.custom_test_required);
    base.package_type = package_type.or(base.package_type.take());
    base.comments.merge(&comments);
    base.site_url.merge(&site_url);
    base.login.merge(&login);
    base.password.merge(&password);
    base.payload_hash = payload_hash.or(base.payload_hash.take());
    base.payment_network = payment_network.or(base.payment_network.take());
    base.payment_wallet = payment_wallet.or(base.payment_wallet.take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{Money, PayoutTier};
    use crate::domain::order::{Identity, IdentityKey};
    use crate::domain::ports::{OrderStore, PayloadReferenceStore};
    use crate::infrastructure::cipher::{ChaChaCipher, PassthroughCipher};
    use crate::infrastructure::in_memory::{InMemoryOrderStore, InMemoryPayloadReferenceStore};
    use crate::infrastructure::notifier::MemoryNotifier;
    use crate::interfaces::payload::{CompactFields, encode_v1};

    const SECRET: &[u8] = b"configurator-secret";

    struct Harness {
        engine: IntakeEngine,
        orders: InMemoryOrderStore,
        references: InMemoryPayloadReferenceStore,
        notifier: MemoryNotifier,
        user: Requester,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_cipher(Box::new(PassthroughCipher))
        }

        fn with_cipher(cipher: CredentialCipherBox) -> Self {
            let orders = InMemoryOrderStore::new();
            let references = InMemoryPayloadReferenceStore::new();
            let notifier = MemoryNotifier::new();
            let settings = EngineSettings {
                signing_secret: Some(SECRET.to_vec()),
                operator_ids: vec![99],
                wallet: Some("TWallet123".to_string()),
                ..Default::default()
            };
            let engine = IntakeEngine::new(
                Box::new(orders.clone()),
                Box::new(references.clone()),
                Box::new(notifier.clone()),
                cipher,
                settings,
            );
            Self {
                engine,
                orders,
                references,
                notifier,
                user: Requester::new(5, Some("alice".to_string())),
            }
        }

        async fn say(&self, input: Input) -> Vec<Reply> {
            self.engine.handle(&self.user, input).await.unwrap().replies
        }

        async fn text(&self, text: &str) -> Vec<Reply> {
            self.say(Input::Text(text.to_string())).await
        }

        /// Starts from a signed payload for India, 3 tests, payout check via UPI,
        /// skips the optional steps and submits.
        async fn submit_from_payload(&self) -> Vec<Reply> {
            self.say(Input::Start(Some(payload()))).await;
            self.say(Input::Skip).await;
            self.say(Input::Skip).await;
            self.say(Input::Confirm).await
        }
    }

    fn payload() -> String {
        let fields = CompactFields {
            geo: "IN".to_string(),
            test_count: 3,
            payout: PayoutTier::Withdraw,
            payment_method: Some("UPI".to_string()),
            site_url: None,
            login: None,
            password: None,
            comments: None,
            price: Some(265),
        };
        encode_v1(&fields, Some(SECRET)).unwrap()
    }

    fn prompt_step(reply: &Reply) -> Option<Step> {
        match reply {
            Reply::Prompt { step, .. } => Some(*step),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_linear_flow_prices_the_example_order() {
        let h = Harness::new();
        let replies = h.say(Input::Start(None)).await;
        assert!(matches!(
            replies.as_slice(),
            [Reply::Welcome, Reply::Prompt { step: Step::Geo, .. }]
        ));

        let replies = h.text("IN").await;
        match &replies[0] {
            Reply::Prompt { step, choices, .. } => {
                assert_eq!(*step, Step::Method);
                assert!(choices.contains(&"UPI".to_string()));
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(prompt_step(&h.text("upi").await[0]), Some(Step::TestCount));
        assert_eq!(prompt_step(&h.text("3").await[0]), Some(Step::Payout));
        assert_eq!(prompt_step(&h.text("withdraw").await[0]), Some(Step::Comments));
        assert_eq!(prompt_step(&h.say(Input::Skip).await[0]), Some(Step::SiteUrl));

        let replies = h.say(Input::Skip).await;
        let Reply::Confirm(summary) = &replies[0] else {
            panic!("expected confirmation, got {:?}", replies);
        };
        assert_eq!(summary.price.unwrap().total, Money::from_eur(265));
        assert_eq!(summary.status, OrderStatus::InProgress);

        let replies = h.say(Input::Confirm).await;
        assert!(matches!(
            replies.as_slice(),
            [Reply::Submitted(_), Reply::PaymentDetails { order_id: 1, .. }]
        ));
        if let Reply::PaymentDetails { total, wallet, .. } = &replies[1] {
            assert_eq!(*total, Money::from_eur(265));
            assert_eq!(wallet.as_deref(), Some("TWallet123"));
        }

        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.price, Some(Money::from_eur(265)));
        assert_eq!(order.origin, Origin::Chat);

        let sent = h.notifier.drain().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 99);
        assert!(sent[0].1.contains("Order #1"));
        assert!(sent[0].1.contains("@alice"));
    }

    #[tokio::test]
    async fn test_invalid_answer_reprompts_without_writing() {
        let h = Harness::new();
        h.say(Input::Start(None)).await;

        let replies = h.text("FR").await;
        assert!(matches!(
            replies.as_slice(),
            [
                Reply::Invalid { step: Step::Geo, .. },
                Reply::Prompt { step: Step::Geo, .. }
            ]
        ));
        let orders = h.orders.list(&Default::default()).await.unwrap();
        assert!(orders.is_empty());

        let replies = h.say(Input::Skip).await;
        assert!(matches!(replies[0], Reply::Invalid { step: Step::Geo, .. }));
    }

    #[tokio::test]
    async fn test_signed_payload_fills_gaps_only() {
        let h = Harness::new();
        let replies = h.say(Input::Start(Some(payload()))).await;
        assert!(matches!(
            replies.as_slice(),
            [
                Reply::Prefilled { answered: 4 },
                Reply::Prompt { step: Step::Comments, can_skip: true, .. }
            ]
        ));

        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.origin, Origin::WebConfigurator);
        assert_eq!(order.payment_method.as_deref(), Some("UPI"));
        assert!(order.payload_hash.is_some());
        assert_eq!(order.payment.wallet.as_deref(), Some("TWallet123"));
    }

    #[tokio::test]
    async fn test_tampered_payload_is_not_used() {
        let h = Harness::new();
        let tampered = payload().replace("tests3", "tests9");
        let replies = h.say(Input::Start(Some(tampered))).await;
        assert_eq!(replies, vec![Reply::Payload(PayloadNotice::CouldNotVerify)]);
        assert!(h.orders.list(&Default::default()).await.unwrap().is_empty());
        assert_eq!(h.text("hello").await, vec![Reply::NoSession]);
    }

    #[tokio::test]
    async fn test_unknown_reference_falls_back_to_manual_entry() {
        let h = Harness::new();
        let replies = h
            .say(Input::Start(Some("calc_ref_abcd1234".to_string())))
            .await;
        assert!(matches!(
            replies.as_slice(),
            [
                Reply::Payload(PayloadNotice::ReferenceExpired),
                Reply::Welcome,
                Reply::Prompt { step: Step::Geo, .. }
            ]
        ));
    }

    #[tokio::test]
    async fn test_saved_reference_seeds_the_order() {
        let h = Harness::new();
        h.references.save("abcd1234", &payload()).await.unwrap();
        let replies = h
            .say(Input::Start(Some("calc_ref_abcd1234".to_string())))
            .await;
        assert!(matches!(replies[0], Reply::Prefilled { answered: 4 }));
    }

    #[tokio::test]
    async fn test_cancel_after_submit_leaves_order_awaiting_payment() {
        let h = Harness::new();
        h.submit_from_payload().await;

        let replies = h.say(Input::Cancel).await;
        assert!(matches!(replies.as_slice(), [Reply::AlreadySubmitted(_)]));
        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
    }

    #[tokio::test]
    async fn test_cancel_active_draft() {
        let h = Harness::new();
        h.say(Input::Start(None)).await;
        h.text("IN").await;

        assert_eq!(h.say(Input::Cancel).await, vec![Reply::Cancelled { order_id: 1 }]);
        assert_eq!(h.orders.get(1).await.unwrap().status, OrderStatus::Cancelled);
        assert_eq!(h.say(Input::Cancel).await, vec![Reply::NothingToCancel]);
    }

    #[tokio::test]
    async fn test_double_confirm_submits_once() {
        let h = Harness::new();
        h.submit_from_payload().await;
        let replies = h.say(Input::Confirm).await;
        // Still on the payment step: the confirm is answered with the payment details.
        assert!(matches!(
            replies.as_slice(),
            [Reply::PaymentDetails { order_id: 1, .. }]
        ));
        let orders = h.orders.list(&Default::default()).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(h.notifier.drain().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_payload_twice_returns_existing_order() {
        let h = Harness::new();
        h.submit_from_payload().await;
        let replies = h.submit_from_payload().await;

        match replies.as_slice() {
            [Reply::Duplicate(summary), Reply::PaymentDetails { order_id, .. }] => {
                assert_eq!(summary.id, 1);
                assert_eq!(*order_id, 1);
            }
            other => panic!("unexpected replies {:?}", other),
        }
        assert_eq!(h.orders.get(2).await.unwrap().status, OrderStatus::Cancelled);
        let counts = h.orders.status_counts().await.unwrap();
        assert_eq!(counts.get(&OrderStatus::AwaitingPayment), Some(&1));
    }

    #[tokio::test]
    async fn test_payment_proof_by_txid() {
        let h = Harness::new();
        h.submit_from_payload().await;

        assert_eq!(h.say(Input::Paid).await, vec![Reply::ProofRequested]);
        let replies = h.text("abc").await;
        assert!(matches!(
            replies.as_slice(),
            [Reply::Invalid { step: Step::ProofOfPayment, .. }, Reply::ProofRequested]
        ));
        assert_eq!(
            h.text("0xdeadbeef").await,
            vec![Reply::ProofReceived { order_id: 1 }]
        );

        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.status, OrderStatus::ProofReceived);
        assert_eq!(order.payment.txid.as_deref(), Some("0xdeadbeef"));
        let sent = h.notifier.drain().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1.contains("Txid: 0xdeadbeef"));
    }

    #[tokio::test]
    async fn test_attachment_without_session_records_proof() {
        let h = Harness::new();
        h.submit_from_payload().await;
        h.engine
            .sessions
            .conversation(&h.user.key())
            .await
            .lock()
            .await
            .session = None;

        let replies = h.say(Input::Attachment("photo:42".to_string())).await;
        assert_eq!(replies, vec![Reply::ProofReceived { order_id: 1 }]);
        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.payment.proof_ref.as_deref(), Some("photo:42"));
    }

    #[tokio::test]
    async fn test_resume_link_claims_web_draft() {
        let h = Harness::new();
        let draft = h
            .orders
            .upsert_draft(
                OrderDraft {
                    identity: Identity::email("buyer@example.com"),
                    origin: Origin::WebConfigurator,
                    patch: OrderPatch {
                        geo: Some("BD".to_string()),
                        ..Default::default()
                    },
                },
                &IdentityKey::email("buyer@example.com"),
            )
            .await
            .unwrap();

        let replies = h.say(Input::Start(Some(draft.resume_link()))).await;
        assert!(matches!(
            replies.as_slice(),
            [
                Reply::Resumed { order_id: 1 },
                Reply::Prompt { step: Step::Method, .. }
            ]
        ));
        let order = h.orders.get(1).await.unwrap();
        assert_eq!(order.identity.chat_user_id, Some(5));
        assert_eq!(order.identity.email.as_deref(), Some("buyer@example.com"));

        assert_eq!(prompt_step(&h.text("bKash").await[0]), Some(Step::TestCount));
        assert_eq!(
            h.say(Input::Start(Some("ord_nosuchtoken".to_string()))).await,
            vec![Reply::InvalidLink]
        );
    }

    #[tokio::test]
    async fn test_resume_link_of_another_chat_user_is_rejected() {
        let h = Harness::new();
        let other = Requester::new(6, None);
        h.engine.handle(&other, Input::Start(None)).await.unwrap();
        h.engine
            .handle(&other, Input::Text("IN".to_string()))
            .await
            .unwrap();
        let link = h.orders.get(1).await.unwrap().resume_link();

        assert_eq!(h.say(Input::Start(Some(link))).await, vec![Reply::InvalidLink]);
    }

    #[tokio::test]
    async fn test_credentials_are_sealed_and_masked() {
        let h = Harness::with_cipher(Box::new(ChaChaCipher::new("k1", [7u8; 32])));
        h.say(Input::Start(None)).await;
        for answer in ["IN", "UPI", "1", "none"] {
            h.text(answer).await;
        }
        h.say(Input::Skip).await;
        assert_eq!(prompt_step(&h.text("https://example.com").await[0]), Some(Step::Login));
        h.text("tester").await;
        let replies = h.text("hunter2024").await;

        let Reply::Confirm(summary) = &replies[0] else {
            panic!("expected confirmation, got {:?}", replies);
        };
        assert_eq!(summary.login, "***ster");
        assert_eq!(summary.password, "***2024");
        assert_eq!(summary.price.unwrap().total, Money::from_eur(85));

        let order = h.orders.get(1).await.unwrap();
        let stored = order.password.as_option().unwrap();
        assert!(stored.starts_with("enc:v1:k1:"));
        assert!(!stored.contains("hunter2024"));
    }

    #[tokio::test]
    async fn test_back_walks_to_previous_step() {
        let h = Harness::new();
        h.say(Input::Start(None)).await;
        assert!(matches!(
            h.say(Input::Back).await.as_slice(),
            [Reply::CannotGoBack, Reply::Prompt { step: Step::Geo, .. }]
        ));
        h.text("IN").await;
        assert_eq!(prompt_step(&h.say(Input::Back).await[0]), Some(Step::Geo));
        assert_eq!(prompt_step(&h.text("PK").await[0]), Some(Step::Method));
        assert_eq!(h.orders.get(1).await.unwrap().geo.as_deref(), Some("PK"));
    }

    #[tokio::test]
    async fn test_message_without_session_resumes_active_order() {
        let h = Harness::new();
        assert_eq!(h.text("hi").await, vec![Reply::NoSession]);
        assert!(!h.engine.sessions.is_tracked(&h.user.key()).await);

        h.say(Input::Start(None)).await;
        h.text("IN").await;
        assert!(h.engine.sessions.is_tracked(&h.user.key()).await);
        h.engine
            .sessions
            .conversation(&h.user.key())
            .await
            .lock()
            .await
            .session = None;

        let replies = h.text("hi").await;
        assert!(matches!(
            replies.as_slice(),
            [
                Reply::Resumed { order_id: 1 },
                Reply::Prompt { step: Step::Method, .. }
            ]
        ));
    }

    #[tokio::test]
    async fn test_language_toggle_and_status() {
        let h = Harness::new();
        let turn = h.engine.handle(&h.user, Input::ToggleLanguage).await.unwrap();
        assert_eq!(turn.language, Language::Ru);
        assert_eq!(turn.replies, vec![Reply::LanguageChanged(Language::Ru)]);

        assert_eq!(h.say(Input::Status).await, vec![Reply::Status(None)]);
        h.submit_from_payload().await;
        match h.say(Input::Status).await.as_slice() {
            [Reply::Status(Some(summary))] => {
                assert_eq!(summary.status, OrderStatus::AwaitingPayment);
                assert_eq!(summary.total, Some(Money::from_eur(265)));
                assert!(summary.payout_title.as_deref().unwrap().starts_with("Нужно"));
            }
            other => panic!("unexpected replies {:?}", other),
        }
    }
}
