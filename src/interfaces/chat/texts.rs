//! English and Russian text for every reply the engine produces.

use crate::application::turn::{OrderSummary, PayloadNotice, Reply};
use crate::domain::catalog::{Language, Money};
use crate::domain::geo;
use crate::domain::workflow::Step;

struct Texts {
    welcome: &'static str,
    help: &'static str,
    geo: &'static str,
    method: &'static str,
    test_count: &'static str,
    payout: &'static str,
    comments: &'static str,
    site_url: &'static str,
    login: &'static str,
    password: &'static str,
    choose_from: &'static str,
    skip_hint: &'static str,
    back_hint: &'static str,
    invalid: &'static str,
    could_not_verify: &'static str,
    reference_expired: &'static str,
    unreadable: &'static str,
    prefilled: &'static str,
    resumed: &'static str,
    confirm_title: &'static str,
    confirm_hint: &'static str,
    duplicate: &'static str,
    submitted: &'static str,
    payment: &'static str,
    payment_no_wallet: &'static str,
    proof_requested: &'static str,
    proof_received: &'static str,
    cancelled: &'static str,
    already_submitted: &'static str,
    nothing_to_cancel: &'static str,
    order_closed: &'static str,
    no_orders: &'static str,
    last_order: &'static str,
    language_changed: &'static str,
    invalid_link: &'static str,
    cannot_go_back: &'static str,
    no_session: &'static str,
    labels: Labels,
}

struct Labels {
    order: &'static str,
    status: &'static str,
    geo: &'static str,
    method: &'static str,
    tests: &'static str,
    payout: &'static str,
    comments: &'static str,
    site: &'static str,
    login: &'static str,
    password: &'static str,
    base: &'static str,
    surcharge: &'static str,
    total: &'static str,
    link: &'static str,
}

const EN: Texts = Texts {
    welcome: "Welcome! Let's put together a payment QA order step by step.",
    help: "Commands:\n/start - start a new order\n/status - latest order status\n/cancel - cancel the current order\n/lang - switch language\n\nWhile answering: back, skip, confirm, edit, paid.",
    geo: "Which country or region should we test in?",
    method: "Which payment method should we test? One method per order.",
    test_count: "How many test runs do you need? (1-25)",
    payout: "Do the tests need a payout check?",
    comments: "Any comments or special requests?",
    site_url: "Link to the site under test (http:// or https://)",
    login: "Login for the test account",
    password: "Password for the test account",
    choose_from: "Options",
    skip_hint: "Send \"skip\" to leave it empty.",
    back_hint: "Send \"back\" to change the previous answer.",
    invalid: "⚠️ {message}",
    could_not_verify: "We could not verify this order link. Please open it from the website again.",
    reference_expired: "This order link has expired. Let's fill the order in here.",
    unreadable: "We could not read the order details from the link. Let's fill the order in here.",
    prefilled: "Loaded {count} answers from the configurator.",
    resumed: "Continuing order #{id}.",
    confirm_title: "Please check your order",
    confirm_hint: "Send \"confirm\" to place it, \"edit\" to start over or \"back\" to change the last answer.",
    duplicate: "You already placed this order as #{id}.",
    submitted: "✅ Order #{id} created.",
    payment: "Send {total} via {network} to:\n{wallet}\nThen send \"paid\" and attach a screenshot or the transaction id.\nQuestions? {contact}",
    payment_no_wallet: "Send {total} via {network}. {contact} will share the wallet address.\nThen send \"paid\" and attach a screenshot or the transaction id.",
    proof_requested: "Attach a screenshot or document, or send the transaction id.",
    proof_received: "✅ Payment proof for order #{id} received. We will verify it shortly.",
    cancelled: "Order #{id} cancelled. Send /start to begin again.",
    already_submitted: "This order was already submitted and can no longer be cancelled.",
    nothing_to_cancel: "There is nothing to cancel.",
    order_closed: "This order can no longer be changed.",
    no_orders: "You don't have any orders yet.",
    last_order: "Your latest order",
    language_changed: "Language switched to English.",
    invalid_link: "This order link is not valid.",
    cannot_go_back: "This is the first question.",
    no_session: "Send /start to create an order.",
    labels: Labels {
        order: "Order",
        status: "Status",
        geo: "Country/region",
        method: "Payment method",
        tests: "Test runs",
        payout: "Payout option",
        comments: "Comments",
        site: "Site",
        login: "Login",
        password: "Password",
        base: "Base price",
        surcharge: "Payout services",
        total: "Total",
        link: "Resume link",
    },
};

const RU: Texts = Texts {
    welcome: "Привет! Давайте шаг за шагом оформим заявку на QA платежей.",
    help: "Команды:\n/start - новая заявка\n/status - статус последней заявки\n/cancel - отменить текущую заявку\n/lang - сменить язык\n\nВо время ответов: back, skip, confirm, edit, paid.",
    geo: "В какой стране или регионе проводить тесты?",
    method: "Какой платёжный метод тестировать? Один метод на заявку.",
    test_count: "Сколько тестов нужно? (1-25)",
    payout: "Нужна ли проверка вывода средств?",
    comments: "Есть комментарии или пожелания?",
    site_url: "Ссылка на сайт для тестирования (http:// или https://)",
    login: "Логин тестового аккаунта",
    password: "Пароль тестового аккаунта",
    choose_from: "Варианты",
    skip_hint: "Отправьте \"skip\", чтобы пропустить.",
    back_hint: "Отправьте \"back\", чтобы изменить предыдущий ответ.",
    invalid: "⚠️ {message}",
    could_not_verify: "Не удалось проверить ссылку на заявку. Откройте её с сайта ещё раз.",
    reference_expired: "Срок действия ссылки истёк. Заполним заявку здесь.",
    unreadable: "Не удалось распознать параметры заявки. Заполним заявку здесь.",
    prefilled: "Из конфигуратора загружено ответов: {count}.",
    resumed: "Продолжаем заявку #{id}.",
    confirm_title: "Проверьте заявку",
    confirm_hint: "Отправьте \"confirm\" для оформления, \"edit\" чтобы начать заново или \"back\" чтобы изменить последний ответ.",
    duplicate: "Эта заявка уже оформлена под номером #{id}.",
    submitted: "✅ Заявка #{id} создана.",
    payment: "Отправьте {total} через {network} на:\n{wallet}\nЗатем отправьте \"paid\" и приложите скриншот или TXID.\nВопросы? {contact}",
    payment_no_wallet: "Отправьте {total} через {network}. Адрес кошелька пришлёт {contact}.\nЗатем отправьте \"paid\" и приложите скриншот или TXID.",
    proof_requested: "Приложите скриншот или документ, либо отправьте TXID.",
    proof_received: "✅ Чек по заявке #{id} получен. Скоро проверим оплату.",
    cancelled: "Заявка #{id} отменена. Отправьте /start, чтобы начать заново.",
    already_submitted: "Заявка уже оформлена, отменить её нельзя.",
    nothing_to_cancel: "Отменять нечего.",
    order_closed: "Эту заявку больше нельзя изменить.",
    no_orders: "У вас ещё нет заявок.",
    last_order: "Ваша последняя заявка",
    language_changed: "Язык переключен на русский.",
    invalid_link: "Ссылка на заявку недействительна.",
    cannot_go_back: "Это первый вопрос.",
    no_session: "Отправьте /start, чтобы оформить заявку.",
    labels: Labels {
        order: "Заявка",
        status: "Статус",
        geo: "Страна/регион",
        method: "Метод оплаты",
        tests: "Количество тестов",
        payout: "Опция вывода/KYC",
        comments: "Комментарий",
        site: "Сайт",
        login: "Логин",
        password: "Пароль",
        base: "Базовая услуга",
        surcharge: "Услуги по выводу/KYC",
        total: "Итого",
        link: "Ссылка для продолжения",
    },
};

fn texts(language: Language) -> &'static Texts {
    match language {
        Language::En => &EN,
        Language::Ru => &RU,
    }
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{}}}", name), value)
    })
}

fn with_id(template: &str, id: u64) -> String {
    fill(template, &[("id", id.to_string().as_str())])
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("—")
}

fn step_question(t: &Texts, step: Step) -> &'static str {
    match step {
        Step::Geo => t.geo,
        Step::Method => t.method,
        Step::TestCount => t.test_count,
        Step::Payout => t.payout,
        Step::Comments => t.comments,
        Step::SiteUrl => t.site_url,
        Step::Login => t.login,
        Step::Password => t.password,
        Step::Confirm => t.confirm_hint,
        Step::Payment | Step::ProofOfPayment => t.proof_requested,
    }
}

fn summary(t: &Texts, order: &OrderSummary) -> String {
    let l = &t.labels;
    let geo = order.geo.as_deref().map(geo::format_country);
    let tests = order.test_count.map(|n| n.to_string());
    let mut lines = vec![
        format!("{} #{}", l.order, order.id),
        format!("{}: {}", l.status, order.status),
        format!("{}: {}", l.geo, or_dash(geo.as_deref())),
        format!("{}: {}", l.method, or_dash(order.payment_method.as_deref())),
        format!("{}: {}", l.tests, or_dash(tests.as_deref())),
        format!("{}: {}", l.payout, or_dash(order.payout_title.as_deref())),
        format!("{}: {}", l.comments, or_dash(order.comments.as_deref())),
        format!("{}: {}", l.site, or_dash(order.site_url.as_deref())),
        format!("{}: {}", l.login, order.login),
        format!("{}: {}", l.password, order.password),
    ];
    match (order.total, order.price) {
        (Some(total), _) => lines.push(format!("{}: {}", l.total, total)),
        (None, Some(price)) => {
            lines.push(format!("{}: {}", l.base, price.base_total));
            lines.push(format!("{}: {}", l.surcharge, price.surcharge));
            lines.push(format!("{}: {}", l.total, price.total));
        }
        (None, None) => {}
    }
    lines.push(format!("{}: /start {}", l.link, order.resume_link));
    lines.join("\n")
}

fn payment(t: &Texts, total: Money, network: &str, wallet: Option<&str>, contact: &str) -> String {
    let total = total.to_string();
    let total = total.as_str();
    match wallet {
        Some(wallet) => fill(
            t.payment,
            &[
                ("total", total),
                ("network", network),
                ("wallet", wallet),
                ("contact", contact),
            ],
        ),
        None => fill(
            t.payment_no_wallet,
            &[("total", total), ("network", network), ("contact", contact)],
        ),
    }
}

/// Renders one reply as message text.
pub fn render(reply: &Reply, language: Language) -> String {
    let t = texts(language);
    match reply {
        Reply::Welcome => t.welcome.to_string(),
        Reply::Help => t.help.to_string(),
        Reply::Prompt {
            step,
            choices,
            can_skip,
            can_go_back,
        } => {
            let mut text = step_question(t, *step).to_string();
            if !choices.is_empty() {
                text.push_str(&format!("\n{}: {}", t.choose_from, choices.join(" | ")));
            }
            if *can_skip {
                text.push('\n');
                text.push_str(t.skip_hint);
            }
            if *can_go_back {
                text.push('\n');
                text.push_str(t.back_hint);
            }
            text
        }
        Reply::Invalid { message, .. } => fill(t.invalid, &[("message", message.as_str())]),
        Reply::Payload(notice) => match notice {
            PayloadNotice::CouldNotVerify => t.could_not_verify.to_string(),
            PayloadNotice::ReferenceExpired => t.reference_expired.to_string(),
            PayloadNotice::Unreadable => t.unreadable.to_string(),
        },
        Reply::Prefilled { answered } => fill(t.prefilled, &[("count", answered.to_string().as_str())]),
        Reply::Resumed { order_id } => with_id(t.resumed, *order_id),
        Reply::Confirm(order) => format!(
            "{}\n\n{}\n\n{}",
            t.confirm_title,
            summary(t, order),
            t.confirm_hint
        ),
        Reply::Duplicate(order) => format!(
            "{}\n\n{}",
            with_id(t.duplicate, order.id),
            summary(t, order)
        ),
        Reply::Submitted(order) => format!(
            "{}\n\n{}",
            with_id(t.submitted, order.id),
            summary(t, order)
        ),
        Reply::PaymentDetails {
            total,
            network,
            wallet,
            help_contact,
            ..
        } => payment(t, *total, network, wallet.as_deref(), help_contact),
        Reply::ProofRequested => t.proof_requested.to_string(),
        Reply::ProofReceived { order_id } => {
            with_id(t.proof_received, *order_id)
        }
        Reply::Cancelled { order_id } => with_id(t.cancelled, *order_id),
        Reply::AlreadySubmitted(order) => {
            format!("{}\n\n{}", t.already_submitted, summary(t, order))
        }
        Reply::NothingToCancel => t.nothing_to_cancel.to_string(),
        Reply::OrderClosed(order) => format!("{}\n\n{}", t.order_closed, summary(t, order)),
        Reply::Status(None) => t.no_orders.to_string(),
        Reply::Status(Some(order)) => format!("{}\n\n{}", t.last_order, summary(t, order)),
        Reply::LanguageChanged(language) => texts(*language).language_changed.to_string(),
        Reply::InvalidLink => t.invalid_link.to_string(),
        Reply::CannotGoBack => t.cannot_go_back.to_string(),
        Reply::NoSession => t.no_session.to_string(),
    }
}
