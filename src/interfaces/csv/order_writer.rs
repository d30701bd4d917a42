use crate::domain::order::Order;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// Header row, in `OrderRow` field order.
const COLUMNS: [&str; 22] = [
    "id",
    "status",
    "origin",
    "chat_user_id",
    "email",
    "username",
    "geo",
    "payment_method",
    "test_count",
    "payout",
    "withdraw_required",
    "kyc_required",
    "custom_test_required",
    "comments",
    "site_url",
    "price",
    "payment_network",
    "payment_wallet",
    "payment_txid",
    "proof_ref",
    "created_at",
    "updated_at",
];

/// One exported order. Credentials never leave the store through this path.
#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    id: u64,
    status: &'a str,
    origin: &'a str,
    chat_user_id: Option<i64>,
    email: Option<&'a str>,
    username: Option<&'a str>,
    geo: Option<&'a str>,
    payment_method: Option<&'a str>,
    test_count: Option<u32>,
    payout: Option<&'a str>,
    withdraw_required: bool,
    kyc_required: bool,
    custom_test_required: bool,
    comments: Option<&'a str>,
    site_url: Option<&'a str>,
    price: Option<String>,
    payment_network: Option<&'a str>,
    payment_wallet: Option<&'a str>,
    payment_txid: Option<&'a str>,
    proof_ref: Option<&'a str>,
    created_at: String,
    updated_at: String,
}

impl<'a> From<&'a Order> for OrderRow<'a> {
    fn from(order: &'a Order) -> Self {
        Self {
            id: order.id,
            status: order.status.as_str(),
            origin: match order.origin {
                crate::domain::order::Origin::Chat => "chat",
                crate::domain::order::Origin::WebConfigurator => "web-configurator",
            },
            chat_user_id: order.identity.chat_user_id,
            email: order.identity.email.as_deref(),
            username: order.identity.username.as_deref(),
            geo: order.geo.as_deref(),
            payment_method: order.payment_method.as_deref(),
            test_count: order.test_count,
            payout: order.payout.map(|p| p.key()),
            withdraw_required: order.withdraw_required,
            kyc_required: order.kyc_required,
            custom_test_required: order.custom_test_required,
            comments: order.comments.as_option().map(String::as_str),
            site_url: order.site_url.as_option().map(String::as_str),
            price: order.price.map(|p| p.value().normalize().to_string()),
            payment_network: order.payment.network.as_deref(),
            payment_wallet: order.payment.wallet.as_deref(),
            payment_txid: order.payment.txid.as_deref(),
            proof_ref: order.payment.proof_ref.as_deref(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

/// Writes orders as CSV with a header row.
///
/// Wraps `csv::Writer`; rows are flushed when `finish` is called. The header is
/// written even when there are no orders.
pub struct OrderWriter<W: Write> {
    writer: csv::Writer<W>,
    header_written: bool,
}

impl<W: Write> OrderWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
            header_written: false,
        }
    }

    fn write_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.writer.write_record(COLUMNS)?;
            self.header_written = true;
        }
        Ok(())
    }

    pub fn write_orders<'a>(&mut self, orders: impl IntoIterator<Item = &'a Order>) -> Result<usize> {
        self.write_header()?;
        let mut written = 0;
        for order in orders {
            self.writer.serialize(OrderRow::from(order))?;
            written += 1;
        }
        Ok(written)
    }

    pub fn finish(mut self) -> Result<()> {
        self.write_header()?;
        self.writer.flush()?;
        Ok(())
    }
}
