//! Turning decoded configurator fields into an order patch.

use crate::domain::order::{OrderPatch, Slot};
use crate::domain::ports::CredentialCipher;
use crate::domain::workflow::{Step, StepContext, validate_text};
use crate::error::Result;
use crate::interfaces::payload::DecodedFields;
use tracing::debug;

fn accept(step: Step, value: Option<&str>, geo: Option<&str>, ctx: &StepContext<'_>) -> Option<OrderPatch> {
    let value = value?;
    match validate_text(step, value, geo, ctx) {
        Ok(patch) => Some(patch),
        Err(e) => {
            debug!(step = ?step, error = %e, "dropping prefilled field");
            None
        }
    }
}

/// Builds the patch for a payload-seeded draft.
///
/// Text fields pass the same validation as typed answers. Invalid ones are
/// dropped and asked for later, and a payment method is only kept when its
/// region was accepted.
pub fn seed_patch(fields: &DecodedFields, ctx: &StepContext<'_>) -> OrderPatch {
    let mut patch = OrderPatch {
        test_count: fields.test_count,
        payout: fields.payout,
        custom_test_required: fields.custom_test_required,
        package_type: fields.package_type.clone(),
        ..Default::default()
    };
    patch.geo = accept(Step::Geo, fields.geo.as_deref(), None, ctx).and_then(|p| p.geo);
    if fields.geo.is_none() || patch.geo.is_some() {
        patch.payment_method = accept(
            Step::Method,
            fields.payment_method.as_deref(),
            patch.geo.as_deref(),
            ctx,
        )
        .and_then(|p| p.payment_method);
    }
    if let Some(p) = accept(Step::Comments, fields.comments.as_deref(), None, ctx) {
        patch.comments = p.comments;
    }
    if let Some(p) = accept(Step::SiteUrl, fields.site_url.as_deref(), None, ctx) {
        patch.site_url = p.site_url;
    }
    if let Some(p) = accept(Step::Login, fields.login.as_deref(), None, ctx) {
        patch.login = p.login;
    }
    if let Some(p) = accept(Step::Password, fields.password.as_deref(), None, ctx) {
        patch.password = p.password;
    }
    patch
}

/// Replaces plain login and password values with their encrypted form.
pub fn seal_credentials(patch: &mut OrderPatch, cipher: &dyn CredentialCipher) -> Result<()> {
    for slot in [&mut patch.login, &mut patch.password] {
        if let Slot::Set(plain) = slot {
            *plain = cipher.encrypt(plain)?;
        }
    }
    Ok(())
}
