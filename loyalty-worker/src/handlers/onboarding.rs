use loyalty_common::eventqueue::ChangeEvent;
use loyalty_common::records::{CustomerRecord, LoyaltyTier, CUSTOMERS, SHOPS};
use loyalty_common::store::FieldSet;
use tracing::debug;

use super::{mark_event_processed, HandlerContext, Outcome};
use crate::error::HandlerError;

/// Points granted to every newly onboarded customer.
pub const WELCOME_BONUS_POINTS: i64 = 10;

/// React to a "customer created" event: assign the default tier and welcome
/// bonus to the new record, mark it active, and count it on its owner.
///
/// Partial completion is possible: if the owner update fails after the
/// customer defaults were written, the error is reported and the event ends
/// there, nothing is rolled back.
pub async fn on_customer_created(
    context: &HandlerContext,
    event: &ChangeEvent,
) -> Result<Outcome, HandlerError> {
    let customer: CustomerRecord = serde_json::from_value(event.payload.0.clone())?;

    if !mark_event_processed(context, event).await? {
        return Ok(Outcome::Duplicate);
    }

    // Per-field guard: a redelivery that slipped past the marker re-runs
    // this merge without clobbering what the first delivery wrote. The
    // creation timestamp is immutable once set for the same reason.
    context
        .store
        .set_missing(
            CUSTOMERS,
            &event.entity_id,
            FieldSet::new()
                .set("loyaltyTier", LoyaltyTier::Bronze.as_str())
                .set("welcomeBonus", WELCOME_BONUS_POINTS)
                .set("isActive", true)
                .server_timestamp("accountCreatedAt"),
        )
        .await?;

    debug!(
        customer = %event.entity_id,
        "assigned default tier and welcome bonus"
    );

    if let Some(shop_owner_id) = customer.shop_owner_id {
        // Atomic increment, never read-modify-write: concurrent onboardings
        // under the same owner must not lose counts.
        context
            .store
            .increment(SHOPS, &shop_owner_id, "totalCustomers", 1)
            .await?;
        context
            .store
            .update(
                SHOPS,
                &shop_owner_id,
                FieldSet::new().server_timestamp("lastCustomerAddedAt"),
            )
            .await?;

        debug!(shop = %shop_owner_id, "incremented owner customer count");
    }

    Ok(Outcome::Applied)
}
