use loyalty_common::eventqueue::ChangeEvent;
use loyalty_common::records::{VisitRecord, CUSTOMERS};
use loyalty_common::store::FieldSet;
use serde_json::Value;
use tracing::{debug, info};

use super::{mark_event_processed, HandlerContext, Outcome};
use crate::error::HandlerError;

/// React to a "visit recorded" event: bump the owning customer's visit
/// count, stamp the visit time, and award a milestone bonus when the new
/// count hits a threshold.
pub async fn on_visit_recorded(
    context: &HandlerContext,
    event: &ChangeEvent,
) -> Result<Outcome, HandlerError> {
    let visit: VisitRecord = serde_json::from_value(event.payload.0.clone())?;

    // A visit referencing a customer we do not know is a no-op, not an
    // error: the write path owns referential integrity. No dedup marker is
    // written either, so a redelivery after the customer appears still
    // applies.
    let Some(document) = context.store.get(CUSTOMERS, &visit.customer_id).await? else {
        debug!(
            customer = %visit.customer_id,
            "visit references an unknown customer, skipping"
        );
        return Ok(Outcome::CustomerMissing);
    };

    if !mark_event_processed(context, event).await? {
        return Ok(Outcome::Duplicate);
    }

    // The milestone is evaluated against the post-increment count computed
    // from this point-in-time read, not against the atomic increment below.
    // Two *distinct* concurrent visits can read the same count and both
    // match the same milestone; the dedup marker only covers redelivery of
    // one event. Known race, kept on purpose.
    let visit_count = document
        .get("visitCount")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let new_visit_count = visit_count + 1;
    let milestone = context.milestones.for_visit_count(new_visit_count);

    context
        .store
        .increment(CUSTOMERS, &visit.customer_id, "visitCount", 1)
        .await?;

    let mut fields = FieldSet::new().server_timestamp("lastVisitAt");
    if let Some(milestone) = milestone {
        fields = fields
            .set("milestoneAchieved", milestone.label.as_str())
            .server_timestamp("milestoneDate");
    }
    context
        .store
        .update(CUSTOMERS, &visit.customer_id, fields)
        .await?;

    if let Some(milestone) = milestone {
        if milestone.bonus_points > 0 {
            context
                .store
                .increment(CUSTOMERS, &visit.customer_id, "points", milestone.bonus_points)
                .await?;

            info!(
                customer = %visit.customer_id,
                milestone = %milestone.label,
                bonus = milestone.bonus_points,
                "milestone bonus awarded"
            );
        }
    }

    debug!(
        customer = %visit.customer_id,
        visit_count = new_visit_count,
        "visit aggregated"
    );

    Ok(Outcome::Applied)
}
