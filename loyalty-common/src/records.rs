use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection names in the aggregate store.
pub const CUSTOMERS: &str = "customers";
pub const VISITS: &str = "visits";
pub const SHOPS: &str = "shops";
pub const PROCESSED_EVENTS: &str = "processed_events";

/// Loyalty tiers, lowest first. New customers start at Bronze.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoyaltyTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoyaltyTier::Bronze => "Bronze",
            LoyaltyTier::Silver => "Silver",
            LoyaltyTier::Gold => "Gold",
            LoyaltyTier::Platinum => "Platinum",
        }
    }
}

/// A customer document, as stored and as delivered in "customer created"
/// event payloads. Aggregation only ever adds to `points` and `visit_count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomerRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shop_owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loyalty_tier: Option<LoyaltyTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub welcome_bonus: Option<i64>,
    pub points: i64,
    pub visit_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_visit_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_achieved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone_date: Option<DateTime<Utc>>,
}

/// A visit document. Immutable once created; it is the event payload for
/// "visit recorded" events, never mutated by handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub customer_id: String,
    #[serde(default)]
    pub points_earned: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The owner aggregate a customer belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShopRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub total_customers: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_customer_added_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::from_document;

    #[test]
    fn customer_record_reads_camel_case_documents() {
        let document = json!({
            "name": "Ada",
            "shopOwnerId": "shop-1",
            "loyaltyTier": "Bronze",
            "welcomeBonus": 10,
            "visitCount": 4,
            "isActive": true,
        });
        let serde_json::Value::Object(document) = document else {
            unreachable!()
        };

        let customer: CustomerRecord = from_document(document).unwrap();
        assert_eq!(customer.shop_owner_id.as_deref(), Some("shop-1"));
        assert_eq!(customer.loyalty_tier, Some(LoyaltyTier::Bronze));
        assert_eq!(customer.welcome_bonus, Some(10));
        assert_eq!(customer.visit_count, 4);
        assert_eq!(customer.points, 0);
    }

    #[test]
    fn visit_record_requires_a_customer_reference() {
        let missing: Result<VisitRecord, _> = serde_json::from_value(json!({ "pointsEarned": 5 }));
        assert!(missing.is_err());

        let visit: VisitRecord =
            serde_json::from_value(json!({ "customerId": "c-1", "pointsEarned": 5 })).unwrap();
        assert_eq!(visit.customer_id, "c-1");
        assert_eq!(visit.points_earned, 5);
    }
}
