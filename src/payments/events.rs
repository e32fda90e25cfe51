use anyhow::{Context, Result};

use crate::payments::stripe_client::{StripeCheckoutSession, StripeEvent, StripeSubscription};

/// Verified provider events, discriminated by the event's `type` field.
///
/// Only the types the reconciler acts on get a typed payload; everything else
/// lands in `Unhandled` and is acknowledged without processing.
#[derive(Debug)]
pub enum BillingEvent {
    CheckoutCompleted(StripeCheckoutSession),
    SubscriptionUpdated(StripeSubscription),
    SubscriptionDeleted(StripeSubscription),
    Unhandled { event_type: String },
}

impl BillingEvent {
    pub fn from_event(event: StripeEvent) -> Result<Self> {
        match event.type_.as_str() {
            "checkout.session.completed" => {
                let session = serde_json::from_value(event.data.object)
                    .context("checkout session payload is malformed")?;
                Ok(BillingEvent::CheckoutCompleted(session))
            }
            "customer.subscription.updated" => {
                let subscription = serde_json::from_value(event.data.object)
                    .context("subscription payload is malformed")?;
                Ok(BillingEvent::SubscriptionUpdated(subscription))
            }
            "customer.subscription.deleted" => {
                let subscription = serde_json::from_value(event.data.object)
                    .context("subscription payload is malformed")?;
                Ok(BillingEvent::SubscriptionDeleted(subscription))
            }
            _ => Ok(BillingEvent::Unhandled {
                event_type: event.type_,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1614556800,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn checkout_completed_carries_the_session() {
        let parsed = BillingEvent::from_event(event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": "8aa7e3f5-5f12-4916-9ef5-0ae858f4f4cd" }
            }),
        ))
        .unwrap();

        match parsed {
            BillingEvent::CheckoutCompleted(session) => {
                assert_eq!(session.subscription.as_deref(), Some("sub_1"));
                assert_eq!(session.customer.as_deref(), Some("cus_1"));
            }
            other => panic!("expected CheckoutCompleted, got {:?}", other),
        }
    }

    #[test]
    fn subscription_updated_and_deleted_carry_the_subscription() {
        for event_type in ["customer.subscription.updated", "customer.subscription.deleted"] {
            let parsed = BillingEvent::from_event(event(
                event_type,
                serde_json::json!({ "id": "sub_1", "status": "canceled", "customer": "cus_1" }),
            ))
            .unwrap();

            assert!(matches!(
                parsed,
                BillingEvent::SubscriptionUpdated(_) | BillingEvent::SubscriptionDeleted(_)
            ));
        }
    }

    #[test]
    fn unknown_event_types_are_unhandled_not_errors() {
        let parsed =
            BillingEvent::from_event(event("invoice.paid", serde_json::json!({}))).unwrap();

        match parsed {
            BillingEvent::Unhandled { event_type } => assert_eq!(event_type, "invoice.paid"),
            other => panic!("expected Unhandled, got {:?}", other),
        }
    }

    #[test]
    fn malformed_payload_for_handled_type_is_an_error() {
        let result = BillingEvent::from_event(event(
            "customer.subscription.updated",
            serde_json::json!("not-an-object"),
        ));

        assert!(result.is_err());
    }
}
