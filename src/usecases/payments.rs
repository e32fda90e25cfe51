use std::{collections::HashMap, sync::Arc};

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use chrono::DateTime;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::users::UserEntity,
        repositories::users::UserRepository,
        value_objects::{
            payments::{
                CheckoutSessionDto, ConfigHealthDto, PortalSessionDto, PriceCheckDto,
                PricingPlanDto, SubscriptionDetailsDto, SyncOutcome, WebhookAck,
            },
            plans::{PlanTier, PriceMap},
        },
    },
    payments::{
        events::BillingEvent,
        stripe_client::{
            StripeCheckoutSession, StripeClient, StripeCustomer, StripeEvent, StripePrice,
            StripeSubscription,
        },
    },
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StripeGateway: Send + Sync {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription>;

    async fn retrieve_customer(&self, customer_id: &str) -> AnyResult<StripeCustomer>;

    async fn retrieve_price(&self, price_id: &str) -> AnyResult<StripePrice>;

    async fn create_customer(
        &self,
        email: &str,
        name: Option<String>,
        user_id: Uuid,
    ) -> AnyResult<String>;

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<String>;

    async fn create_portal_session(&self, customer_id: &str) -> AnyResult<String>;
}

#[async_trait]
impl StripeGateway for StripeClient {
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }

    async fn retrieve_subscription(&self, subscription_id: &str) -> AnyResult<StripeSubscription> {
        self.retrieve_subscription(subscription_id).await
    }

    async fn retrieve_customer(&self, customer_id: &str) -> AnyResult<StripeCustomer> {
        self.retrieve_customer(customer_id).await
    }

    async fn retrieve_price(&self, price_id: &str) -> AnyResult<StripePrice> {
        self.retrieve_price(price_id).await
    }

    async fn create_customer(
        &self,
        email: &str,
        name: Option<String>,
        user_id: Uuid,
    ) -> AnyResult<String> {
        self.create_customer(email, name, user_id).await
    }

    async fn create_checkout_session(
        &self,
        customer_id: &str,
        price_id: &str,
        metadata: HashMap<String, String>,
    ) -> AnyResult<String> {
        self.create_checkout_session(customer_id, price_id, metadata)
            .await
    }

    async fn create_portal_session(&self, customer_id: &str) -> AnyResult<String> {
        self.create_portal_session(customer_id).await
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("user not found")]
    UserNotFound,
    #[error("no Stripe customer for user")]
    CustomerNotFound,
    #[error("invalid webhook payload: {0}")]
    InvalidWebhook(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PaymentError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            PaymentError::UserNotFound => StatusCode::NOT_FOUND,
            PaymentError::CustomerNotFound | PaymentError::InvalidWebhook(_) => {
                StatusCode::BAD_REQUEST
            }
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, PaymentError>;

/// Keeps `User.plan` consistent with the state of the user's external
/// subscription, and exposes the checkout/portal surface around it.
pub struct PaymentUseCase<U, Stripe>
where
    U: UserRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    user_repo: Arc<U>,
    stripe_client: Arc<Stripe>,
    price_map: PriceMap,
}

impl<U, Stripe> PaymentUseCase<U, Stripe>
where
    U: UserRepository + Send + Sync + 'static,
    Stripe: StripeGateway + Send + Sync + 'static,
{
    pub fn new(user_repo: Arc<U>, stripe_client: Arc<Stripe>, price_map: PriceMap) -> Self {
        Self {
            user_repo,
            stripe_client,
            price_map,
        }
    }

    /// Maps a provider price id to a plan tier. Unknown ids downgrade to the
    /// free tier with a warning, never an error.
    fn plan_for_price(&self, price_id: &str) -> PlanTier {
        match self.price_map.plan_for_price(price_id) {
            Some(plan) => plan,
            None => {
                warn!(%price_id, "payments: unknown price id, falling back to free tier");
                PlanTier::Free
            }
        }
    }

    async fn find_user(&self, user_id: Uuid) -> UseCaseResult<UserEntity> {
        self.user_repo
            .find_by_user_id(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to load user");
                PaymentError::Internal(err)
            })?
            .ok_or(PaymentError::UserNotFound)
    }

    /// Verifies and dispatches a webhook delivery.
    ///
    /// Signature failures reject the request so the provider retries or
    /// alerts. Provider or store failures during dispatch propagate for the
    /// same reason. Event types outside the handled set are acknowledged
    /// without processing.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> UseCaseResult<WebhookAck> {
        let event = self
            .stripe_client
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "payments: stripe webhook signature verification failed");
                PaymentError::InvalidWebhook("signature verification failed".to_string())
            })?;

        info!(event_type = %event.type_, "payments: stripe webhook verified");

        let billing_event = BillingEvent::from_event(event).map_err(|err| {
            warn!(error = %err, "payments: stripe webhook payload is malformed");
            PaymentError::InvalidWebhook(err.to_string())
        })?;

        match billing_event {
            BillingEvent::CheckoutCompleted(session) => {
                self.handle_checkout_completed(session).await?;
            }
            BillingEvent::SubscriptionUpdated(subscription)
            | BillingEvent::SubscriptionDeleted(subscription) => {
                self.handle_subscription_changed(subscription).await?;
            }
            BillingEvent::Unhandled { event_type } => {
                debug!(%event_type, "payments: unhandled stripe event type");
            }
        }

        Ok(WebhookAck { received: true })
    }

    /// A completed checkout links the session's user to its new subscription.
    ///
    /// The plan is computed from the re-fetched subscription, not from the
    /// session snapshot, so redelivered or stale events converge on whatever
    /// the provider currently reports.
    async fn handle_checkout_completed(
        &self,
        session: StripeCheckoutSession,
    ) -> UseCaseResult<()> {
        let Some(user_id) = session
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("user_id"))
            .and_then(|value| Uuid::parse_str(value).ok())
        else {
            warn!(
                session_id = ?session.id,
                "payments: checkout session without user_id metadata, skipping"
            );
            return Ok(());
        };

        let Some(subscription_id) = session.subscription.clone() else {
            warn!(
                %user_id,
                session_id = ?session.id,
                "payments: checkout session without subscription reference, skipping"
            );
            return Ok(());
        };

        let subscription = self
            .stripe_client
            .retrieve_subscription(&subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %subscription_id,
                    error = ?err,
                    "payments: failed to retrieve subscription after checkout"
                );
                PaymentError::Internal(err)
            })?;

        let plan = match subscription.first_price_id() {
            Some(price_id) => self.plan_for_price(price_id),
            None => {
                warn!(
                    %user_id,
                    %subscription_id,
                    "payments: subscription has no line items, falling back to free tier"
                );
                PlanTier::Free
            }
        };

        self.user_repo
            .update_subscription(
                user_id,
                plan,
                session.customer.clone(),
                Some(subscription_id.clone()),
            )
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "payments: failed to persist checkout result");
                PaymentError::Internal(err)
            })?;

        info!(
            %user_id,
            plan = %plan,
            %subscription_id,
            "payments: checkout completed, user plan updated"
        );

        Ok(())
    }

    /// Reconciles a subscription update or deletion pushed by the provider.
    ///
    /// `canceled`/`unpaid` downgrade to free and clear the subscription
    /// reference; `active` recomputes the plan from the reported price id.
    /// Every other status is left untouched.
    async fn handle_subscription_changed(
        &self,
        subscription: StripeSubscription,
    ) -> UseCaseResult<()> {
        let Some(customer_id) = subscription.customer.clone() else {
            warn!(
                subscription_id = %subscription.id,
                "payments: subscription event without customer reference, skipping"
            );
            return Ok(());
        };

        let customer = self
            .stripe_client
            .retrieve_customer(&customer_id)
            .await
            .map_err(|err| {
                error!(
                    %customer_id,
                    error = ?err,
                    "payments: failed to retrieve customer for subscription event"
                );
                PaymentError::Internal(err)
            })?;

        if customer.deleted {
            info!(%customer_id, "payments: customer deleted at provider, skipping");
            return Ok(());
        }

        let Some(user_id) = customer
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("user_id"))
            .and_then(|value| Uuid::parse_str(value).ok())
        else {
            warn!(
                %customer_id,
                subscription_id = %subscription.id,
                "payments: customer without user_id metadata, skipping"
            );
            return Ok(());
        };

        info!(
            %user_id,
            subscription_id = %subscription.id,
            status = %subscription.status,
            "payments: processing subscription change"
        );

        match subscription.status.as_str() {
            "canceled" | "unpaid" => {
                self.user_repo
                    .update_subscription(user_id, PlanTier::Free, Some(customer.id), None)
                    .await
                    .map_err(|err| {
                        error!(%user_id, db_error = ?err, "payments: failed to persist downgrade");
                        PaymentError::Internal(err)
                    })?;
                info!(%user_id, "payments: user downgraded to free plan");
            }
            "active" => {
                if let Some(price_id) = subscription.first_price_id() {
                    let plan = self.plan_for_price(price_id);
                    self.user_repo
                        .update_subscription(
                            user_id,
                            plan,
                            Some(customer.id),
                            Some(subscription.id.clone()),
                        )
                        .await
                        .map_err(|err| {
                            error!(
                                %user_id,
                                db_error = ?err,
                                "payments: failed to persist plan change"
                            );
                            PaymentError::Internal(err)
                        })?;
                    info!(%user_id, plan = %plan, "payments: user plan updated");
                }
            }
            other => {
                // Statuses like past_due or trialing are intentionally not
                // reconciled here.
                debug!(
                    %user_id,
                    status = %other,
                    "payments: subscription status not reconciled"
                );
            }
        }

        Ok(())
    }

    /// Pull-based reconciliation triggered by the user.
    ///
    /// Provider failures are reported in the outcome payload rather than
    /// surfacing as errors.
    pub async fn sync_subscription(&self, user_id: Uuid) -> UseCaseResult<SyncOutcome> {
        let user = self.find_user(user_id).await?;
        let current_plan = PlanTier::from_str(&user.plan);

        let Some(subscription_id) = user.stripe_subscription_id.clone() else {
            info!(%user_id, "payments: no subscription reference, nothing to sync");
            return Ok(SyncOutcome {
                synced: false,
                message: "No active subscription to sync".to_string(),
                current_plan: Some(current_plan),
                ..Default::default()
            });
        };

        let subscription = match self
            .stripe_client
            .retrieve_subscription(&subscription_id)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(
                    %user_id,
                    %subscription_id,
                    error = ?err,
                    "payments: failed to retrieve subscription during sync"
                );
                return Ok(SyncOutcome {
                    synced: false,
                    message: "Failed to sync subscription".to_string(),
                    error: Some(err.to_string()),
                    ..Default::default()
                });
            }
        };

        let Some(price_id) = subscription.first_price_id() else {
            warn!(%user_id, %subscription_id, "payments: subscription has no line items");
            return Ok(SyncOutcome {
                synced: false,
                message: "Failed to sync subscription".to_string(),
                error: Some("subscription has no line items".to_string()),
                ..Default::default()
            });
        };

        let plan = self.plan_for_price(price_id);

        if current_plan != plan {
            self.user_repo
                .update_subscription(
                    user_id,
                    plan,
                    user.stripe_customer_id.clone(),
                    Some(subscription_id),
                )
                .await
                .map_err(|err| {
                    error!(%user_id, db_error = ?err, "payments: failed to persist synced plan");
                    PaymentError::Internal(err)
                })?;

            info!(
                %user_id,
                old_plan = %current_plan,
                new_plan = %plan,
                "payments: subscription synced, plan updated"
            );

            return Ok(SyncOutcome {
                synced: true,
                message: "Subscription synced successfully".to_string(),
                old_plan: Some(current_plan),
                new_plan: Some(plan),
                subscription_status: Some(subscription.status),
                ..Default::default()
            });
        }

        Ok(SyncOutcome {
            synced: false,
            message: "Subscription already up to date".to_string(),
            current_plan: Some(current_plan),
            subscription_status: Some(subscription.status),
            ..Default::default()
        })
    }

    /// Creates a subscription-mode checkout session, creating the Stripe
    /// customer on first use.
    pub async fn create_checkout_session(
        &self,
        user_id: Uuid,
        price_id: &str,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let user = self.find_user(user_id).await?;

        let customer_id = match user.stripe_customer_id.clone() {
            Some(customer_id) => customer_id,
            None => {
                let customer_id = self
                    .stripe_client
                    .create_customer(&user.email, user.name.clone(), user_id)
                    .await
                    .map_err(|err| {
                        error!(%user_id, error = ?err, "payments: failed to create stripe customer");
                        PaymentError::Internal(err)
                    })?;

                self.user_repo
                    .update_subscription(
                        user_id,
                        PlanTier::from_str(&user.plan),
                        Some(customer_id.clone()),
                        user.stripe_subscription_id.clone(),
                    )
                    .await
                    .map_err(|err| {
                        error!(
                            %user_id,
                            db_error = ?err,
                            "payments: failed to persist customer reference"
                        );
                        PaymentError::Internal(err)
                    })?;

                info!(%user_id, %customer_id, "payments: stripe customer created");
                customer_id
            }
        };

        let metadata = HashMap::from([("user_id".to_string(), user_id.to_string())]);

        let url = self
            .stripe_client
            .create_checkout_session(&customer_id, price_id, metadata)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %price_id,
                    %customer_id,
                    error = ?err,
                    "payments: stripe checkout session creation failed"
                );
                PaymentError::Internal(err)
            })?;

        info!(%user_id, %price_id, "payments: checkout session created");

        Ok(CheckoutSessionDto { url })
    }

    /// Creates a billing portal session for self-service management.
    pub async fn create_portal_session(&self, user_id: Uuid) -> UseCaseResult<PortalSessionDto> {
        let user = self.find_user(user_id).await?;

        let customer_id = user.stripe_customer_id.ok_or_else(|| {
            warn!(%user_id, "payments: portal session requested without stripe customer");
            PaymentError::CustomerNotFound
        })?;

        let url = self
            .stripe_client
            .create_portal_session(&customer_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %customer_id,
                    error = ?err,
                    "payments: stripe portal session creation failed"
                );
                PaymentError::Internal(err)
            })?;

        Ok(PortalSessionDto { url })
    }

    /// Reports the user's current plan and live subscription details.
    pub async fn get_subscription(&self, user_id: Uuid) -> UseCaseResult<SubscriptionDetailsDto> {
        let user = self.find_user(user_id).await?;
        let plan = PlanTier::from_str(&user.plan);

        let Some(subscription_id) = user.stripe_subscription_id.clone() else {
            return Ok(SubscriptionDetailsDto {
                plan,
                status: "active".to_string(),
                amount: None,
                next_billing_date: None,
                customer_id: user.stripe_customer_id,
            });
        };

        let subscription = self
            .stripe_client
            .retrieve_subscription(&subscription_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    %subscription_id,
                    error = ?err,
                    "payments: failed to retrieve subscription details"
                );
                PaymentError::Internal(err)
            })?;

        let amount = subscription
            .first_unit_amount()
            .map(|amount| amount as f64 / 100.0);
        let next_billing_date = subscription
            .current_period_end
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Ok(SubscriptionDetailsDto {
            plan,
            status: subscription.status,
            amount,
            next_billing_date,
            customer_id: user.stripe_customer_id,
        })
    }

    /// Static pricing catalog exposed to the marketing/pricing pages.
    pub fn list_pricing_plans(&self) -> Vec<PricingPlanDto> {
        vec![
            PricingPlanDto {
                name: "Free".to_string(),
                description: "Perfect for trying out NextPay".to_string(),
                price: "Free".to_string(),
                price_id: None,
                features: vec![
                    "1 user".to_string(),
                    "Basic features".to_string(),
                    "Community support".to_string(),
                    "1 GB storage".to_string(),
                    "Email support".to_string(),
                ],
                popular: false,
            },
            PricingPlanDto {
                name: "Pro".to_string(),
                description: "For growing businesses".to_string(),
                price: "$15".to_string(),
                price_id: Some(self.price_map.pro_price_id().to_string()),
                features: vec![
                    "10 users".to_string(),
                    "All features".to_string(),
                    "Priority support".to_string(),
                    "100 GB storage".to_string(),
                    "Advanced analytics".to_string(),
                    "API access".to_string(),
                ],
                popular: true,
            },
            PricingPlanDto {
                name: "Enterprise".to_string(),
                description: "For large organizations".to_string(),
                price: "$25".to_string(),
                price_id: Some(self.price_map.enterprise_price_id().to_string()),
                features: vec![
                    "Unlimited users".to_string(),
                    "All features".to_string(),
                    "24/7 phone support".to_string(),
                    "Unlimited storage".to_string(),
                    "Advanced analytics".to_string(),
                    "API access".to_string(),
                    "Custom integrations".to_string(),
                    "SLA guarantee".to_string(),
                ],
                popular: false,
            },
        ]
    }

    /// Checks each configured price id against the provider. Failures are
    /// captured per price, never fatal.
    pub async fn config_health(&self) -> ConfigHealthDto {
        let configured = [
            (PlanTier::Pro, self.price_map.pro_price_id().to_string()),
            (
                PlanTier::Enterprise,
                self.price_map.enterprise_price_id().to_string(),
            ),
        ];

        let mut price_checks = Vec::with_capacity(configured.len());
        for (plan, price_id) in configured {
            match self.stripe_client.retrieve_price(&price_id).await {
                Ok(price) => price_checks.push(PriceCheckDto {
                    plan,
                    price_id,
                    exists: true,
                    amount: price.unit_amount,
                    currency: price.currency,
                    active: price.active,
                    error: None,
                }),
                Err(err) => {
                    warn!(%price_id, error = ?err, "payments: configured price check failed");
                    price_checks.push(PriceCheckDto {
                        plan,
                        price_id,
                        exists: false,
                        amount: None,
                        currency: None,
                        active: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }

        ConfigHealthDto { price_checks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::users::MockUserRepository;
    use crate::payments::stripe_client::StripeEventData;
    use chrono::Utc;
    use mockall::predicate::eq;

    const PRICE_PRO: &str = "price_pro";
    const PRICE_ENTERPRISE: &str = "price_enterprise";

    fn price_map() -> PriceMap {
        PriceMap::new(PRICE_PRO.to_string(), PRICE_ENTERPRISE.to_string())
    }

    fn usecase(
        user_repo: MockUserRepository,
        stripe: MockStripeGateway,
    ) -> PaymentUseCase<MockUserRepository, MockStripeGateway> {
        PaymentUseCase::new(Arc::new(user_repo), Arc::new(stripe), price_map())
    }

    fn sample_user(
        user_id: Uuid,
        plan: &str,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> UserEntity {
        let now = Utc::now();
        UserEntity {
            id: user_id,
            email: "user@example.com".to_string(),
            name: Some("Test User".to_string()),
            google_id: None,
            plan: plan.to_string(),
            stripe_customer_id: customer_id.map(|value| value.to_string()),
            stripe_subscription_id: subscription_id.map(|value| value.to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_subscription(id: &str, status: &str, customer: &str, price_id: &str) -> StripeSubscription {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "status": status,
            "customer": customer,
            "current_period_end": 1717200000,
            "items": { "data": [ { "price": { "id": price_id, "unit_amount": 1500 } } ] }
        }))
        .unwrap()
    }

    fn sample_customer(id: &str, user_id: Option<Uuid>, deleted: bool) -> StripeCustomer {
        let metadata = user_id.map(|uid| serde_json::json!({ "user_id": uid.to_string() }));
        serde_json::from_value(serde_json::json!({
            "id": id,
            "deleted": deleted,
            "metadata": metadata
        }))
        .unwrap()
    }

    fn event(event_type: &str, object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            id: Some("evt_1".to_string()),
            type_: event_type.to_string(),
            created: Some(1614556800),
            data: StripeEventData { object },
        }
    }

    fn checkout_event(user_id: Uuid) -> StripeEvent {
        event(
            "checkout.session.completed",
            serde_json::json!({
                "id": "cs_1",
                "mode": "subscription",
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": user_id.to_string() }
            }),
        )
    }

    fn expect_verified(stripe: &mut MockStripeGateway, event: StripeEvent) {
        stripe
            .expect_verify_webhook_signature()
            .returning(move |_, _| Ok(event.clone()));
    }

    #[tokio::test]
    async fn checkout_completed_sets_mapped_plan_and_references() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(&mut stripe, checkout_event(user_id));
        stripe
            .expect_retrieve_subscription()
            .with(eq("sub_1"))
            .returning(|_| Ok(sample_subscription("sub_1", "active", "cus_1", PRICE_PRO)));

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Pro),
                eq(Some("cus_1".to_string())),
                eq(Some("sub_1".to_string())),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let ack = usecase(user_repo, stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn checkout_completed_with_unknown_price_falls_back_to_free() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(&mut stripe, checkout_event(user_id));
        stripe
            .expect_retrieve_subscription()
            .returning(|_| Ok(sample_subscription("sub_1", "active", "cus_1", "price_unknown")));

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Free),
                eq(Some("cus_1".to_string())),
                eq(Some("sub_1".to_string())),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let ack = usecase(user_repo, stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn checkout_completed_without_user_metadata_is_skipped() {
        let mut stripe = MockStripeGateway::new();
        expect_verified(
            &mut stripe,
            event(
                "checkout.session.completed",
                serde_json::json!({
                    "id": "cs_1",
                    "customer": "cus_1",
                    "subscription": "sub_1",
                    "metadata": {}
                }),
            ),
        );

        // No expectations on the repository: any write would panic the mock.
        let ack = usecase(MockUserRepository::new(), stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn subscription_canceled_downgrades_to_free_and_clears_reference() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(
            &mut stripe,
            event(
                "customer.subscription.updated",
                serde_json::json!({
                    "id": "sub_1",
                    "status": "canceled",
                    "customer": "cus_1",
                    "items": { "data": [ { "price": { "id": PRICE_PRO } } ] }
                }),
            ),
        );
        stripe
            .expect_retrieve_customer()
            .with(eq("cus_1"))
            .returning(move |_| Ok(sample_customer("cus_1", Some(user_id), false)));

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Free),
                eq(Some("cus_1".to_string())),
                eq(None::<String>),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let ack = usecase(user_repo, stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn subscription_unpaid_downgrades_to_free() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(
            &mut stripe,
            event(
                "customer.subscription.deleted",
                serde_json::json!({ "id": "sub_1", "status": "unpaid", "customer": "cus_1" }),
            ),
        );
        stripe
            .expect_retrieve_customer()
            .returning(move |_| Ok(sample_customer("cus_1", Some(user_id), false)));

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Free),
                eq(Some("cus_1".to_string())),
                eq(None::<String>),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        usecase(user_repo, stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscription_active_recomputes_plan_from_price() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(
            &mut stripe,
            event(
                "customer.subscription.updated",
                serde_json::json!({
                    "id": "sub_1",
                    "status": "active",
                    "customer": "cus_1",
                    "items": { "data": [ { "price": { "id": PRICE_ENTERPRISE } } ] }
                }),
            ),
        );
        stripe
            .expect_retrieve_customer()
            .returning(move |_| Ok(sample_customer("cus_1", Some(user_id), false)));

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Enterprise),
                eq(Some("cus_1".to_string())),
                eq(Some("sub_1".to_string())),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        usecase(user_repo, stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subscription_with_deleted_customer_is_skipped() {
        let mut stripe = MockStripeGateway::new();
        expect_verified(
            &mut stripe,
            event(
                "customer.subscription.updated",
                serde_json::json!({ "id": "sub_1", "status": "canceled", "customer": "cus_1" }),
            ),
        );
        stripe
            .expect_retrieve_customer()
            .returning(|_| Ok(sample_customer("cus_1", None, true)));

        let ack = usecase(MockUserRepository::new(), stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn subscription_with_unreconciled_status_is_left_untouched() {
        let user_id = Uuid::new_v4();

        for status in ["past_due", "trialing", "incomplete"] {
            let mut stripe = MockStripeGateway::new();
            expect_verified(
                &mut stripe,
                event(
                    "customer.subscription.updated",
                    serde_json::json!({
                        "id": "sub_1",
                        "status": status,
                        "customer": "cus_1",
                        "items": { "data": [ { "price": { "id": PRICE_PRO } } ] }
                    }),
                ),
            );
            stripe
                .expect_retrieve_customer()
                .returning(move |_| Ok(sample_customer("cus_1", Some(user_id), false)));

            let ack = usecase(MockUserRepository::new(), stripe)
                .handle_webhook(b"{}", "t=1,v1=sig")
                .await
                .unwrap();

            assert!(ack.received);
        }
    }

    #[tokio::test]
    async fn invalid_signature_rejects_without_mutation() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_verify_webhook_signature()
            .returning(|_, _| Err(anyhow::anyhow!("invalid webhook signature")));

        let result = usecase(MockUserRepository::new(), stripe)
            .handle_webhook(b"{}", "t=1,v1=bad")
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidWebhook(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged_without_mutation() {
        let mut stripe = MockStripeGateway::new();
        expect_verified(&mut stripe, event("invoice.paid", serde_json::json!({})));

        let ack = usecase(MockUserRepository::new(), stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await
            .unwrap();

        assert!(ack.received);
    }

    #[tokio::test]
    async fn provider_failure_during_dispatch_propagates_for_redelivery() {
        let user_id = Uuid::new_v4();

        let mut stripe = MockStripeGateway::new();
        expect_verified(&mut stripe, checkout_event(user_id));
        stripe
            .expect_retrieve_subscription()
            .returning(|_| Err(anyhow::anyhow!("stripe is down")));

        let result = usecase(MockUserRepository::new(), stripe)
            .handle_webhook(b"{}", "t=1,v1=sig")
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PaymentError::Internal(_)));
        assert_eq!(
            err.status_code(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn sync_without_subscription_reference_reports_nothing_to_sync() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_find_by_user_id()
            .with(eq(user_id))
            .returning(move |_| {
                Box::pin(async move { Ok(Some(sample_user(user_id, "free", None, None))) })
            });

        // No gateway expectations: the provider must not be contacted.
        let outcome = usecase(user_repo, MockStripeGateway::new())
            .sync_subscription(user_id)
            .await
            .unwrap();

        assert!(!outcome.synced);
        assert_eq!(outcome.current_plan, Some(PlanTier::Free));
        assert_eq!(outcome.message, "No active subscription to sync");
    }

    #[tokio::test]
    async fn sync_with_unchanged_plan_is_idempotent() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "pro", Some("cus_1"), Some("sub_1"))))
            })
        });

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_subscription()
            .with(eq("sub_1"))
            .returning(|_| Ok(sample_subscription("sub_1", "active", "cus_1", PRICE_PRO)));

        let outcome = usecase(user_repo, stripe)
            .sync_subscription(user_id)
            .await
            .unwrap();

        assert!(!outcome.synced);
        assert_eq!(outcome.message, "Subscription already up to date");
        assert_eq!(outcome.current_plan, Some(PlanTier::Pro));
        assert_eq!(outcome.subscription_status.as_deref(), Some("active"));
    }

    #[tokio::test]
    async fn sync_updates_plan_when_price_changed() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "pro", Some("cus_1"), Some("sub_1"))))
            })
        });
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Enterprise),
                eq(Some("cus_1".to_string())),
                eq(Some("sub_1".to_string())),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_subscription()
            .returning(|_| Ok(sample_subscription("sub_1", "active", "cus_1", PRICE_ENTERPRISE)));

        let outcome = usecase(user_repo, stripe)
            .sync_subscription(user_id)
            .await
            .unwrap();

        assert!(outcome.synced);
        assert_eq!(outcome.old_plan, Some(PlanTier::Pro));
        assert_eq!(outcome.new_plan, Some(PlanTier::Enterprise));
    }

    #[tokio::test]
    async fn sync_reports_provider_failure_structurally() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "pro", Some("cus_1"), Some("sub_1"))))
            })
        });

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_subscription()
            .returning(|_| Err(anyhow::anyhow!("stripe is down")));

        let outcome = usecase(user_repo, stripe)
            .sync_subscription(user_id)
            .await
            .unwrap();

        assert!(!outcome.synced);
        assert_eq!(outcome.message, "Failed to sync subscription");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn sync_for_missing_user_is_not_found() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo
            .expect_find_by_user_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let err = usecase(user_repo, MockStripeGateway::new())
            .sync_subscription(user_id)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::UserNotFound));
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn checkout_session_creates_customer_once_for_new_users() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move { Ok(Some(sample_user(user_id, "free", None, None))) })
        });
        user_repo
            .expect_update_subscription()
            .with(
                eq(user_id),
                eq(PlanTier::Free),
                eq(Some("cus_new".to_string())),
                eq(None::<String>),
            )
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_customer()
            .times(1)
            .returning(|_, _, _| Ok("cus_new".to_string()));
        stripe
            .expect_create_checkout_session()
            .with(eq("cus_new"), eq(PRICE_PRO), mockall::predicate::always())
            .returning(|_, _, _| Ok("https://checkout.stripe.com/c/pay/cs_1".to_string()));

        let session = usecase(user_repo, stripe)
            .create_checkout_session(user_id, PRICE_PRO)
            .await
            .unwrap();

        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_1");
    }

    #[tokio::test]
    async fn checkout_session_reuses_existing_customer() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "free", Some("cus_1"), None)))
            })
        });

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_create_checkout_session()
            .with(
                eq("cus_1"),
                eq(PRICE_ENTERPRISE),
                mockall::predicate::always(),
            )
            .returning(|_, _, _| Ok("https://checkout.stripe.com/c/pay/cs_2".to_string()));

        let session = usecase(user_repo, stripe)
            .create_checkout_session(user_id, PRICE_ENTERPRISE)
            .await
            .unwrap();

        assert_eq!(session.url, "https://checkout.stripe.com/c/pay/cs_2");
    }

    #[tokio::test]
    async fn portal_session_requires_an_existing_customer() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move { Ok(Some(sample_user(user_id, "free", None, None))) })
        });

        let err = usecase(user_repo, MockStripeGateway::new())
            .create_portal_session(user_id)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::CustomerNotFound));
    }

    #[tokio::test]
    async fn subscription_details_without_reference_report_stored_plan() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "free", Some("cus_1"), None)))
            })
        });

        let details = usecase(user_repo, MockStripeGateway::new())
            .get_subscription(user_id)
            .await
            .unwrap();

        assert_eq!(details.plan, PlanTier::Free);
        assert_eq!(details.status, "active");
        assert_eq!(details.amount, None);
    }

    #[tokio::test]
    async fn subscription_details_include_live_amount_and_period_end() {
        let user_id = Uuid::new_v4();

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_user_id().returning(move |_| {
            Box::pin(async move {
                Ok(Some(sample_user(user_id, "pro", Some("cus_1"), Some("sub_1"))))
            })
        });

        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_subscription()
            .returning(|_| Ok(sample_subscription("sub_1", "active", "cus_1", PRICE_PRO)));

        let details = usecase(user_repo, stripe)
            .get_subscription(user_id)
            .await
            .unwrap();

        assert_eq!(details.plan, PlanTier::Pro);
        assert_eq!(details.status, "active");
        assert_eq!(details.amount, Some(15.0));
        assert!(details.next_billing_date.is_some());
    }

    #[tokio::test]
    async fn config_health_captures_per_price_failures() {
        let mut stripe = MockStripeGateway::new();
        stripe
            .expect_retrieve_price()
            .with(eq(PRICE_PRO))
            .returning(|_| {
                Ok(serde_json::from_value(serde_json::json!({
                    "id": PRICE_PRO,
                    "unit_amount": 1500,
                    "currency": "usd",
                    "active": true
                }))
                .unwrap())
            });
        stripe
            .expect_retrieve_price()
            .with(eq(PRICE_ENTERPRISE))
            .returning(|_| Err(anyhow::anyhow!("no such price")));

        let health = usecase(MockUserRepository::new(), stripe)
            .config_health()
            .await;

        assert_eq!(health.price_checks.len(), 2);
        assert!(health.price_checks[0].exists);
        assert_eq!(health.price_checks[0].amount, Some(1500));
        assert!(!health.price_checks[1].exists);
        assert!(health.price_checks[1].error.is_some());
    }

    #[test]
    fn pricing_catalog_carries_configured_price_ids() {
        let plans =
            usecase(MockUserRepository::new(), MockStripeGateway::new()).list_pricing_plans();

        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].price_id, None);
        assert_eq!(plans[1].price_id.as_deref(), Some(PRICE_PRO));
        assert_eq!(plans[2].price_id.as_deref(), Some(PRICE_ENTERPRISE));
    }
}
