use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    config::config_model::DotEnvyConfig,
    domain::{
        repositories::users::UserRepository,
        value_objects::{
            payments::{
                CheckoutSessionDto, ConfigHealthDto, CreateCheckoutModel, PortalSessionDto,
                PricingPlanDto, SubscriptionDetailsDto, SyncOutcome, WebhookAck,
            },
            plans::PriceMap,
        },
    },
    infrastructure::postgres::{
        postgres_connection::PgPoolSquad, repositories::users::UserPostgres,
    },
    payments::stripe_client::StripeClient,
    usecases::payments::{PaymentError, PaymentUseCase, StripeGateway},
};

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let stripe_client = StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        format!(
            "{}/dashboard/billing?success=true",
            config.stripe.frontend_url
        ),
        format!("{}/pricing?canceled=true", config.stripe.frontend_url),
        format!("{}/dashboard/billing", config.stripe.frontend_url),
    );
    let price_map = PriceMap::new(
        config.stripe.price_pro.clone(),
        config.stripe.price_enterprise.clone(),
    );
    let payment_usecase = PaymentUseCase::new(
        Arc::new(user_repository),
        Arc::new(stripe_client),
        price_map,
    );

    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/plans", get(list_pricing_plans))
        .route("/config-check", get(config_health))
        .route("/:user_id/sync", post(sync_subscription))
        .route("/:user_id/checkout", post(create_checkout_session))
        .route("/:user_id/portal", post(create_portal_session))
        .route("/:user_id/subscription", get(get_subscription))
        .with_state(Arc::new(payment_usecase))
}

pub async fn handle_webhook<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<Json<WebhookAck>, PaymentError>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let signature = headers
        .get("stripe-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| PaymentError::InvalidWebhook("missing stripe-signature header".to_string()))?;

    let ack = payment_usecase.handle_webhook(&payload, signature).await?;
    Ok(Json(ack))
}

pub async fn sync_subscription<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SyncOutcome>, PaymentError>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let outcome = payment_usecase.sync_subscription(user_id).await?;
    Ok(Json(outcome))
}

pub async fn create_checkout_session<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
    Path(user_id): Path<Uuid>,
    Json(create_checkout_model): Json<CreateCheckoutModel>,
) -> Result<Json<CheckoutSessionDto>, PaymentError>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let session = payment_usecase
        .create_checkout_session(user_id, &create_checkout_model.price_id)
        .await?;
    Ok(Json(session))
}

pub async fn create_portal_session<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PortalSessionDto>, PaymentError>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let session = payment_usecase.create_portal_session(user_id).await?;
    Ok(Json(session))
}

pub async fn get_subscription<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<SubscriptionDetailsDto>, PaymentError>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    let details = payment_usecase.get_subscription(user_id).await?;
    Ok(Json(details))
}

pub async fn list_pricing_plans<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
) -> Json<Vec<PricingPlanDto>>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    Json(payment_usecase.list_pricing_plans())
}

pub async fn config_health<U, S>(
    State(payment_usecase): State<Arc<PaymentUseCase<U, S>>>,
) -> Json<ConfigHealthDto>
where
    U: UserRepository + Send + Sync + 'static,
    S: StripeGateway + Send + Sync + 'static,
{
    Json(payment_usecase.config_health().await)
}
