use crate::config::{Config, StorageBackend};
use crate::handlers::{self, coupons, payments, plans, subscriptions};
use crate::services::payments::CheckoutSettings;
use crate::services::{
    init_metrics, CouponEvaluator, MemoryStore, MongoStore, PaymentGateway, PaymentLifecycle,
    Repositories, SindipayClient, SubscriptionActivator,
};
use axum::middleware::from_fn;
use axum::{
    routing::{get, post, put},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware, REQUEST_ID_HEADER};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub coupons: CouponEvaluator,
    pub subscriptions: SubscriptionActivator,
    pub payments: PaymentLifecycle,
}

impl AppState {
    /// Wire the domain services over `repos` and `gateway`.
    pub fn new(config: Config, repos: Repositories, gateway: Arc<dyn PaymentGateway>) -> Self {
        let coupons = CouponEvaluator::new(repos.coupons.clone());
        let subscriptions =
            SubscriptionActivator::new(repos.subscriptions.clone(), repos.plans.clone());
        let payments = PaymentLifecycle::new(
            repos.payments.clone(),
            coupons.clone(),
            subscriptions.clone(),
            gateway,
            CheckoutSettings {
                currency: config.gateway.currency.clone(),
                locale: config.gateway.locale.clone(),
                default_callback_url: config.urls.default_callback_url(),
                default_webhook_url: config.urls.default_webhook_url(),
                webhook_secret: config.gateway.webhook_secret.clone(),
            },
        );

        Self {
            config,
            repos,
            coupons,
            subscriptions,
            payments,
        }
    }
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    /// Connect storage and the gateway described by `config`, then bind.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let repos = match config.database.backend {
            StorageBackend::Mongo => {
                let mut client_options =
                    ClientOptions::parse(config.database.url.expose_secret()).await?;
                client_options.app_name = Some(config.service_name.clone());

                let client = Client::with_options(client_options)?;
                let store = MongoStore::new(&client.database(&config.database.db_name));
                store.init_indexes().await.map_err(|e| {
                    tracing::error!("Failed to initialize database indexes: {}", e);
                    AppError::DatabaseError(e)
                })?;
                Repositories::from_store(store)
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage, data is lost on restart");
                Repositories::from_store(MemoryStore::new())
            }
        };

        let gateway = SindipayClient::new(&config.gateway).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("Failed to build gateway client: {}", e))
        })?;
        if gateway.is_configured() {
            tracing::info!(base_url = %config.gateway.base_url, "Payment gateway configured");
        } else {
            tracing::warn!("Payment gateway API key not configured - payments will fail");
        }

        Self::build_with(config, repos, Arc::new(gateway)).await
    }

    /// Build around existing storage and gateway.
    pub async fn build_with(
        config: Config,
        repos: Repositories,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, AppError> {
        init_metrics();

        let state = AppState::new(config.clone(), repos, gateway);
        let app = router(state.clone());

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Plans
        .route("/plans", get(plans::list_plans).post(plans::create_plan))
        .route(
            "/plans/:id",
            get(plans::get_plan)
                .put(plans::update_plan)
                .delete(plans::delete_plan),
        )
        // Coupons
        .route("/coupons/validate", post(coupons::validate_coupon))
        .route(
            "/coupons",
            get(coupons::list_coupons).post(coupons::create_coupon),
        )
        .route(
            "/coupons/:id",
            get(coupons::get_coupon)
                .put(coupons::update_coupon)
                .delete(coupons::delete_coupon),
        )
        // Subscriptions
        .route(
            "/subscriptions/my-subscription",
            get(subscriptions::my_subscription),
        )
        .route(
            "/subscriptions/my-subscriptions",
            get(subscriptions::my_subscriptions),
        )
        .route("/subscriptions/subscribe", post(subscriptions::subscribe))
        .route("/subscriptions/renew", post(subscriptions::renew))
        .route("/subscriptions/assign", post(subscriptions::assign))
        .route(
            "/subscriptions/user/:user_id",
            get(subscriptions::user_subscriptions).delete(subscriptions::remove_user_subscriptions),
        )
        .route(
            "/subscriptions/subscription/:id",
            put(subscriptions::update_subscription).delete(subscriptions::remove_subscription),
        )
        // Payments
        .route("/payments/create", post(payments::create_payment))
        .route("/payments/status/:identifier", get(payments::payment_status))
        .route(
            "/payments/callback-status/:identifier",
            get(payments::callback_status),
        )
        .route("/payments/my-payments", get(payments::my_payments))
        .route("/payments/webhook", post(payments::webhook))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
