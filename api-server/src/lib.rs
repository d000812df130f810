#[macro_use]
extern crate rocket;

pub mod addresses;
pub mod auth;
pub mod db;
pub mod delivery;
pub mod error;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod state;
pub mod store;
pub mod threading;

use crate::auth::{AuthConfig, AuthState};
use crate::db::MailDb;
use crate::delivery::{DispatchConfig, HttpDispatcher};
use crate::request_logger::RequestLogger;
use crate::state::AppState;
use crate::store::{MailStore, PgStore};
use crate::threading::ThreadingConfig;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

fn cors_options() -> CorsOptions {
    CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Options]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
}

/// Every documented API route, mounted under `/api/v1`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        routes::health::health_check,
        // Messages
        routes::messages::ingest_message,
        routes::messages::get_message,
        routes::messages::list_message_deliveries,
        // Deliveries
        routes::deliveries::retry_delivery,
        // Threads
        routes::threads::list_threads,
        routes::threads::get_thread,
        routes::threads::get_thread_participants,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    rocket::build()
        .attach(RequestLogger)
        .attach(MailDb::init())
        .attach(AdHoc::try_on_ignite("CORS", |rocket| async move {
            match cors_options().to_cors() {
                Ok(cors) => Ok(rocket.attach(cors)),
                Err(e) => {
                    log::error!("invalid CORS configuration: {}", e);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match MailDb::fetch(&rocket) {
                    Some(db) => match store::postgres::run_migrations(db).await {
                        Ok(()) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    },
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ))
        .attach(AdHoc::try_on_ignite(
            "Application State",
            |rocket| async move {
                let pool = match MailDb::fetch(&rocket) {
                    Some(db) => (**db).clone(),
                    None => {
                        log::error!("database pool not available for application state");
                        return Err(rocket);
                    }
                };

                let auth_state = match AuthConfig::from_env().and_then(AuthState::from_config) {
                    Ok(state) => state,
                    Err(e) => {
                        log::error!("failed to initialize authentication: {}", e);
                        return Err(rocket);
                    }
                };

                let store: Arc<dyn MailStore> = Arc::new(PgStore::new(pool));
                let dispatch_config = DispatchConfig::from_env();
                if dispatch_config.relay.is_none() {
                    log::warn!("MAIL_RELAY_URL not set; email endpoints will fail to deliver");
                }
                let dispatcher = match HttpDispatcher::new(store.clone(), dispatch_config) {
                    Ok(dispatcher) => Arc::new(dispatcher),
                    Err(e) => {
                        log::error!("failed to initialize dispatcher: {}", e);
                        return Err(rocket);
                    }
                };

                let threading = ThreadingConfig::from_env();
                log::info!(
                    "threading: subject matching {}, window {} days",
                    if threading.subject_matching { "on" } else { "off" },
                    threading.subject_window.num_days()
                );

                Ok(rocket
                    .manage(AppState::new(store, dispatcher, threading))
                    .manage(auth_state))
            },
        ))
        .register("/", error::json_catchers())
        .mount("/api/v1", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Mailflow API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use uuid::Uuid;

    use crate::auth::{AuthConfig, AuthState, JwtService};
    use crate::delivery::{DispatchError, DispatchSummary, Dispatcher};
    use crate::models::DeliveryAttempt;
    use crate::state::AppState;
    use crate::store::{MailStore, MemoryStore};
    use crate::threading::ThreadingConfig;

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "mailflow-test-secret";

    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            issuer: "https://mailflow.test".into(),
            audience: "mailflow-api".into(),
            access_token_ttl_secs: 900,
            jwt_secret: TEST_JWT_SECRET.into(),
            jwt_kid: None,
        }
    }

    pub fn test_auth_state() -> AuthState {
        let config = test_auth_config();
        let jwt = JwtService::from_config(&config).expect("test jwt service");
        AuthState::new(config, jwt)
    }

    /// `Authorization` header carrying a fresh token for `user_id`.
    pub fn bearer_header(user_id: i32, email: &str, token_version: i32) -> Header<'static> {
        let token = test_auth_state()
            .jwt_service
            .issue_access_token(user_id, email, token_version)
            .expect("issue test token");
        Header::new("Authorization", format!("Bearer {}", token.token))
    }

    /// Dispatcher with a canned outcome that remembers what it was asked to send.
    #[derive(Default)]
    pub struct StubDispatcher {
        failure: Option<String>,
        deliveries: Vec<DeliveryAttempt>,
        calls: Mutex<Vec<(i32, Uuid, Uuid)>>,
    }

    impl StubDispatcher {
        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn failing(reason: &str) -> Self {
            Self {
                failure: Some(reason.to_string()),
                ..Self::default()
            }
        }

        /// Deliveries reported back on success.
        pub fn with_deliveries(mut self, deliveries: Vec<DeliveryAttempt>) -> Self {
            self.deliveries = deliveries;
            self
        }

        /// `(user_id, message_id, endpoint_id)` per dispatch, in call order.
        pub fn calls(&self) -> Vec<(i32, Uuid, Uuid)> {
            self.calls.lock().clone()
        }
    }

    #[rocket::async_trait]
    impl Dispatcher for StubDispatcher {
        async fn dispatch(
            &self,
            user_id: i32,
            message_id: Uuid,
            endpoint_id: Uuid,
        ) -> Result<DispatchSummary, DispatchError> {
            self.calls.lock().push((user_id, message_id, endpoint_id));
            match &self.failure {
                Some(reason) => Err(DispatchError::Delivery {
                    endpoint_id,
                    reason: reason.clone(),
                }),
                None => Ok(DispatchSummary {
                    deliveries: self.deliveries.clone(),
                }),
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        store: Arc<MemoryStore>,
        dispatcher: Arc<dyn Dispatcher>,
        threading: ThreadingConfig,
    }

    impl Default for TestRocketBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled,
        /// an empty in-memory store and a dispatcher that always succeeds.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                store: Arc::new(MemoryStore::new()),
                dispatcher: Arc::new(StubDispatcher::succeeding()),
                threading: ThreadingConfig::default(),
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn with_store(mut self, store: Arc<MemoryStore>) -> Self {
            self.store = store;
            self
        }

        pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
            self.dispatcher = dispatcher;
            self
        }

        pub fn with_threading(mut self, threading: ThreadingConfig) -> Self {
            self.threading = threading;
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let store: Arc<dyn MailStore> = self.store;
            let mut rocket = rocket::custom(self.figment)
                .manage(AppState::new(store, self.dispatcher, self.threading))
                .manage(test_auth_state())
                .register("/", crate::error::json_catchers());

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use uuid::Uuid;

        use crate::store::postgres::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("TEST_DATABASE_URL not set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database for integration tests.
        ///
        /// Uses the server at `TEST_DATABASE_URL` when set. With
        /// `MAILFLOW_TEST_CONTAINERS=1` a disposable Postgres container is started
        /// instead. Otherwise construction fails with [`TestDatabaseError::MissingUrl`]
        /// and callers skip.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::provision(&url, None).await;
                }

                let containers_enabled = std::env::var("MAILFLOW_TEST_CONTAINERS")
                    .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false);
                if !containers_enabled {
                    return Err(TestDatabaseError::MissingUrl);
                }

                let container = Postgres::default().start().await?;
                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                Self::provision(&url, Some(container)).await
            }

            async fn provision(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse()?;
                let base_options = base_options.log_statements(LevelFilter::Off);
                let admin_options = base_options.clone().database("postgres");

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await?;

                let database_name = format!("mailflow_test_{}", Uuid::new_v4().simple());
                sqlx::query(&format!("CREATE DATABASE \"{}\"", database_name))
                    .execute(&admin_pool)
                    .await?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests.
            pub fn pool_clone(&self) -> PgPool {
                self.pool.clone().expect("test database pool is available")
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(self.admin_options.clone())
                    .await?;
                sqlx::query(&format!(
                    "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                    self.database_name
                ))
                .execute(&admin_pool)
                .await?;

                drop(self.container.take());
                Ok(())
            }
        }
    }
}
