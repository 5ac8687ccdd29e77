//! PostgreSQL fixtures for cadence integration tests.
//!
//! All tests in a binary share one server. Each test gets a private,
//! migrated database through [`TestDb::create`].
//!
//! The server is either the one named by `CADENCE_TEST_PG_URL` (a server
//! root URL without a database name) or a container started on first use.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use cadence_db::pool;

/// Environment variable naming an already-running server.
pub const PG_URL_ENV: &str = "CADENCE_TEST_PG_URL";

const DB_PREFIX: &str = "cadence_test_";

struct Server {
    root_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<Server> = OnceCell::const_new();

async fn start_server() -> Server {
    if let Ok(url) = std::env::var(PG_URL_ENV) {
        return Server {
            root_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    Server {
        root_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Root URL of the shared server, without a database name.
pub async fn server_url() -> &'static str {
    &SERVER.get_or_init(start_server).await.root_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", server_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated database private to one test.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create a uniquely-named database and apply all migrations.
    pub async fn create() -> Self {
        let name = format!("{DB_PREFIX}{}", Uuid::new_v4().simple());

        let maint = maintenance_pool().await;
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create database {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", server_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should apply to a fresh database");

        Self { pool, name }
    }

    /// Close the pool and drop the database.
    pub async fn drop(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let _ = maint
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        maint.close().await;
    }
}
