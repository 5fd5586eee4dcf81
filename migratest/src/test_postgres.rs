#![allow(dead_code)]

//! PostgreSQL test infrastructure module.
//!
//! One container is started per test binary and shared; every test gets its
//! own database in it, so suites and tear-downs never see each other.

use std::sync::OnceLock;

use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Default credentials for testcontainers-modules postgres
const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_DB: &str = "postgres";

/// The runtime that owns the container, and the container's mapped port.
static CONTAINER: OnceLock<(Runtime, u16)> = OnceLock::new();

fn postgres_port() -> u16 {
    let (_rt, port) = CONTAINER.get_or_init(|| {
        let rt = Runtime::new().expect("failed to create tokio runtime");
        let port = rt.block_on(async {
            let container = Postgres::default()
                .start()
                .await
                .expect("failed to start postgres container");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("failed to get postgres port");
            // keep the container running for the rest of the test binary
            std::mem::forget(container);
            port
        });
        (rt, port)
    });
    *port
}

fn url_with_db(db: &str) -> String {
    format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        PG_USER,
        PG_PASSWORD,
        postgres_port(),
        db
    )
}

/// Create a database with a unique name and return its connection URL.
pub fn fresh_postgres_url() -> String {
    let mut admin =
        Client::connect(&url_with_db(PG_DB), NoTls).expect("failed to connect as admin");
    let db_name = format!("test_{}", Uuid::new_v4().simple());
    admin
        .batch_execute(&format!("CREATE DATABASE \"{}\"", db_name))
        .expect("failed to create test database");
    url_with_db(&db_name)
}
