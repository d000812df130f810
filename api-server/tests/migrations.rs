use mailflow_api::store::{MailStore, PgStore};
use mailflow_api::test_support::{TestDatabase, TestDatabaseError};
use sqlx::migrate::Migrator;

static TEST_MIGRATOR: Migrator = sqlx::migrate!("./migrations");

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping database test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn table_exists(pool: &sqlx::PgPool, name: &str) -> bool {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1",
    )
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("lookup succeeded");
    count == 1
}

#[tokio::test]
async fn migrations_apply_and_revert_cleanly() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();

    TEST_MIGRATOR.run(&pool).await.expect("migrations run");
    assert!(table_exists(&pool, "delivery_attempts").await);

    TEST_MIGRATOR.undo(&pool, 0).await.expect("migrations revert");
    assert!(!table_exists(&pool, "delivery_attempts").await);
    assert!(!table_exists(&pool, "email_threads").await);

    TEST_MIGRATOR.run(&pool).await.expect("migrations rerun");
    assert!(table_exists(&pool, "messages").await);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn pg_store_reads_accounts() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();

    let user_id: i32 =
        sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
            .bind("owner@acme.test")
            .fetch_one(&pool)
            .await
            .expect("user inserted");

    let store = PgStore::new(pool);
    let account = store
        .find_account(user_id)
        .await
        .expect("query succeeded")
        .expect("account exists");
    assert_eq!(account.email, "owner@acme.test");
    assert!(!account.disabled);
    assert!(store.list_threads(user_id, 10, 0).await.expect("list").is_empty());

    test_db.close().await.expect("failed to drop test database");
}
