use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("mailflow_db")]
pub struct MailDb(sqlx::PgPool);
