pub mod creators;
pub mod lock;
pub mod performance;

use anyhow::Context;

pub use performance::PgRepository;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}
