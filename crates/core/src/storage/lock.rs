use anyhow::Context;

// Advisory locks are scoped to the Postgres session: one cycle at a time across all workers.
const LOCK_NAMESPACE: i64 = 0x5049_434B_524B; // "PICKRK"

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobLock {
    PerformanceCycle,
}

impl JobLock {
    fn key(self) -> i64 {
        match self {
            JobLock::PerformanceCycle => LOCK_NAMESPACE ^ 1,
        }
    }
}

/// Holds the session lock on one dedicated connection until released.
pub struct HeldLock {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    lock: JobLock,
}

pub async fn try_acquire(pool: &sqlx::PgPool, lock: JobLock) -> anyhow::Result<Option<HeldLock>> {
    let key = lock.key();
    let mut conn = pool
        .acquire()
        .await
        .context("failed to acquire connection for advisory lock")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire advisory lock (key={key})"))?;

    Ok(acquired.0.then_some(HeldLock { conn, lock }))
}

impl HeldLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let key = self.lock.key();
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(key)
            .execute(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={key})"))?;
        Ok(())
    }
}
