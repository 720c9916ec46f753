use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session, so the connection that took the lock is
// parked here until release. Dropping it (process exit, pool close) also frees the lock.
const RUN_LOCK_KEY: i64 = 0x4650_4C5F_5049_5045; // "FPL_PIPE"

#[derive(Debug)]
pub struct RunLock {
    pool: sqlx::PgPool,
    held: tokio::sync::Mutex<Option<PoolConnection<Postgres>>>,
}

impl RunLock {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self {
            pool,
            held: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn try_acquire(&self) -> anyhow::Result<bool> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire connection for run lock")?;

        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(RUN_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={RUN_LOCK_KEY})"))?;

        if acquired.0 {
            *held = Some(conn);
        }
        Ok(acquired.0)
    }

    pub async fn release(&self) -> anyhow::Result<()> {
        let Some(mut conn) = self.held.lock().await.take() else {
            return Ok(());
        };

        sqlx::query("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(RUN_LOCK_KEY)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("failed to release advisory lock (key={RUN_LOCK_KEY})"))?;
        Ok(())
    }
}
