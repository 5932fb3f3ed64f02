use std::time::Duration;

use chrono::{DateTime, Utc};
use shared_types::UserProfile;
use sqlx::SqlitePool;

use super::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub phone: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            id: user.id,
            phone: user.phone,
            is_active: user.is_active,
            created_at: user.created_at,
        }
    }
}

pub async fn create_user(pool: &SqlitePool, phone: &str) -> Result<User, AuthError> {
    if find_by_phone(pool, phone).await?.is_some() {
        return Err(AuthError::PhoneTaken);
    }

    let result = sqlx::query_as::<_, User>(
        "INSERT INTO users (phone, is_active, created_at) VALUES (?, 1, ?)
         RETURNING id, phone, is_active, created_at",
    )
    .bind(phone)
    .bind(Utc::now())
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => Ok(user),
        // Lost a race with a concurrent signup for the same phone.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(AuthError::PhoneTaken),
        Err(e) => Err(e.into()),
    }
}

pub async fn find_by_phone(pool: &SqlitePool, phone: &str) -> Result<Option<User>, AuthError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, phone, is_active, created_at FROM users WHERE phone = ?",
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

/// Store a freshly generated OTP for `phone`, valid for `ttl`.
pub async fn store_otp(
    pool: &SqlitePool,
    phone: &str,
    otp: &str,
    ttl: Duration,
) -> Result<(), AuthError> {
    let now = Utc::now().timestamp();
    let expires = now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
    sqlx::query("INSERT INTO otp (phone, otp, created_at, expired_at) VALUES (?, ?, ?, ?)")
        .bind(phone)
        .bind(otp)
        .bind(now)
        .bind(expires)
        .execute(pool)
        .await?;
    Ok(())
}

/// Consume a matching, unexpired OTP. On success every outstanding OTP for the
/// phone is invalidated so a code can be used at most once.
pub async fn consume_otp(pool: &SqlitePool, phone: &str, otp: &str) -> Result<bool, AuthError> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let matched: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM otp WHERE phone = ? AND otp = ? AND expired_at > ?
         ORDER BY id DESC LIMIT 1",
    )
    .bind(phone)
    .bind(otp)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    if matched.is_none() {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM otp WHERE phone = ?")
        .bind(phone)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

/// Drop OTP rows whose expiry has passed.
pub async fn delete_expired_otps(pool: &SqlitePool) -> Result<u64, AuthError> {
    let now = Utc::now().timestamp();
    let result = sqlx::query("DELETE FROM otp WHERE expired_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Background task: purge expired OTPs every `period`.
pub async fn run_expired_otp_cleanup(pool: SqlitePool, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate; skip it
    loop {
        interval.tick().await;
        match delete_expired_otps(&pool).await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(deleted = n, "expired OTPs purged"),
            Err(e) => tracing::error!("OTP cleanup failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestDb;

    #[tokio::test]
    async fn test_duplicate_phone_is_rejected() {
        let db = TestDb::new().await;
        let user = create_user(&db.pool, "+15550001111").await.unwrap();
        assert!(user.is_active);

        let err = create_user(&db.pool, "+15550001111").await.unwrap_err();
        assert!(matches!(err, AuthError::PhoneTaken));

        let found = find_by_phone(&db.pool, "+15550001111").await.unwrap().unwrap();
        assert_eq!(found, user);
    }

    #[tokio::test]
    async fn test_otp_is_single_use() {
        let db = TestDb::new().await;
        store_otp(&db.pool, "+15550002222", "123456", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!consume_otp(&db.pool, "+15550002222", "654321").await.unwrap());
        assert!(consume_otp(&db.pool, "+15550002222", "123456").await.unwrap());
        assert!(!consume_otp(&db.pool, "+15550002222", "123456").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_otp_is_rejected_and_purged() {
        let db = TestDb::new().await;
        store_otp(&db.pool, "+15550003333", "111111", Duration::from_secs(0))
            .await
            .unwrap();

        assert!(!consume_otp(&db.pool, "+15550003333", "111111").await.unwrap());
        assert_eq!(delete_expired_otps(&db.pool).await.unwrap(), 1);
    }
}
