use uuid::Uuid;

// Transaction-scoped advisory locks serialize recommendation writes per user. They are
// released on commit/rollback, so they never leak across pooled connections.
const LOCK_NAMESPACE: i64 = 0x5245_434F_4D4D; // "RECOMM"

pub(crate) fn lock_key_for_user(user_id: Uuid) -> i64 {
    let (hi, lo) = user_id.as_u64_pair();
    LOCK_NAMESPACE ^ ((hi ^ lo) as i64)
}

/// Blocks until the per-user persist lock is held by `tx`.
pub async fn acquire_user_lock(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<(), sqlx::Error> {
    let key = lock_key_for_user(user_id);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .persistent(false)
        .bind(key)
        .execute(&mut **tx)
        .await?;
    tracing::debug!(%user_id, key, "acquired user persist lock");
    Ok(())
}
