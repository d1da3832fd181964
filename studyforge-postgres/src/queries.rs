//! SQL used by the Postgres backends.

pub const INSERT_ACCOUNT: &str = r#"
INSERT INTO credit_accounts (user_id, credits, last_credit_reset)
VALUES ($1, $2, $3)
ON CONFLICT (user_id) DO NOTHING
RETURNING credits, last_credit_reset
"#;

pub const SELECT_ACCOUNT: &str = r#"
SELECT credits, last_credit_reset
FROM credit_accounts
WHERE user_id = $1
"#;

/// Check-and-subtract in one statement; no row means missing account or short balance.
pub const DEBIT: &str = r#"
UPDATE credit_accounts
SET credits = credits - $2
WHERE user_id = $1 AND credits >= $2
RETURNING credits
"#;

/// No row means a missing account or a sum past `u32::MAX`.
pub const REFUND: &str = r#"
UPDATE credit_accounts
SET credits = credits + $2
WHERE user_id = $1 AND credits + $2 <= 4294967295
RETURNING credits
"#;

/// Resets only when `$3` falls in a later UTC calendar month than the last reset.
pub const RESET_IF_NEW_MONTH: &str = r#"
UPDATE credit_accounts
SET credits = $2, last_credit_reset = $3
WHERE user_id = $1
  AND date_trunc('month', last_credit_reset AT TIME ZONE 'UTC') < date_trunc('month', $3 AT TIME ZONE 'UTC')
RETURNING credits, last_credit_reset
"#;

/// Serializes inserts per (user, kind) for the rest of the transaction.
pub const LOCK_COLLECTION: &str = "SELECT pg_advisory_xact_lock(hashtextextended($1::text || ':' || $2, 0))";

/// Drops everything past the newest `$3` entries of a collection.
pub const EVICT_OLDEST: &str = r#"
DELETE FROM artifacts
WHERE id IN (
    SELECT id FROM artifacts
    WHERE user_id = $1 AND kind = $2
    ORDER BY created_at DESC, seq DESC
    OFFSET $3
)
RETURNING id
"#;

pub const INSERT_ARTIFACT: &str = r#"
INSERT INTO artifacts (id, user_id, kind, topic, level, language, credits_charged, created_at, document)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

pub const LIST_ARTIFACTS: &str = r#"
SELECT id, user_id, kind, topic, level, language, credits_charged, created_at, document, score
FROM artifacts
WHERE user_id = $1 AND kind = $2
ORDER BY created_at DESC, seq DESC
"#;

pub const GET_ARTIFACT: &str = r#"
SELECT id, user_id, kind, topic, level, language, credits_charged, created_at, document, score
FROM artifacts
WHERE user_id = $1 AND id = $2
"#;

pub const DELETE_ARTIFACT: &str = "DELETE FROM artifacts WHERE user_id = $1 AND id = $2";

pub const ATTACH_SCORE: &str = r#"
UPDATE artifacts
SET score = $3
WHERE user_id = $1 AND id = $2 AND kind = 'quiz'
RETURNING id, user_id, kind, topic, level, language, credits_charged, created_at, document, score
"#;

pub const WINDOW_STATS: &str = r#"
SELECT COUNT(*) AS count, MIN(requested_at) AS oldest
FROM request_log
WHERE user_id = $1 AND kind = $2 AND requested_at >= $3
"#;

pub const RECORD_REQUEST: &str = "INSERT INTO request_log (user_id, kind, requested_at) VALUES ($1, $2, $3)";

pub const PURGE_REQUESTS: &str = "DELETE FROM request_log WHERE requested_at < $1";

pub const LATEST_CONSENT: &str = r#"
SELECT user_id, state, consent_text, method, recorded_at
FROM consent_records
WHERE user_id = $1
ORDER BY recorded_at DESC, id DESC
LIMIT 1
"#;

pub const APPEND_CONSENT: &str = r#"
INSERT INTO consent_records (user_id, state, consent_text, method, recorded_at)
VALUES ($1, $2, $3, $4, $5)
"#;
