/// Server-side scripts for the issuance decision.
///
/// The whole decision (duplicate check, stock check, debit, admission
/// record) runs as one indivisible step inside Redis, which linearizes
/// concurrent invocations on its command queue. Everything else in the
/// service exists to make this step's outputs durable.
///
/// All three keys carry the same `{event_id}` hash tag so a cluster
/// deployment co-locates them on one shard.

/// Atomic check-and-commit.
///
/// KEYS[1] stock counter, KEYS[2] participant set, KEYS[3] per-user cache
/// slot. ARGV[1] user id, ARGV[2] pre-minted coupon id, ARGV[3] TTL secs.
///
/// Returns `{1, 'SUCCESS', coupon_id, remaining}` on PASS, or
/// `{0, <reason>}` where reason is one of USER_ALREADY_PARTICIPATED,
/// STOCK_NOT_INITIALIZED, NO_STOCK_AVAILABLE. All three FAIL codes are
/// terminal for the request.
pub const ISSUE_SCRIPT: &str = r#"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
    return {0, 'USER_ALREADY_PARTICIPATED'}
end
local stock = redis.call('GET', KEYS[1])
if not stock then
    return {0, 'STOCK_NOT_INITIALIZED'}
end
if tonumber(stock) <= 0 then
    return {0, 'NO_STOCK_AVAILABLE'}
end
redis.call('SADD', KEYS[2], ARGV[1])
local remaining = redis.call('DECR', KEYS[1])
redis.call('EXPIRE', KEYS[2], ARGV[3])
redis.call('SET', KEYS[3], ARGV[2], 'EX', ARGV[3])
return {1, 'SUCCESS', ARGV[2], remaining}
"#;

/// Undo of the atomic decision, used when the issuance event could not be
/// made durable. Mirrors the issue script's shape: indivisibly removes the
/// participant and re-credits stock, guarded on current membership so
/// re-running it is idempotent.
///
/// The stock credit is skipped when the counter has already expired; the
/// event is over at that point and recreating the key would leave an
/// untracked counter behind.
///
/// KEYS as the issue script. ARGV[1] user id. Returns 1 if a decision was
/// rolled back, 0 if there was nothing to undo.
pub const COMPENSATE_SCRIPT: &str = r#"
if redis.call('SREM', KEYS[2], ARGV[1]) == 1 then
    if redis.call('EXISTS', KEYS[1]) == 1 then
        redis.call('INCR', KEYS[1])
    end
    redis.call('DEL', KEYS[3])
    return 1
end
return 0
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_script_checks_membership_before_stock() {
        let member_check = ISSUE_SCRIPT.find("SISMEMBER").unwrap();
        let stock_read = ISSUE_SCRIPT.find("GET").unwrap();
        assert!(
            member_check < stock_read,
            "duplicate users must be rejected before stock is inspected"
        );
    }

    #[test]
    fn issue_script_never_seeds_stock() {
        // Initialization is an explicit admin action; a missing counter is
        // a terminal failure, not an invitation to auto-seed.
        assert!(ISSUE_SCRIPT.contains("STOCK_NOT_INITIALIZED"));
        assert!(!ISSUE_SCRIPT.contains("INCR"));
    }

    #[test]
    fn issue_script_debits_after_admission() {
        let admit = ISSUE_SCRIPT.find("SADD").unwrap();
        let debit = ISSUE_SCRIPT.find("DECR").unwrap();
        assert!(admit < debit);
    }

    #[test]
    fn issue_script_refreshes_ttl_on_pass() {
        assert!(ISSUE_SCRIPT.contains("EXPIRE"));
        assert!(ISSUE_SCRIPT.contains("'EX', ARGV[3]"));
    }

    #[test]
    fn compensate_script_is_guarded_on_membership() {
        assert!(COMPENSATE_SCRIPT.trim_start().starts_with("if redis.call('SREM'"));
        // Only re-credit a counter that still exists.
        let exists = COMPENSATE_SCRIPT.find("EXISTS").unwrap();
        let credit = COMPENSATE_SCRIPT.find("INCR").unwrap();
        assert!(exists < credit);
    }
}
