/// Number of buckets a seed is spread over.
pub const BUCKET_COUNT: u32 = 100;

/// Map a seed string to a bucket in `0..100`.
///
/// The hash is the classic `h = h * 31 + unit` recurrence over the UTF-16
/// code units of the seed with 32-bit two's-complement wrap, so every SDK
/// that implements it the same way lands a given user in the same bucket.
pub fn bucket(seed: &str) -> u32 {
    string_hash(seed).unsigned_abs() % BUCKET_COUNT
}

/// Seed used by percentage rules: the user id followed by the flag key.
pub fn rollout_seed(user_id: &str, flag_key: &str) -> String {
    format!("{}{}", user_id, flag_key)
}

fn string_hash(seed: &str) -> i32 {
    seed.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}
