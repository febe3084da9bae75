//! # Cache Stores Module
//!
//! Key-value backends the store adapter talks to: Redis for deployments and
//! an in-process map for tests and single-node runs.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryBackend;
pub use redis_store::RedisBackend;

use super::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Raw byte-level operations a backend must provide
///
/// Backends report errors honestly; swallowing them is the adapter's job.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Short backend name for logs and the admin API
    fn name(&self) -> &'static str;

    /// Whether the connection is currently usable
    fn is_ready(&self) -> bool;

    /// Get a raw value
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a raw value, with expiry when `ttl` is set
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete every key matching a glob pattern and return how many were removed
    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64>;
}

/// Glob matching with Redis `MATCH` semantics
///
/// `*` matches any run, `?` one character, `[abc]`, `[^abc]` and `[a-z]` one
/// character from (or outside) a set, and `\x` a literal `x`.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0, 0);
    let mut star: Option<usize> = None;
    let mut star_k = 0;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            star_k = k;
            p += 1;
            continue;
        }

        if p < pattern.len() {
            let (matched, next) = match_token(&pattern, p, key[k]);
            if matched {
                p = next;
                k += 1;
                continue;
            }
        }

        match star {
            Some(star_p) => {
                // Let the last star absorb one more character
                p = star_p + 1;
                star_k += 1;
                k = star_k;
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }

    p == pattern.len()
}

/// Match the single-character token at `p`; returns the index after it
fn match_token(pattern: &[char], p: usize, c: char) -> (bool, usize) {
    match pattern[p] {
        '?' => (true, p + 1),
        '\\' if p + 1 < pattern.len() => (pattern[p + 1] == c, p + 2),
        '[' => match_class(pattern, p + 1, c),
        literal => (literal == c, p + 1),
    }
}

fn match_class(pattern: &[char], mut i: usize, c: char) -> (bool, usize) {
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (low, high) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= low <= c && c <= high;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    // An unterminated class runs to the end of the pattern
    (matched != negate, (i + 1).min(pattern.len()))
}
