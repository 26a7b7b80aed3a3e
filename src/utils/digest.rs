use bincode::config;
use serde::Serialize;

/// cacluate [blake3] hash of a serilizeable object
pub fn digest<T: Serialize>(t: &T) -> anyhow::Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let config = config::legacy();
    hasher.update(&bincode::serde::encode_to_vec(t, config)?);
    let mut hash = hasher.finalize_xof();
    let mut output = [0u8; 32];
    hash.fill(&mut output);
    Ok(output)
}

/// check an object against a digest calculated earlier
pub fn matches<T: Serialize>(t: &T, expected: &[u8; 32]) -> anyhow::Result<bool> {
    Ok(digest(t)? == *expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_changes_with_content() {
        let a = digest(&(1u64, "a")).unwrap();
        let b = digest(&(1u64, "b")).unwrap();
        assert_ne!(a, b);
        assert!(matches(&(1u64, "a"), &a).unwrap());
        assert!(!matches(&(1u64, "a"), &b).unwrap());
    }
}
