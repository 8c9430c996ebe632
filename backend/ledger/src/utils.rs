use std::sync::LazyLock;

use regex::Regex;

use crate::error::RaffleError;

const MAX_USERNAME_LEN: usize = 30;

static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9._]").expect("username pattern compiles"));

/// Normalises a social handle: trims, drops one leading `@`, lowercases.
pub fn sanitize_username(input: &str) -> Result<String, RaffleError> {
    let trimmed = input.trim();
    let handle = trimmed.strip_prefix('@').unwrap_or(trimmed).to_lowercase();

    if handle.is_empty() || handle.len() > MAX_USERNAME_LEN {
        return Err(RaffleError::Invalid(format!(
            "username must be 1 to {MAX_USERNAME_LEN} characters"
        )));
    }

    if DISALLOWED.is_match(&handle) {
        return Err(RaffleError::Invalid(
            "username may only contain letters, digits, '.' and '_'".to_string(),
        ));
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::sanitize_username;

    #[test]
    fn test_basic() {
        assert_eq!(sanitize_username("alice").unwrap(), "alice");
        assert_eq!(sanitize_username("@Alice_01").unwrap(), "alice_01");
        assert_eq!(sanitize_username("  defi.learner  ").unwrap(), "defi.learner");
    }

    #[test]
    fn test_rejects_symbols() {
        assert!(sanitize_username("alice!").is_err());
        assert!(sanitize_username("al ice").is_err());
        assert!(sanitize_username("@@alice").is_err());
    }

    #[test]
    fn test_length() {
        assert!(sanitize_username("").is_err());
        assert!(sanitize_username("@").is_err());
        assert!(sanitize_username(&"a".repeat(31)).is_err());
        assert!(sanitize_username(&"a".repeat(30)).is_ok());
    }
}
