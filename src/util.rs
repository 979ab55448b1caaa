use std::str::FromStr;

/// Parse "true"/"false"/"1"/"0" from an owned String.
pub fn parse_bool_flag(s: String) -> Option<bool> {
    parse_bool_str(&s)
}

/// Parse "true"/"false"/"1"/"0" from a &str.
pub fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read an env var and parse it, treating blank or malformed values as unset.
pub fn env_parsed<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
}

/// Split a comma separated list, dropping blanks and lowercasing entries.
pub fn parse_token_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_helpers() {
        assert_eq!(parse_bool_str("true"), Some(true));
        assert_eq!(parse_bool_str("0"), Some(false));
        assert_eq!(parse_bool_flag("YES".to_string()), Some(true));
        assert_eq!(parse_bool_flag("off".to_string()), Some(false));
        assert_eq!(parse_bool_str("maybe"), None);
    }

    #[test]
    fn test_parse_token_list_trims_and_lowercases() {
        assert_eq!(
            parse_token_list(" JSON, chart,,workflow "),
            vec!["json".to_string(), "chart".to_string(), "workflow".to_string()]
        );
        assert!(parse_token_list(" , ").is_empty());
    }

    #[test]
    fn test_env_parsed_ignores_blank_and_malformed_values() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::set_var("FENCECAST_TEST_NUMBER", "  ");
        assert_eq!(env_parsed::<f64>("FENCECAST_TEST_NUMBER"), None);
        std::env::set_var("FENCECAST_TEST_NUMBER", "fast");
        assert_eq!(env_parsed::<f64>("FENCECAST_TEST_NUMBER"), None);
        std::env::set_var("FENCECAST_TEST_NUMBER", " 12.5 ");
        assert_eq!(env_parsed::<f64>("FENCECAST_TEST_NUMBER"), Some(12.5));
        std::env::remove_var("FENCECAST_TEST_NUMBER");
    }
}
