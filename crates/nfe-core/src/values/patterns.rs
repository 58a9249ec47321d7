//! Common regex patterns for NFe value validation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // ';'-separated list of non-negative numbers, no leading/trailing separator
    pub static ref NUMBER_LIST: Regex = Regex::new(
        r"^\d+(\.\d+)?(;\d+(\.\d+)?)*$"
    ).unwrap();

    // Table name derivation
    pub static ref LEADING_DIGITS: Regex = Regex::new(r"^\d+").unwrap();

    pub static ref PUNCTUATION: Regex = Regex::new(r"[^\w\s]").unwrap();

    // Characters escaped in a cache partition file stem
    pub static ref UNSAFE_FILE_CHARS: Regex = Regex::new(r"[^\w\- ]").unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_list_pattern() {
        assert!(NUMBER_LIST.is_match("14"));
        assert!(NUMBER_LIST.is_match("1;4"));
        assert!(NUMBER_LIST.is_match("100.0;10.2"));
        assert!(!NUMBER_LIST.is_match(""));
        assert!(!NUMBER_LIST.is_match(";1"));
        assert!(!NUMBER_LIST.is_match("1;"));
        assert!(!NUMBER_LIST.is_match("1,5"));
        assert!(!NUMBER_LIST.is_match("[1;4]"));
        assert!(!NUMBER_LIST.is_match("1.;4"));
    }
}
