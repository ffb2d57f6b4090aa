// Input parsing helpers shared by the field validator

use chrono::NaiveDate;
use regex::Regex;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$";

/// Basic email shape check (local@domain.tld). Deliverability is the server's concern.
pub fn is_valid_email(input: &str) -> bool {
    let s = input.trim();
    if s.is_empty() || s.len() > 254 {
        return false;
    }
    match Regex::new(EMAIL_PATTERN) {
        Ok(re) => re.is_match(s),
        Err(e) => {
            log::error!("[PHASE: validation] Failed to compile email regex: {}", e);
            false
        }
    }
}

/// Parse a calendar date as typed into a form (`YYYY-MM-DD`).
pub fn parse_iso_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

/// Parse a numeric text input. Empty input is NOT zero; it is "no value".
pub fn parse_number(input: &str) -> Option<f64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_accepts_common_addresses() {
        assert!(is_valid_email("ops@contractor.example"));
        assert!(is_valid_email("  first.last+tag@sub.domain.co  "));
    }

    #[test]
    fn email_shape_rejects_malformed_addresses() {
        for bad in ["", "plain", "@domain.com", "user@", "user@domain", "a b@c.de"] {
            assert!(!is_valid_email(bad), "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn iso_dates_parse_strictly() {
        assert_eq!(
            parse_iso_date("2024-01-01"),
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(parse_iso_date("2024-02-30"), None);
        assert_eq!(parse_iso_date("01/02/2024"), None);
    }

    #[test]
    fn empty_numeric_input_is_not_zero() {
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("   "), None);
        assert_eq!(parse_number("0"), Some(0.0));
        assert_eq!(parse_number(" 0.25 "), Some(0.25));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
