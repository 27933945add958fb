//! Normalization of operator-specific trip identifiers into a stable train number.
//!
//! The upstream GTFS-RT feed and the timetable corpus each spell a train's
//! identity differently (`"1:1111406H"` vs. a timetable trip's base id). Both
//! sides are normalized through this function before being compared.

/// Strip a `"<digits>:"` prefix, take the last run of 3-4 digits followed by a
/// single ASCII letter, drop leading zeros from the digits and upper-case the
/// letter. Returns `None` if no such tail exists.
pub fn normalize_train_number(raw: &str) -> Option<String> {
    let without_prefix = strip_colon_prefix(raw);
    let tail = find_digit_letter_tail(without_prefix)?;
    let (digits, letter) = tail;

    let trimmed = digits.trim_start_matches('0');
    let digits_out = if trimmed.is_empty() { "0" } else { trimmed };

    Some(format!("{digits_out}{}", letter.to_ascii_uppercase()))
}

fn strip_colon_prefix(raw: &str) -> &str {
    match raw.find(':') {
        Some(idx) if raw[..idx].chars().all(|c| c.is_ascii_digit()) && idx > 0 => &raw[idx + 1..],
        _ => raw,
    }
}

/// Find the trailing ASCII letter and the digit run immediately before it.
///
/// The feed pads a train's true 3-4 digit number with an operator/schedule
/// code of arbitrary extra leading digits (e.g. `"1111406H"` carries the
/// real number `406` behind three junk digits). A run of exactly 3 or 4
/// digits is assumed to *be* the train number and is kept whole; a longer
/// run is assumed to carry that padding, and only its last 3 digits are
/// taken. This is what makes `"1:1111406H"` and `"4200406H"` normalize to
/// the same `"406H"` (§4.4 step 3, §8 property 4).
fn find_digit_letter_tail(s: &str) -> Option<(&str, char)> {
    let bytes = s.as_bytes();
    let mut end = bytes.len();
    while end > 0 {
        let c = bytes[end - 1];
        if c.is_ascii_alphabetic() {
            let letter = c as char;
            let mut start = end - 1;
            while start > 0 && bytes[start - 1].is_ascii_digit() {
                start -= 1;
            }
            let run_len = (end - 1) - start;
            if run_len >= 3 {
                let take = if run_len <= 4 { run_len } else { 3 };
                let tail_start = end - 1 - take;
                return Some((&s[tail_start..end - 1], letter));
            }
        }
        end -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_digit_colon_prefix() {
        assert_eq!(normalize_train_number("1:1111406H"), Some("406H".to_string()));
    }

    #[test]
    fn handles_no_prefix() {
        assert_eq!(normalize_train_number("42000906G"), Some("906G".to_string()));
    }

    #[test]
    fn both_examples_match_spec() {
        assert_eq!(normalize_train_number("1:1111406H"), normalize_train_number("4200406H"));
        assert_eq!(normalize_train_number("4200406H"), Some("406H".to_string()));
    }

    #[test]
    fn is_idempotent() {
        let once = normalize_train_number("1:1111406H").unwrap();
        let twice = normalize_train_number(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn undecorated_four_digit_number_is_kept_whole() {
        assert_eq!(normalize_train_number("1234H"), Some("1234H".to_string()));
    }

    #[test]
    fn junk_prefix_longer_than_four_digits_truncates_to_last_three() {
        assert_eq!(normalize_train_number("0012345z"), Some("345Z".to_string()));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(normalize_train_number("999"), None);
        assert_eq!(normalize_train_number(""), None);
    }

    #[test]
    fn lowercase_letter_is_uppercased() {
        assert_eq!(normalize_train_number("999z"), Some("999Z".to_string()));
    }

    #[test]
    fn leading_zeros_stripped_but_not_all_digits() {
        assert_eq!(normalize_train_number("000z"), Some("0Z".to_string()));
    }
}
