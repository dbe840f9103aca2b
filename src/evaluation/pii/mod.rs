#[cfg(test)]
mod tests;

use fancy_regex::Regex;
use std::sync::LazyLock;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("valid regex")
});

static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?<![\d-])(?:\+\d{1,3}[ .-]?)?(?:\(\d{3}\)|\d{3})[ .-]\d{3}[ .-]\d{4}(?![\d-])")
        .expect("valid regex")
});

static SSN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<![\d-])\d{3}-\d{2}-\d{4}(?![\d-])").expect("valid regex"));

static CARD_CANDIDATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<!\d)(?:\d[ -]?){12,18}\d(?!\d)").expect("valid regex"));

/// Kinds of personal or payment data the detector recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    Email,
    Phone,
    NationalId,
    PaymentCard,
}

/// Pattern-based personal/payment data detector
#[derive(Debug, Clone, Copy, Default)]
pub struct PiiDetector;

impl PiiDetector {
    #[inline]
    pub fn detect(&self, text: &str) -> Vec<PiiKind> {
        let mut found = Vec::new();
        if matches!(EMAIL_REGEX.is_match(text), Ok(true)) {
            found.push(PiiKind::Email);
        }
        if matches!(PHONE_REGEX.is_match(text), Ok(true)) {
            found.push(PiiKind::Phone);
        }
        if matches!(SSN_REGEX.is_match(text), Ok(true)) {
            found.push(PiiKind::NationalId);
        }
        if CARD_CANDIDATE_REGEX
            .find_iter(text)
            .flatten()
            .any(|m| luhn_valid(m.as_str()))
        {
            found.push(PiiKind::PaymentCard);
        }
        found
    }

    #[inline]
    pub fn contains_pii(&self, text: &str) -> bool {
        !self.detect(text).is_empty()
    }
}

/// Luhn checksum over the digits of `candidate`, ignoring separators
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
