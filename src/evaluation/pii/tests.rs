use super::*;

#[test]
fn detects_email() {
    assert_eq!(
        PiiDetector.detect("Contact jane.doe@example.com for refunds."),
        vec![PiiKind::Email]
    );
}

#[test]
fn detects_phone_numbers() {
    assert!(PiiDetector.detect("Call (555) 123-4567 today").contains(&PiiKind::Phone));
    assert!(PiiDetector.detect("Call +1 555-123-4567").contains(&PiiKind::Phone));
}

#[test]
fn detects_national_id() {
    assert_eq!(
        PiiDetector.detect("SSN on file: 123-45-6789"),
        vec![PiiKind::NationalId]
    );
}

#[test]
fn detects_only_luhn_valid_cards() {
    assert_eq!(
        PiiDetector.detect("Card 4111 1111 1111 1111 was charged"),
        vec![PiiKind::PaymentCard]
    );
    assert!(
        !PiiDetector
            .detect("Order 4111 1111 1111 1112 shipped")
            .contains(&PiiKind::PaymentCard)
    );
}

#[test]
fn ordinary_answers_are_clean() {
    assert!(!PiiDetector.contains_pii(
        "Refunds must be requested within 30 days of purchase, per section 4.2 (2024 policy)."
    ));
    assert!(!PiiDetector.contains_pii("Page 12 lists 1,250 units sold in 2023."));
}

#[test]
fn luhn_checksum() {
    assert!(luhn_valid("4111111111111111"));
    assert!(luhn_valid("5500-0000-0000-0004"));
    assert!(!luhn_valid("4111111111111112"));
    assert!(!luhn_valid("1234"));
}
