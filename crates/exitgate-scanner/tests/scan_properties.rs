//! Property-based tests for scan detection.
//!
//! Bursts are fed straight into a [`ScanBuffer`] with synthetic instants, so
//! these tests need no runtime.

use std::time::Duration;

use exitgate_core::Identifier;
use exitgate_scanner::{ScanBuffer, ScanEvent, ScanRules};
use proptest::prelude::*;
use tokio::time::Instant;

/// Keystroke spacing of a HID scanner burst.
const BURST_SPACING: Duration = Duration::from_millis(2);

fn feed_burst(buffer: &mut ScanBuffer, input: &str) -> Vec<ScanEvent> {
    let start = Instant::now();
    input
        .chars()
        .enumerate()
        .flat_map(|(i, ch)| buffer.feed(ch, start + BURST_SPACING * i as u32))
        .collect()
}

fn rules(min_length: usize, max_length: usize) -> ScanRules {
    ScanRules {
        min_length,
        max_length,
        ..ScanRules::default()
    }
}

/// Strategy for length bounds with `1 <= min <= max <= 40`.
fn length_bounds() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=12).prop_flat_map(|min| (Just(min), min..=40))
}

/// Strategy for a code within the given bounds, mixed case.
fn code_within(min: usize, max: usize) -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("[A-Za-z0-9]{{{min},{max}}}"))
        .expect("Failed to create code regex strategy")
}

proptest! {
    /// Any in-bounds burst plus a newline yields one valid upper-cased scan.
    #[test]
    fn prop_terminated_burst_is_one_valid_scan(
        (min, max, code) in length_bounds()
            .prop_flat_map(|(min, max)| (Just(min), Just(max), code_within(min, max)))
    ) {
        let mut buffer = ScanBuffer::new(rules(min, max));
        let events = feed_burst(&mut buffer, &format!("{code}\n"));

        prop_assert_eq!(events.len(), 1);
        prop_assert_eq!(&events[0].code, &code.to_uppercase());
        prop_assert!(events[0].valid);
        prop_assert_eq!(buffer.pending(), "");
    }

    /// A burst longer than `max_length` is split at `max_length`.
    #[test]
    fn prop_overlong_burst_is_split(
        (max, code) in (6usize..=20)
            .prop_flat_map(|max| (Just(max), code_within(max + 1, 2 * max)))
    ) {
        let mut buffer = ScanBuffer::new(rules(1, max));
        let events = feed_burst(&mut buffer, &format!("{code}\n"));
        let code = code.to_uppercase();

        prop_assert_eq!(events.len(), 2);
        prop_assert_eq!(&events[0].code, &code[..max]);
        prop_assert_eq!(&events[1].code, &code[max..]);
        prop_assert!(events.iter().all(|e| e.valid));
    }

    /// Every code the scanner accepts is also a valid exit identifier.
    #[test]
    fn prop_valid_scan_is_valid_identifier(code in "[ -~]{1,30}") {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        for event in feed_burst(&mut buffer, &format!("{code}\n")) {
            if event.valid {
                let identifier = Identifier::new(&event.code);
                prop_assert!(identifier.is_ok(), "{:?}", event.code);
                let identifier = identifier.unwrap();
                prop_assert_eq!(identifier.as_str(), event.code.as_str());
            }
        }
    }

    /// Codes with anything but alphanumerics never validate.
    #[test]
    fn prop_punctuation_is_invalid(
        head in "[A-Z0-9]{3,8}",
        mark in "[-_./#]",
        tail in "[A-Z0-9]{3,8}",
    ) {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let events = feed_burst(&mut buffer, &format!("{head}{mark}{tail}\n"));

        prop_assert_eq!(events.len(), 1);
        prop_assert!(!events[0].valid);
    }
}
