//! Keystroke timing state machine.
//!
//! A HID barcode scanner types a whole code in a few milliseconds; a human
//! takes hundreds of milliseconds per key. [`ScanBuffer`] uses the gap between
//! keystrokes to tell the two apart. It performs no I/O and takes the current
//! instant as an argument, so it can be driven by the ingestor task or by
//! tests alike.
//!
//! # Flush rules
//!
//! - CR, LF or TAB flushes the buffer and always emits (valid or not).
//! - Reaching `max_length` flushes and emits.
//! - A keystroke gap longer than the timeout flushes the pending buffer before
//!   the new key is accepted. The stale buffer is emitted only if it holds at
//!   least `min_length` characters; shorter fragments are discarded.
//! - [`ScanBuffer::tick`] applies the stale rule without a new key.

use std::time::Duration;

use exitgate_core::ScannerConfig;
use tokio::time::Instant;
use tracing::debug;

/// A flushed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    /// Trimmed, upper-cased code.
    pub code: String,
    /// Code matches `[A-Z0-9]{min_length..=max_length}`.
    pub valid: bool,
    /// Instant of the flush.
    pub timestamp: Instant,
}

/// Validation and timing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRules {
    pub min_length: usize,
    pub max_length: usize,
    pub timeout: Duration,
    pub cooldown: Duration,
}

impl Default for ScanRules {
    fn default() -> Self {
        Self::from(&ScannerConfig::default())
    }
}

impl From<&ScannerConfig> for ScanRules {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            min_length: config.min_length,
            max_length: config.max_length,
            timeout: Duration::from_millis(config.timeout),
            cooldown: Duration::from_millis(config.cooldown_ms),
        }
    }
}

impl ScanRules {
    /// Returns `true` if `code` is `[A-Z0-9]` within the length bounds.
    pub fn is_valid(&self, code: &str) -> bool {
        (self.min_length..=self.max_length).contains(&code.len())
            && code
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    }
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '\r' | '\n' | '\t')
}

/// Pending keystrokes of one scanner.
#[derive(Debug, Clone)]
pub struct ScanBuffer {
    rules: ScanRules,
    buffer: String,
    last_keystroke: Option<Instant>,
    last_scan: Option<Instant>,
}

impl ScanBuffer {
    pub fn new(rules: ScanRules) -> Self {
        Self {
            rules,
            buffer: String::with_capacity(rules.max_length),
            last_keystroke: None,
            last_scan: None,
        }
    }

    pub fn rules(&self) -> &ScanRules {
        &self.rules
    }

    /// Characters accepted since the last flush.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Drop pending characters.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_keystroke = None;
    }

    /// Accept one character received at `now`.
    ///
    /// Returns the scans flushed by this keystroke (usually none).
    pub fn feed(&mut self, ch: char, now: Instant) -> Vec<ScanEvent> {
        let mut events = Vec::new();

        if self.in_cooldown(now) {
            return events;
        }

        if let Some(event) = self.flush_stale(now) {
            events.push(event);
        }
        self.last_keystroke = Some(now);

        if is_terminator(ch) {
            events.extend(self.flush(now));
            return events;
        }

        if ch.is_ascii_graphic() || ch == ' ' {
            self.buffer.push(ch);
            if self.buffer.len() >= self.rules.max_length {
                events.extend(self.flush(now));
            }
        }

        events
    }

    /// Flush a buffer left stale since the last keystroke.
    pub fn tick(&mut self, now: Instant) -> Option<ScanEvent> {
        self.flush_stale(now)
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        !self.rules.cooldown.is_zero()
            && self
                .last_scan
                .is_some_and(|at| now.saturating_duration_since(at) < self.rules.cooldown)
    }

    fn flush_stale(&mut self, now: Instant) -> Option<ScanEvent> {
        let last = self.last_keystroke?;
        if self.buffer.is_empty() || now.saturating_duration_since(last) <= self.rules.timeout {
            return None;
        }

        if self.buffer.trim().len() < self.rules.min_length {
            debug!(discarded = self.buffer.len(), "stale keystrokes discarded");
            self.buffer.clear();
            return None;
        }
        self.flush(now)
    }

    fn flush(&mut self, now: Instant) -> Option<ScanEvent> {
        let code = self.buffer.trim().to_uppercase();
        self.buffer.clear();
        if code.is_empty() {
            return None;
        }

        self.last_scan = Some(now);
        let valid = self.rules.is_valid(&code);
        Some(ScanEvent {
            code,
            valid,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn feed_all(buffer: &mut ScanBuffer, input: &str, start: Instant, spacing: Duration) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        for (i, ch) in input.chars().enumerate() {
            events.extend(buffer.feed(ch, start + spacing * i as u32));
        }
        events
    }

    #[test]
    fn test_burst_with_terminator() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let events = feed_all(&mut buffer, "IMGTEST001\n", Instant::now(), Duration::from_millis(2));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "IMGTEST001");
        assert!(events[0].valid);
        assert_eq!(buffer.pending(), "");
    }

    #[test]
    fn test_human_typing_emits_nothing() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let start = Instant::now();
        let spacing = Duration::from_millis(300);
        let events = feed_all(&mut buffer, "IMGTEST001", start, spacing);

        assert!(events.is_empty());
        assert!(buffer.tick(start + spacing * 11).is_none());
        assert_eq!(buffer.pending(), "");
    }

    #[rstest]
    #[case("\r")]
    #[case("\n")]
    #[case("\t")]
    fn test_terminators(#[case] terminator: &str) {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let input = format!("ABC123{terminator}");
        let events = feed_all(&mut buffer, &input, Instant::now(), Duration::from_millis(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "ABC123");
    }

    #[test]
    fn test_lowercase_is_uppercased() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let events = feed_all(&mut buffer, " imgtest001 \n", Instant::now(), Duration::from_millis(1));
        assert_eq!(events[0].code, "IMGTEST001");
        assert!(events[0].valid);
    }

    #[rstest]
    #[case("ABC\n", "ABC")]
    #[case("ABC-123\n", "ABC-123")]
    fn test_terminator_emits_invalid(#[case] input: &str, #[case] code: &str) {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let events = feed_all(&mut buffer, input, Instant::now(), Duration::from_millis(1));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, code);
        assert!(!events[0].valid);
    }

    #[test]
    fn test_max_length_auto_flush() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let events = feed_all(
            &mut buffer,
            "ABCDEFGHIJKLMNOPQRST\n",
            Instant::now(),
            Duration::from_millis(1),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code.len(), 20);
        assert!(events[0].valid);
    }

    #[test]
    fn test_gap_flushes_long_stale_buffer() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let start = Instant::now();
        assert!(feed_all(&mut buffer, "IMGTEST001", start, Duration::from_millis(1)).is_empty());

        let events = buffer.feed('X', start + Duration::from_millis(500));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "IMGTEST001");
        assert_eq!(buffer.pending(), "X");
    }

    #[test]
    fn test_tick_flushes_unterminated_burst() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        let start = Instant::now();
        feed_all(&mut buffer, "IMGTEST001", start, Duration::from_millis(1));

        assert!(buffer.tick(start + Duration::from_millis(50)).is_none());
        let event = buffer.tick(start + Duration::from_millis(200)).unwrap();
        assert_eq!(event.code, "IMGTEST001");
        assert!(buffer.tick(start + Duration::from_millis(400)).is_none());
    }

    #[test]
    fn test_terminator_on_empty_buffer() {
        let mut buffer = ScanBuffer::new(ScanRules::default());
        assert!(buffer.feed('\n', Instant::now()).is_empty());
    }

    #[test]
    fn test_cooldown_drops_keystrokes() {
        let rules = ScanRules {
            cooldown: Duration::from_millis(500),
            ..Default::default()
        };
        let mut buffer = ScanBuffer::new(rules);
        let start = Instant::now();
        let spacing = Duration::from_millis(1);

        assert_eq!(feed_all(&mut buffer, "IMGTEST001\n", start, spacing).len(), 1);
        assert!(feed_all(&mut buffer, "IMGTEST002\n", start + Duration::from_millis(100), spacing).is_empty());
        assert_eq!(
            feed_all(&mut buffer, "IMGTEST003\n", start + Duration::from_millis(700), spacing).len(),
            1
        );
    }

    #[test]
    fn test_rules_from_config() {
        let config = ScannerConfig {
            min_length: 4,
            max_length: 8,
            timeout: 50,
            cooldown_ms: 250,
        };
        let rules = ScanRules::from(&config);
        assert_eq!(rules.timeout, Duration::from_millis(50));
        assert_eq!(rules.cooldown, Duration::from_millis(250));
        assert!(rules.is_valid("AB12"));
        assert!(!rules.is_valid("AB1"));
        assert!(!rules.is_valid("ab12"));
    }

    proptest! {
        /// A burst of 6..=20 alphanumerics plus a newline yields exactly one
        /// valid scan carrying the upper-cased code.
        #[test]
        fn prop_burst_yields_single_valid_scan(code in "[A-Za-z0-9]{6,20}") {
            let mut buffer = ScanBuffer::new(ScanRules::default());
            let input = format!("{code}\n");
            let events = feed_all(&mut buffer, &input, Instant::now(), Duration::from_millis(2));

            prop_assert_eq!(events.len(), 1);
            prop_assert_eq!(&events[0].code, &code.to_uppercase());
            prop_assert!(events[0].valid);
        }

        /// Keys typed slower than the timeout never produce a scan.
        #[test]
        fn prop_slow_typing_is_ignored(code in "[A-Z0-9]{1,20}", gap_ms in 101u64..1000) {
            let mut buffer = ScanBuffer::new(ScanRules::default());
            let start = Instant::now();
            let spacing = Duration::from_millis(gap_ms);
            let events = feed_all(&mut buffer, &code, start, spacing);

            prop_assert!(events.is_empty());
            prop_assert!(buffer.tick(start + spacing * (code.len() as u32 + 1)).is_none());
        }
    }
}
