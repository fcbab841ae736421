//! Access code entry.

use std::time::Duration;

use argus_core::{hash_access_code, FourKeyHash};
use tokio::time::Instant;

use super::protocol::Button;

/// Digits in an access code.
pub const CODE_LENGTH: usize = 4;

/// Idle time after which partial input is discarded.
pub const CODE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeOutcome {
    /// Waiting for more digits.
    Pending,
    /// A full code matching a known user.
    Accepted,
    /// A full code matching nobody.
    Rejected,
}

/// Accumulates digits and checks complete codes against user hashes.
#[derive(Debug)]
pub struct CodeEntry {
    salt: String,
    codes: Vec<FourKeyHash>,
    digits: String,
    last_press: Option<Instant>,
}

impl CodeEntry {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            codes: Vec::new(),
            digits: String::new(),
            last_press: None,
        }
    }

    pub fn set_codes(&mut self, codes: Vec<FourKeyHash>) {
        self.codes = codes;
    }

    pub fn pending_digits(&self) -> usize {
        self.digits.len()
    }

    pub fn clear(&mut self) {
        self.digits.clear();
    }

    /// Drops partial input older than [`CODE_TIMEOUT`]. Returns true if
    /// anything was dropped.
    pub fn expire(&mut self, now: Instant) -> bool {
        let stale = self
            .last_press
            .is_some_and(|last| now.saturating_duration_since(last) > CODE_TIMEOUT);
        if stale && !self.digits.is_empty() {
            self.digits.clear();
            return true;
        }
        false
    }

    pub fn press(&mut self, button: Button, now: Instant) -> CodeOutcome {
        self.last_press = Some(now);

        let Button::Digit(digit) = button else {
            return CodeOutcome::Pending;
        };
        self.digits.push(char::from(b'0' + digit));
        if self.digits.len() < CODE_LENGTH {
            return CodeOutcome::Pending;
        }

        let hash = hash_access_code(&self.digits, &self.salt);
        self.digits.clear();
        if self.codes.contains(&hash) {
            CodeOutcome::Accepted
        } else {
            CodeOutcome::Rejected
        }
    }
}
