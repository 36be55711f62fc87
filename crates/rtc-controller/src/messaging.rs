//! Custom command and SEI message limits.
//!
//! Both channels share one rolling budget per session: 30 messages and
//! 8 KiB per second. An SEI message repeated `n` times costs `n` messages.

use crate::errors::{StateConflict, ValidationError};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Largest custom command payload.
pub const MAX_CMD_MSG_BYTES: usize = 1024;

/// Largest SEI payload.
pub const MAX_SEI_MSG_BYTES: usize = 1000;

pub const MAX_MSGS_PER_WINDOW: usize = 30;

pub const MAX_BYTES_PER_WINDOW: usize = 8192;

pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Valid custom command ids.
pub const CMD_ID_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

pub fn validate_custom_cmd(
    cmd_id: u32,
    data: &[u8],
    reliable: bool,
    ordered: bool,
) -> Result<(), ValidationError> {
    if !CMD_ID_RANGE.contains(&cmd_id) {
        return Err(ValidationError::InvalidCmdId);
    }
    if reliable != ordered {
        return Err(ValidationError::ReliabilityMismatch);
    }
    check_payload(data, MAX_CMD_MSG_BYTES)
}

pub fn validate_sei(data: &[u8], repeat_count: u32) -> Result<(), ValidationError> {
    if repeat_count == 0 {
        return Err(ValidationError::InvalidRepeatCount);
    }
    check_payload(data, MAX_SEI_MSG_BYTES)
}

fn check_payload(data: &[u8], max: usize) -> Result<(), ValidationError> {
    if data.is_empty() {
        return Err(ValidationError::EmptyPayload);
    }
    if data.len() > max {
        return Err(ValidationError::PayloadTooLarge {
            size: data.len(),
            max,
        });
    }
    Ok(())
}

/// Sliding one-second window over sent messages.
#[derive(Debug, Default)]
pub struct CustomMessageLimiter {
    sent: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl CustomMessageLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn expire(&mut self, now: Instant) {
        while let Some((at, size)) = self.sent.front().copied() {
            if now.duration_since(at) < RATE_WINDOW {
                break;
            }
            self.sent.pop_front();
            self.bytes_in_window = self.bytes_in_window.saturating_sub(size);
        }
    }

    /// Reserve `count` messages of `size` bytes each, or fail without
    /// reserving anything.
    pub fn try_acquire(&mut self, count: usize, size: usize) -> Result<(), StateConflict> {
        let now = Instant::now();
        self.expire(now);

        let bytes = count.saturating_mul(size);
        if self.sent.len() + count > MAX_MSGS_PER_WINDOW
            || self.bytes_in_window + bytes > MAX_BYTES_PER_WINDOW
        {
            return Err(StateConflict::RateLimited);
        }
        for _ in 0..count {
            self.sent.push_back((now, size));
        }
        self.bytes_in_window += bytes;
        Ok(())
    }

    /// Messages counted in the current window.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.sent.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_validation() {
        assert!(validate_custom_cmd(1, b"hi", true, true).is_ok());
        assert_eq!(
            validate_custom_cmd(0, b"hi", true, true),
            Err(ValidationError::InvalidCmdId)
        );
        assert_eq!(
            validate_custom_cmd(11, b"hi", true, true),
            Err(ValidationError::InvalidCmdId)
        );
        assert_eq!(
            validate_custom_cmd(3, b"hi", true, false),
            Err(ValidationError::ReliabilityMismatch)
        );
        assert_eq!(
            validate_custom_cmd(3, &[0u8; 1025], false, false),
            Err(ValidationError::PayloadTooLarge {
                size: 1025,
                max: 1024
            })
        );
        assert!(validate_custom_cmd(3, &[0u8; 1024], false, false).is_ok());
    }

    #[test]
    fn test_sei_validation() {
        assert_eq!(
            validate_sei(b"x", 0),
            Err(ValidationError::InvalidRepeatCount)
        );
        assert_eq!(validate_sei(b"", 1), Err(ValidationError::EmptyPayload));
        assert!(matches!(
            validate_sei(&[0u8; 1001], 1),
            Err(ValidationError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_count_window() {
        let mut limiter = CustomMessageLimiter::new();
        for _ in 0..MAX_MSGS_PER_WINDOW {
            limiter.try_acquire(1, 10).unwrap();
        }
        assert_eq!(limiter.try_acquire(1, 10), Err(StateConflict::RateLimited));

        tokio::time::advance(RATE_WINDOW).await;
        assert!(limiter.try_acquire(1, 10).is_ok());
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_byte_budget_window() {
        let mut limiter = CustomMessageLimiter::new();
        for _ in 0..8 {
            limiter.try_acquire(1, 1024).unwrap();
        }
        assert_eq!(limiter.try_acquire(1, 1), Err(StateConflict::RateLimited));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.try_acquire(1, 1), Err(StateConflict::RateLimited));

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(limiter.try_acquire(1, 1024).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeats_are_all_or_nothing() {
        let mut limiter = CustomMessageLimiter::new();
        limiter.try_acquire(25, 10).unwrap();
        assert_eq!(limiter.try_acquire(6, 10), Err(StateConflict::RateLimited));
        assert_eq!(limiter.in_flight(), 25);
        assert!(limiter.try_acquire(5, 10).is_ok());
    }
}
