/// Full-jitter exponential backoff.
///
/// Each delay is drawn uniformly from `0..=ceiling`. The ceiling starts at
/// the minimum delay and doubles after every attempt until it reaches half
/// the maximum, after which it is pinned to the maximum.
///
/// ```rust
/// use tuyalink::system::backoff::Backoff;
///
/// let mut backoff = Backoff::new(1000, 8000, None);
/// assert_eq!(backoff.next_delay(u32::MAX), Some(u32::MAX % 1001));
/// assert_eq!(backoff.ceiling(), 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    min_delay_ms: u32,
    max_delay_ms: u32,
    max_attempts: Option<u32>,
    attempts: u32,
    next_jitter_max: u32,
}

impl Backoff {
    /// Creates a backoff; `max_attempts == None` retries forever.
    pub fn new(min_delay_ms: u32, max_delay_ms: u32, max_attempts: Option<u32>) -> Self {
        Self {
            min_delay_ms,
            max_delay_ms,
            max_attempts,
            attempts: 0,
            next_jitter_max: min_delay_ms,
        }
    }

    /// Current upper bound of the next delay.
    pub fn ceiling(&self) -> u32 {
        self.next_jitter_max
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Computes the next delay from `random`, or `None` once the attempt
    /// limit is reached.
    pub fn next_delay(&mut self, random: u32) -> Option<u32> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts = self.attempts.saturating_add(1);

        let delay = random % self.next_jitter_max.saturating_add(1);
        if self.next_jitter_max < self.max_delay_ms / 2 {
            self.next_jitter_max += self.next_jitter_max;
        } else {
            self.next_jitter_max = self.max_delay_ms;
        }
        Some(delay)
    }

    /// Starts over from the minimum delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_jitter_max = self.min_delay_ms;
    }
}
