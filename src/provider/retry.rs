use std::time::Duration;

use rand::Rng;

/// Exponential backoff over provider API calls: 1s initial, doubling, capped
/// at 30s, at most 6 attempts. Each delay is slightly randomized so parallel
/// workers don't retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryBackoff {
    current_delay: Duration,
    attempt: usize,
}

pub const MAX_ATTEMPTS: usize = 6;
const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);
const FACTOR: f64 = 2.0;

impl RetryBackoff {
    pub fn new() -> Self {
        RetryBackoff {
            current_delay: INITIAL_DELAY,
            attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once the attempt budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        // First call corresponds to the retry after the initial attempt, so
        // the budget counts attempts, not sleeps.
        if self.attempt + 1 >= MAX_ATTEMPTS {
            return None;
        }
        self.attempt += 1;

        let jitter = rand::thread_rng().gen_range(1.0..1.1);
        let delay = self.current_delay.mul_f64(jitter);

        self.current_delay = self.current_delay.mul_f64(FACTOR);
        if self.current_delay > MAX_DELAY {
            self.current_delay = MAX_DELAY;
        }

        Some(delay.min(MAX_DELAY))
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_bounded() {
        let mut backoff = RetryBackoff::new();
        let mut delays = Vec::new();
        while let Some(d) = backoff.next_delay() {
            delays.push(d);
        }
        // 6 attempts total means 5 sleeps between them.
        assert_eq!(delays.len(), MAX_ATTEMPTS - 1);
        assert!(delays[0] >= Duration::from_secs(1));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0].mul_f64(1.5), "delays should grow: {:?}", delays);
        }
    }
}
