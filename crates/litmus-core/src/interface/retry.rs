use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed probe (0-based): doubles, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// TCP connect to a host:port.
pub struct TcpProbe {
    pub addr: String,
    pub timeout: Duration,
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_connected(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

/// Probes until connected, at most `policy.max_attempts` times, sleeping
/// with a doubling delay between probes. Returns false on exhaustion or
/// cancellation.
pub async fn retry_on_internet(
    policy: &RetryPolicy,
    probe: &dyn ConnectivityProbe,
    cancel: &CancellationToken,
) -> bool {
    for attempt in 0..policy.max_attempts {
        if cancel.is_cancelled() {
            return false;
        }
        if probe.is_connected().await {
            return true;
        }
        if attempt + 1 == policy.max_attempts {
            break;
        }
        let delay = policy.delay_for(attempt);
        tracing::warn!(
            event = "connectivity.retry",
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "not connected, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    false
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Evaluates `condition` every `interval` until it holds, `timeout` elapses
/// or `cancel` fires.
pub async fn poll_until<F, Fut>(
    mut condition: F,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PollOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if condition().await {
            return PollOutcome::Ready;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return PollOutcome::TimedOut;
        }
        let wait = interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingProbe {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    #[async_trait]
    impl ConnectivityProbe for CountingProbe {
        async fn is_connected(&self) -> bool {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_on == Some(n)
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(500));
        assert_eq!(p.delay_for(40), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn probes_at_most_max_attempts() {
        let probe = CountingProbe { calls: AtomicU32::new(0), succeed_on: None };
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
        };
        let start = tokio::time::Instant::now();
        let ok = retry_on_internet(&policy, &probe, &CancellationToken::new()).await;
        assert!(!ok);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        // 10 + 20 + 25 (capped); no sleep after the last probe
        assert_eq!(start.elapsed(), Duration::from_millis(55));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_connected() {
        let probe = CountingProbe { calls: AtomicU32::new(0), succeed_on: Some(2) };
        let ok = retry_on_internet(&RetryPolicy::default(), &probe, &CancellationToken::new()).await;
        assert!(ok);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start() {
        let probe = CountingProbe { calls: AtomicU32::new(0), succeed_on: Some(1) };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!retry_on_internet(&RetryPolicy::default(), &probe, &cancel).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_until_ready_and_timeout() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let out = poll_until(
            move || {
                let h = h.clone();
                async move { h.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_millis(100),
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(out, PollOutcome::Ready);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        let out = poll_until(
            || async { false },
            Duration::from_millis(100),
            Duration::from_millis(350),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(out, PollOutcome::TimedOut);
    }
}
