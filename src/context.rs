use std::{future::Future, time::Duration};

use snafu::Snafu;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why an operation stopped before completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum Interrupted {
    #[snafu(display("deadline exceeded"))]
    DeadlineExceeded,
    #[snafu(display("operation cancelled"))]
    Cancelled,
}

/// Deadline and cancellation signal threaded through every cloud and cluster call.
///
/// Cloning shares the cancellation token, so cancelling any clone interrupts every call
/// running under the same context.
#[derive(Clone, Debug, Default)]
pub struct OperationContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// A context that is cancelled with `self` and can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            deadline: self.deadline,
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drives `fut` to completion unless the context is cancelled or its deadline passes first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| Interrupted::DeadlineExceeded),
                None => Ok(fut.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            output = bounded => output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_without_deadline() {
        let ctx = OperationContext::new();
        assert_eq!(ctx.run(async { 42 }).await, Ok(42));
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_calls() {
        let ctx = OperationContext::with_timeout(Duration::from_secs(5));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let ctx = OperationContext::new();
        ctx.cancel();
        assert_eq!(ctx.run(async { 1 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_calls() {
        let ctx = OperationContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = OperationContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());

        let parent = OperationContext::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let start = Instant::now();
        let ctx = OperationContext::with_timeout(Duration::from_secs(10))
            .deadline(start + Duration::from_secs(2))
            .deadline(start + Duration::from_secs(30));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));
    }
}
