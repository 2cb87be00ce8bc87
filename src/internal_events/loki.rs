use std::time::Duration;

use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct LokiQuerySent<'a> {
    pub url: &'a str,
}

impl InternalEvent for LokiQuerySent<'_> {
    fn emit(self) {
        info!(message = "Querying Loki.", url = %self.url);
    }
}

#[derive(Debug)]
pub enum LokiAttemptFailure<'a> {
    Transport(&'a (dyn std::error::Error + Send + Sync)),
    TimedOut(Duration),
    Status { status: http::StatusCode, body: &'a str },
}

#[derive(Debug)]
pub struct LokiQueryAttemptFailed<'a> {
    pub url: &'a str,
    pub attempt: usize,
    pub remaining: usize,
    pub failure: LokiAttemptFailure<'a>,
}

impl InternalEvent for LokiQueryAttemptFailed<'_> {
    fn emit(self) {
        match self.failure {
            LokiAttemptFailure::Transport(error) => warn!(
                message = "Error sending request.",
                url = %self.url,
                attempt = %self.attempt,
                attempts_remaining = %self.remaining,
                %error,
            ),
            LokiAttemptFailure::TimedOut(timeout) => warn!(
                message = "Request timed out.",
                url = %self.url,
                attempt = %self.attempt,
                attempts_remaining = %self.remaining,
                timeout_secs = %timeout.as_secs_f64(),
            ),
            LokiAttemptFailure::Status { status, body } => warn!(
                message = "Error response from server.",
                url = %self.url,
                attempt = %self.attempt,
                attempts_remaining = %self.remaining,
                status = %status,
                body = %body,
            ),
        }
        counter!("loki_query_attempts_failed_total").increment(1);
    }
}

#[derive(Debug)]
pub struct LokiQueryRetriesExhausted<'a> {
    pub url: &'a str,
    pub attempts: usize,
}

impl InternalEvent for LokiQueryRetriesExhausted<'_> {
    fn emit(self) {
        error!(
            message = "Ran out of attempts while querying the server.",
            url = %self.url,
            attempts = %self.attempts,
        );
        counter!("loki_query_errors_total", "error_type" => "retries_exhausted").increment(1);
    }
}

#[derive(Debug)]
pub struct LokiQueryCompleted<'a> {
    pub url: &'a str,
    pub attempts: usize,
}

impl InternalEvent for LokiQueryCompleted<'_> {
    fn emit(self) {
        debug!(
            message = "Loki query completed.",
            url = %self.url,
            attempts = %self.attempts,
        );
        counter!("loki_queries_total").increment(1);
    }
}
