//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Envelope activity logging and Prometheus metrics."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

use crate::types::{Message, Response};

/// Direction of the envelope movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Request sent to another module.
    Outbound,
    /// Request received by a subscription.
    Inbound,
}

/// Emit a structured log entry for envelope activity.
pub fn log_message(direction: MessageDirection, subject: &str, message: &Message) {
    debug!(
        subject,
        command = %message.command,
        args_len = message.args.len(),
        meta_keys = message.meta.len(),
        direction = ?direction,
        "messaging activity"
    );
}

/// Emit a structured log entry for a reply leaving this module.
pub fn log_response(subject: &str, response: &Response) {
    debug!(
        subject,
        status = %response.status,
        has_data = response.data.is_some(),
        "reply sent"
    );
}

/// Prometheus metric handles for SDK activity.
pub struct SdkMetrics {
    requests: IntCounter,
    request_failures: IntCounter,
    replies_sent: IntCounter,
    responses_published: IntCounter,
    decode_failures: IntCounter,
    latency: Histogram,
}

impl SdkMetrics {
    /// Register SDK metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounter::with_opts(Opts::new(
            "onql_requests_total",
            "Requests issued to other modules",
        ))?;
        let request_failures = IntCounter::with_opts(Opts::new(
            "onql_request_failures_total",
            "Requests that failed with a transport or codec error",
        ))?;
        let replies_sent = IntCounter::with_opts(Opts::new(
            "onql_replies_sent_total",
            "Direct replies sent by subscription handlers",
        ))?;
        let responses_published = IntCounter::with_opts(Opts::new(
            "onql_responses_published_total",
            "Responses broadcast on the module response subject",
        ))?;
        let decode_failures = IntCounter::with_opts(Opts::new(
            "onql_decode_failures_total",
            "Inbound payloads that could not be decoded",
        ))?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "onql_request_latency_seconds",
            "Observed latency between request and reply",
        ))?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(request_failures.clone()))?;
        registry.register(Box::new(replies_sent.clone()))?;
        registry.register(Box::new(responses_published.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            requests,
            request_failures,
            replies_sent,
            responses_published,
            decode_failures,
            latency,
        })
    }

    pub fn observe_request(&self) {
        self.requests.inc();
    }

    pub fn observe_request_failure(&self) {
        self.request_failures.inc();
    }

    pub fn observe_reply_sent(&self) {
        self.replies_sent.inc();
    }

    pub fn observe_response_published(&self) {
        self.responses_published.inc();
    }

    pub fn observe_decode_failure(&self) {
        self.decode_failures.inc();
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn request_failures(&self) -> u64 {
        self.request_failures.get()
    }

    pub fn replies_sent(&self) -> u64 {
        self.replies_sent.get()
    }

    pub fn responses_published(&self) -> u64 {
        self.responses_published.get()
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_count() {
        let registry = Registry::new();
        let metrics = SdkMetrics::register(&registry).expect("register metrics");
        metrics.observe_request();
        metrics.observe_request_failure();
        metrics.observe_reply_sent();
        metrics.observe_decode_failure();
        metrics.observe_latency(Duration::from_millis(10));

        assert_eq!(metrics.requests(), 1);
        assert_eq!(metrics.responses_published(), 0);
        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "onql_request_latency_seconds"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = Registry::new();
        SdkMetrics::register(&registry).expect("first registration");
        assert!(SdkMetrics::register(&registry).is_err());
    }
}
