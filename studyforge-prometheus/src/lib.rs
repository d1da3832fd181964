//! Prometheus metrics sink for `studyforge`.
//! Bring your own `prometheus::Registry`; counters are registered and incremented.
//!
//! - `studyforge_events_total{event, kind}`: every generation event.
//! - `studyforge_credits_total{direction, kind}`: credits debited, refunded, and
//!   lost to failed refunds (`direction = "debited" | "refunded" | "unrefunded"`).

use prometheus::{IntCounterVec, Opts, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use studyforge::telemetry::{GenerationEvent, TelemetrySink};

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    events: IntCounterVec,
    credits: IntCounterVec,
}

impl PrometheusSink {
    /// Create a sink and register counters into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let events = IntCounterVec::new(
            Opts::new("studyforge_events_total", "Generation events"),
            &["event", "kind"],
        )?;
        let credits = IntCounterVec::new(
            Opts::new("studyforge_credits_total", "Credits moved by generation requests"),
            &["direction", "kind"],
        )?;
        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(credits.clone()))?;
        Ok(Self { registry, events, credits })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<GenerationEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GenerationEvent) -> Self::Future {
        let kind = event.kind().as_str();
        self.events.with_label_values(&[event.name(), kind]).inc();

        let moved = match &event {
            GenerationEvent::Debited { amount, .. } => Some(("debited", *amount)),
            GenerationEvent::Refunded { amount, .. } => Some(("refunded", *amount)),
            GenerationEvent::RefundFailed { amount, .. } => Some(("unrefunded", *amount)),
            _ => None,
        };
        if let Some((direction, amount)) = moved {
            self.credits.with_label_values(&[direction, kind]).inc_by(u64::from(amount));
        }
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
