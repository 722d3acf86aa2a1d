use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub realtime_events_total: IntCounterVec,
    pub reconnects_total: IntCounter,
    pub gateway_requests_total: IntCounterVec,
    pub gateway_latency_seconds: HistogramVec,
    pub connection_warnings_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let realtime_events_total = IntCounterVec::new(
            Opts::new("realtime_events_total", "Inbound realtime events by name"),
            &["event"],
        )
        .expect("valid realtime_events_total metric");

        let reconnects_total =
            IntCounter::new("reconnects_total", "Realtime connections re-established")
                .expect("valid reconnects_total metric");

        let gateway_requests_total = IntCounterVec::new(
            Opts::new("gateway_requests_total", "Backend requests by operation and outcome"),
            &["operation", "outcome"],
        )
        .expect("valid gateway_requests_total metric");

        let gateway_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "gateway_latency_seconds",
                "Latency of backend requests in seconds",
            ),
            &["operation"],
        )
        .expect("valid gateway_latency_seconds metric");

        let connection_warnings_total = IntCounter::new(
            "connection_warnings_total",
            "Warnings raised for rides outliving a disconnect",
        )
        .expect("valid connection_warnings_total metric");

        registry
            .register(Box::new(realtime_events_total.clone()))
            .expect("register realtime_events_total");
        registry
            .register(Box::new(reconnects_total.clone()))
            .expect("register reconnects_total");
        registry
            .register(Box::new(gateway_requests_total.clone()))
            .expect("register gateway_requests_total");
        registry
            .register(Box::new(gateway_latency_seconds.clone()))
            .expect("register gateway_latency_seconds");
        registry
            .register(Box::new(connection_warnings_total.clone()))
            .expect("register connection_warnings_total");

        Self {
            registry,
            realtime_events_total,
            reconnects_total,
            gateway_requests_total,
            gateway_latency_seconds,
            connection_warnings_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn encoded_output_lists_registered_families() {
        let metrics = Metrics::new();
        metrics.reconnects_total.inc();
        metrics
            .gateway_requests_total
            .with_label_values(&["accept_ride", "success"])
            .inc();

        let body = metrics.encode().unwrap();
        assert!(body.contains("reconnects_total 1"));
        assert!(body.contains("gateway_requests_total"));
    }
}
