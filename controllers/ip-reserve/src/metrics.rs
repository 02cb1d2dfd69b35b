//! Prometheus instruments of the retention engine.

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Owned registry plus the three engine instruments
///
/// Cloning shares the underlying instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Addresses covered by the reservation list, sentinel excluded
    pub reserved_count: IntGauge,
    /// Configured `max_retained_count`
    pub reserved_count_max: IntGauge,
    /// Capacity-driven evictions since start
    pub evictions: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reserved_count = IntGauge::new("ip_reserve_count", "Number of pod IPs currently reserved")?;
        let reserved_count_max = IntGauge::new(
            "ip_reserve_count_max",
            "Maximum number of pod IPs kept reserved before eviction",
        )?;
        let evictions = IntCounter::new(
            "ip_reserve_evictions_count",
            "Reserved pod IPs released early because the maximum count was exceeded",
        )?;

        registry.register(Box::new(reserved_count.clone()))?;
        registry.register(Box::new(reserved_count_max.clone()))?;
        registry.register(Box::new(evictions.clone()))?;

        Ok(Self {
            registry,
            reserved_count,
            reserved_count_max,
            evictions,
        })
    }

    /// Prometheus text exposition of every registered instrument.
    pub fn render(&self) -> Result<String, ControllerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::Metrics(prometheus::Error::Msg(e.to_string())))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("reserved_count", &self.reserved_count.get())
            .field("reserved_count_max", &self.reserved_count_max.get())
            .field("evictions", &self.evictions.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_instruments() {
        let metrics = Metrics::new().unwrap();
        metrics.reserved_count.set(7);
        metrics.reserved_count_max.set(200);
        metrics.evictions.inc_by(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("ip_reserve_count 7"));
        assert!(text.contains("ip_reserve_count_max 200"));
        assert!(text.contains("ip_reserve_evictions_count 3"));
    }

    #[test]
    fn test_clones_share_instruments() {
        let metrics = Metrics::new().unwrap();
        let clone = metrics.clone();
        clone.evictions.inc();
        assert_eq!(metrics.evictions.get(), 1);
    }
}
