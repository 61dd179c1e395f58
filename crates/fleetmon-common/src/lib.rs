//! Shared data model for the fleet container-metrics collector.
//!
//! Registry rows ([`types::Node`], [`types::Tunnel`]), runtime observations
//! ([`types::ContainerTarget`], [`types::CounterSample`]) and the derived
//! [`types::RateMetric`] / [`types::MetricPoint`] values that flow to the sink.

pub mod types;
