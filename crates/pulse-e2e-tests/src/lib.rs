//! End-to-end integration tests for Pulse.
//!
//! These tests exercise the full pipeline:
//! - Webhook payload parsing and classification
//! - Bucketed aggregation and idempotent replay
//! - Anomaly detection and notification
//! - Queue backpressure at the ingestion boundary
//! - The worker loop with retry and dead-lettering

#![cfg(test)]
