//! Observability Registry
//!
//! Owns the detection, compliance and tracing components built from one
//! [`PipelineConfig`] and hands out shared references to them.

use crate::analytics::anomaly::{
    AdaptiveThresholdDetector, EnsembleDetector, HybridCombiner, HybridDetectionResult,
    SystemHealth,
};
use crate::config::types::PipelineConfig;
use crate::error::{Error, Result};
use crate::monitoring::sla::{ComplianceReport, SlaComplianceMonitor, SlaComplianceRecord};
use crate::monitoring::tracing_optimizer::{PerformanceReport, Span, SpanStatus, TracingOptimizer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Decides whether data reported by a component may be ingested
pub trait IdentityValidator: Send + Sync {
    fn validate(&self, component: &str) -> bool;
}

/// Accepts every component
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl IdentityValidator for AllowAll {
    fn validate(&self, _component: &str) -> bool {
        true
    }
}

/// Accepts only the listed components
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    components: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            components: components.into_iter().map(Into::into).collect(),
        }
    }
}

impl IdentityValidator for AllowList {
    fn validate(&self, component: &str) -> bool {
        self.components.contains(component)
    }
}

/// Point-in-time view across all components
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilitySnapshot {
    pub system_health: SystemHealth,
    pub compliance: ComplianceReport,
    pub performance: PerformanceReport,
    pub timestamp: DateTime<Utc>,
}

/// Registry of pipeline components
#[derive(Clone)]
pub struct ObservabilityRegistry {
    config: Arc<PipelineConfig>,
    combiner: Arc<HybridCombiner>,
    sla: Arc<SlaComplianceMonitor>,
    tracing: Arc<TracingOptimizer>,
    validator: Arc<dyn IdentityValidator>,
}

impl fmt::Debug for ObservabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityRegistry")
            .field("mode", &self.combiner.mode())
            .finish_non_exhaustive()
    }
}

impl ObservabilityRegistry {
    /// Validate the configuration and construct every component
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let production = Arc::new(AdaptiveThresholdDetector::new(config.production.clone()));
        let ensemble = Arc::new(EnsembleDetector::new(config.ensemble.clone()));
        let combiner = Arc::new(HybridCombiner::new(&config.hybrid, production, ensemble));
        let sla = Arc::new(SlaComplianceMonitor::new(config.sla.clone()));
        let tracing = Arc::new(TracingOptimizer::new(config.tracing.clone()));

        info!("Observability registry initialized");
        Ok(Self {
            config: Arc::new(config),
            combiner,
            sla,
            tracing,
            validator: Arc::new(AllowAll),
        })
    }

    /// Replace the identity validator
    pub fn with_identity_validator(mut self, validator: Arc<dyn IdentityValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn combiner(&self) -> &Arc<HybridCombiner> {
        &self.combiner
    }

    pub fn production(&self) -> &Arc<AdaptiveThresholdDetector> {
        self.combiner.production()
    }

    pub fn ensemble(&self) -> &Arc<EnsembleDetector> {
        self.combiner.ensemble()
    }

    pub fn sla(&self) -> &Arc<SlaComplianceMonitor> {
        &self.sla
    }

    pub fn tracing(&self) -> &Arc<TracingOptimizer> {
        &self.tracing
    }

    fn authorize(&self, component: &str) -> Result<()> {
        if self.validator.validate(component) {
            Ok(())
        } else {
            warn!(component, "Rejected data from unauthorized component");
            Err(Error::Unauthorized(component.to_string()))
        }
    }

    /// Fit the ensemble for a metric on historical data
    pub fn train_ensemble(&self, metric_name: &str, data: &[f64]) -> Result<()> {
        self.combiner.train_ensemble(metric_name, data)
    }

    /// Run a metric sample through the hybrid detector
    pub fn ingest_metric(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<Option<HybridDetectionResult>> {
        self.ingest_metric_at(component, metric_name, value, Utc::now())
    }

    pub fn ingest_metric_at(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HybridDetectionResult>> {
        self.authorize(component)?;
        self.combiner
            .detect_at(component, metric_name, value, timestamp)
    }

    /// Record a value for SLA evaluation
    pub fn record_sla_metric(
        &self,
        component: &str,
        metric_name: &str,
        value: f64,
    ) -> Result<Vec<SlaComplianceRecord>> {
        self.authorize(component)?;
        self.sla.record_metric(metric_name, value)
    }

    /// Ingest a span; the span's service is the reporting component
    pub fn ingest_span(&self, span: Span) -> Result<()> {
        self.authorize(&span.service_name)?;
        self.tracing.process_span(span)
    }

    /// End a previously ingested span
    pub fn end_span(
        &self,
        trace_id: &str,
        span_id: &str,
        end_time: DateTime<Utc>,
        status: SpanStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        self.tracing
            .end_span(trace_id, span_id, end_time, status, error_message)
    }

    pub fn snapshot(&self) -> ObservabilitySnapshot {
        ObservabilitySnapshot {
            system_health: self.combiner.get_system_health(),
            compliance: self.sla.get_compliance_report(),
            performance: self.tracing.get_performance_report(),
            timestamp: Utc::now(),
        }
    }
}
