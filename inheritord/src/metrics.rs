use crate::errors::Error;
use crate::reconciler::Outcome;

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

const NAMESPACE: &str = "node_label_inheritor";

/*
 * Reconciliation metrics, exposed on /metrics.
 *
 *  - node_label_inheritor_reconcile_total{outcome}
 *  - node_label_inheritor_reconcile_errors_total{kind}
 *  - node_label_inheritor_labels_updated_total
 *
 * Label values are bounded by `Outcome::as_label` and `Error::kind`.
 */
#[derive(Clone)]
pub struct Metrics {
    reconciles: IntCounterVec,
    errors: IntCounterVec,
    labels_updated: IntCounter,
    registry: Arc<Registry>,
}

impl Metrics {

    pub fn new() -> Result<Self, prometheus::Error> {
	let registry = Arc::new(Registry::new());

	let reconciles = IntCounterVec::new(
	    Opts::new("reconcile_total", "Reconciliation attempts that succeeded, by outcome").namespace(NAMESPACE),
	    &["outcome"],
	)?;
	registry.register(Box::new(reconciles.clone()))?;

	let errors = IntCounterVec::new(
	    Opts::new("reconcile_errors_total", "Reconciliation attempts that failed, by error kind").namespace(NAMESPACE),
	    &["kind"],
	)?;
	registry.register(Box::new(errors.clone()))?;

	let labels_updated = IntCounter::with_opts(
	    Opts::new("labels_updated_total", "Pod labels copied from nodes").namespace(NAMESPACE),
	)?;
	registry.register(Box::new(labels_updated.clone()))?;

	Ok(Self{
	    reconciles,
	    errors,
	    labels_updated,
	    registry,
	})
    }

    pub fn record_outcome(&self, outcome: &Outcome) {
	self.reconciles.with_label_values(&[outcome.as_label()]).inc();

	if let Outcome::Updated(labels) = outcome {
	    self.labels_updated.inc_by(labels.len() as u64);
	}
    }

    pub fn record_error(&self, err: &Error) {
	self.errors.with_label_values(&[err.kind()]).inc();
    }

    /*
     * Renders every metric in the prometheus text exposition format.
     */
    pub fn encode(&self) -> Result<String, prometheus::Error> {
	TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inheritor_api::Labels;

    #[test]
    fn records_outcomes() {
	let metrics = Metrics::new().unwrap();
	let updated: Labels = [("zone".to_string(), "a".to_string()), ("rack".to_string(), "7".to_string())].into();

	metrics.record_outcome(&Outcome::InSync);
	metrics.record_outcome(&Outcome::InSync);
	metrics.record_outcome(&Outcome::Updated(updated));

	let text = metrics.encode().unwrap();
	assert!(text.contains("node_label_inheritor_reconcile_total{outcome=\"in_sync\"} 2"));
	assert!(text.contains("node_label_inheritor_reconcile_total{outcome=\"updated\"} 1"));
	assert!(text.contains("node_label_inheritor_labels_updated_total 2"));
    }

    #[test]
    fn records_errors_by_kind() {
	let metrics = Metrics::new().unwrap();

	metrics.record_error(&Error::Conflict("default/web-0".to_string()));

	let text = metrics.encode().unwrap();
	assert!(text.contains("node_label_inheritor_reconcile_errors_total{kind=\"conflict\"} 1"));
	assert!(!text.contains("kind=\"cancelled\""));
    }

    #[test]
    fn fresh_registry_has_no_samples() {
	let metrics = Metrics::new().unwrap();

	let text = metrics.encode().unwrap();
	assert!(text.contains("node_label_inheritor_labels_updated_total 0"));
	assert!(!text.contains("outcome="));
    }
}
