use k8s_openapi::api::core::v1::Pod as KubePod;
use kube::runtime::reflector::ObjectRef;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/*
 * Per-pod retry delays for failed reconciliations: the first failure waits
 * `base`, every further consecutive failure doubles it, up to `max`. A
 * successful attempt forgets the pod.
 */
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectRef<KubePod>, u32>>,
}

impl Backoff {

    pub fn new(base: Duration, max: Duration) -> Self {
	Self{
	    base: base,
	    max: max.max(base),
	    failures: Mutex::new(HashMap::new()),
	}
    }

    fn delay_for(&self, failures: u32) -> Duration {
	let exponent = failures.saturating_sub(1).min(31);
	self.base.saturating_mul(1u32 << exponent).min(self.max)
    }

    /*
     * Records one more failure for `pod_ref` and returns how long to wait
     * before retrying it.
     */
    pub fn next_delay(&self, pod_ref: &ObjectRef<KubePod>) -> Duration {
	let failures = match self.failures.lock() {
	    Ok(mut failures) => {
		let count = failures.entry(pod_ref.clone()).or_insert(0);
		*count = count.saturating_add(1);
		*count
	    },
	    Err(_) => 1,
	};

	self.delay_for(failures)
    }

    pub fn reset(&self, pod_ref: &ObjectRef<KubePod>) {
	if let Ok(mut failures) = self.failures.lock() {
	    failures.remove(pod_ref);
	}
    }
}
