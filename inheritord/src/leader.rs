use k8s_openapi::api::coordination::v1::Lease as KubeLease;
use k8s_openapi::api::coordination::v1::LeaseSpec as KubeLeaseSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use k8s_openapi::chrono::{DateTime, Utc};
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Error as KubeError;
use kube::api::ObjectMeta;
use kube::api::PostParams as KubePostParams;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/*
 * Why this replica stopped leading.
 */
#[derive(Error, Debug)]
pub enum LeaseError {

    #[error("leader lease {0} was taken over")]
    TakenOver(String),

    #[error("leader lease {0} expired before it could be renewed")]
    Expired(String),
}

/*
 * LeaderElector keeps at most one inheritord replica reconciling, using a
 * coordination.k8s.io/v1 Lease the same way controller-runtime based
 * controllers do. Writes to the Lease are guarded by its resourceVersion.
 */
pub struct LeaderElector {
    lease_api: KubeApi<KubeLease>,
    lease_name: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
}

/*
 * A lease is free when nobody holds it or its holder stopped renewing it.
 */
pub fn is_expired(spec: &KubeLeaseSpec, now: DateTime<Utc>) -> bool {
    let holder = spec.holder_identity.as_deref().unwrap_or_default();
    if holder.is_empty() {
	return true;
    }

    let renewed = match &spec.renew_time {
	Some(MicroTime(renewed)) => *renewed,
	None => return true,
    };
    let duration = spec.lease_duration_seconds.unwrap_or_default();

    renewed + k8s_openapi::chrono::Duration::seconds(i64::from(duration)) < now
}

/*
 * The LeaseSpec `identity` writes when acquiring or renewing the lease.
 */
pub fn claim(previous: Option<&KubeLeaseSpec>, identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> KubeLeaseSpec {
    let mut spec = previous.cloned().unwrap_or_default();
    let renewing = spec.holder_identity.as_deref() == Some(identity);

    if !renewing {
	spec.acquire_time = Some(MicroTime(now));
	if previous.is_some() {
	    spec.lease_transitions = Some(spec.lease_transitions.unwrap_or_default() + 1);
	}
    }
    spec.holder_identity = Some(identity.to_string());
    spec.lease_duration_seconds = Some(i32::try_from(lease_duration.as_secs()).unwrap_or(i32::MAX));
    spec.renew_time = Some(MicroTime(now));
    spec
}

fn is_conflict(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(response) if response.code == 409)
}

impl LeaderElector {

    pub fn new(kube_client: KubeClient, namespace: &str, lease_name: &str, identity: &str, lease_duration: Duration, renew_interval: Duration) -> Self {
	Self{
	    lease_api: KubeApi::namespaced(kube_client, namespace),
	    lease_name: lease_name.to_string(),
	    identity: identity.to_string(),
	    lease_duration: lease_duration,
	    renew_interval: renew_interval,
	}
    }

    /*
     * One acquire-or-renew round. Ok(false) means somebody else holds the
     * lease (or won the race for it).
     */
    pub async fn try_acquire_or_renew(&self) -> Result<bool, KubeError> {
	let now = Utc::now();

	let lease = match self.lease_api.get_opt(&self.lease_name).await? {
	    Some(lease) => lease,
	    None => {
		let mut metadata = ObjectMeta::default();
		metadata.name = Some(self.lease_name.clone());
		let new = KubeLease{
		    metadata: metadata,
		    spec: Some(claim(None, &self.identity, self.lease_duration, now)),
		};

		return match self.lease_api.create(&KubePostParams::default(), &new).await {
		    Ok(_) => Ok(true),
		    Err(err) if is_conflict(&err) => Ok(false),
		    Err(err) => Err(err),
		};
	    }
	};

	let current = lease.spec.clone().unwrap_or_default();
	let held_by_me = current.holder_identity.as_deref() == Some(self.identity.as_str());
	if !held_by_me && !is_expired(&current, now) {
	    log::debug!("lease {} is held by {:?}", self.lease_name, current.holder_identity);
	    return Ok(false);
	}

	let mut updated = lease.clone();
	updated.spec = Some(claim(lease.spec.as_ref(), &self.identity, self.lease_duration, now));
	match self.lease_api.replace(&self.lease_name, &KubePostParams::default(), &updated).await {
	    Ok(_) => Ok(true),
	    Err(err) if is_conflict(&err) => Ok(false),
	    Err(err) => Err(err),
	}
    }

    /*
     * Blocks until this replica holds the lease.
     */
    pub async fn acquire(&self) {
	log::info!("{} waiting for leader lease {}", self.identity, self.lease_name);
	loop {
	    match self.try_acquire_or_renew().await {
		Ok(true) => {
		    log::info!("{} acquired leader lease {}", self.identity, self.lease_name);
		    return;
		},
		Ok(false) => {},
		Err(err) => log::warn!("Unable to acquire leader lease: {}", err),
	    }
	    tokio::time::sleep(self.renew_interval).await;
	}
    }

    /*
     * Renews the lease until leadership is lost and says why. A renewal
     * never runs past the time left on the lease, so a stalled API server
     * can't keep this replica leading after another one may have taken over.
     */
    pub async fn keep_leading(&self) -> LeaseError {
	let mut last_renewed = Instant::now();
	loop {
	    tokio::time::sleep(self.renew_interval).await;

	    let remaining = self.lease_duration.saturating_sub(last_renewed.elapsed());
	    match tokio::time::timeout(remaining, self.try_acquire_or_renew()).await {
		Ok(Ok(true)) => last_renewed = Instant::now(),
		Ok(Ok(false)) => {
		    log::error!("leader lease {} was taken over", self.lease_name);
		    return LeaseError::TakenOver(self.lease_name.clone());
		},
		Ok(Err(err)) => {
		    log::warn!("Unable to renew leader lease: {}", err);
		    if last_renewed.elapsed() >= self.lease_duration {
			log::error!("leader lease {} expired before it could be renewed", self.lease_name);
			return LeaseError::Expired(self.lease_name.clone());
		    }
		},
		Err(_) => {
		    log::error!("leader lease {} expired while renewing it", self.lease_name);
		    return LeaseError::Expired(self.lease_name.clone());
		},
	    }
	}
    }

    /*
     * Clears the holder so the next replica doesn't wait for expiry.
     */
    pub async fn release(&self) -> Result<(), KubeError> {
	if let Some(lease) = self.lease_api.get_opt(&self.lease_name).await? {
	    let mut spec = lease.spec.clone().unwrap_or_default();
	    if spec.holder_identity.as_deref() != Some(self.identity.as_str()) {
		return Ok(());
	    }

	    spec.holder_identity = None;
	    let mut released = lease.clone();
	    released.spec = Some(spec);
	    self.lease_api.replace(&self.lease_name, &KubePostParams::default(), &released).await?;
	    log::info!("released leader lease {}", self.lease_name);
	}
	Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
	Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn held(holder: &str, renewed: i64, duration: i32) -> KubeLeaseSpec {
	KubeLeaseSpec {
	    holder_identity: Some(holder.to_string()),
	    renew_time: Some(MicroTime(at(renewed))),
	    lease_duration_seconds: Some(duration),
	    ..Default::default()
	}
    }

    /* a client whose API server accepts requests and never answers */
    fn stalled_client() -> KubeClient {
	let service = tower::service_fn(|_request: axum::http::Request<kube::client::Body>| async {
	    futures::future::pending::<Result<axum::http::Response<kube::client::Body>, std::convert::Infallible>>().await
	});
	KubeClient::new(service, "default")
    }

    #[tokio::test]
    async fn stalled_renewal_steps_down_once_the_lease_runs_out() {
	let elector = LeaderElector::new(
	    stalled_client(), "default", "inheritor", "replica-a",
	    Duration::from_secs(1), Duration::from_millis(200),
	);

	let lost = tokio::time::timeout(Duration::from_secs(5), elector.keep_leading()).await;

	assert!(matches!(lost, Ok(LeaseError::Expired(ref name)) if name == "inheritor"));
    }

    #[test]
    fn lease_errors_name_the_lease() {
	assert_eq!(LeaseError::TakenOver("inheritor".to_string()).to_string(), "leader lease inheritor was taken over");
    }

    #[test]
    fn unheld_lease_is_expired() {
	assert!(is_expired(&KubeLeaseSpec::default(), at(0)));
	assert!(is_expired(&held("", 0, 15), at(0)));
    }

    #[test]
    fn lease_within_duration_is_held() {
	assert!(!is_expired(&held("replica-a", 0, 15), at(10)));
	assert!(!is_expired(&held("replica-a", 0, 15), at(15)));
    }

    #[test]
    fn lease_past_duration_is_expired() {
	assert!(is_expired(&held("replica-a", 0, 15), at(16)));
    }

    #[test]
    fn claim_fresh_lease() {
	let spec = claim(None, "replica-a", Duration::from_secs(15), at(0));

	assert_eq!(spec.holder_identity.as_deref(), Some("replica-a"));
	assert_eq!(spec.lease_duration_seconds, Some(15));
	assert_eq!(spec.acquire_time, Some(MicroTime(at(0))));
	assert_eq!(spec.renew_time, Some(MicroTime(at(0))));
	assert_eq!(spec.lease_transitions, None);
    }

    #[test]
    fn renewing_keeps_acquire_time() {
	let mut previous = held("replica-a", 5, 15);
	previous.acquire_time = Some(MicroTime(at(0)));

	let spec = claim(Some(&previous), "replica-a", Duration::from_secs(15), at(10));

	assert_eq!(spec.acquire_time, Some(MicroTime(at(0))));
	assert_eq!(spec.renew_time, Some(MicroTime(at(10))));
	assert_eq!(spec.lease_transitions, None);
    }

    #[test]
    fn takeover_counts_transition() {
	let previous = held("replica-a", 0, 15);

	let spec = claim(Some(&previous), "replica-b", Duration::from_secs(15), at(30));

	assert_eq!(spec.holder_identity.as_deref(), Some("replica-b"));
	assert_eq!(spec.acquire_time, Some(MicroTime(at(30))));
	assert_eq!(spec.lease_transitions, Some(1));
    }
}
