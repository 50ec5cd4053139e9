use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_LEADER_ELECTION_ID: &str = "ec750a98.node-label-inheritor.k8s.protosam.github.io";

/*
 * inheritord command line. Every flag can also be given through the
 * environment, which is how the deployment manifests set them.
 */
#[derive(Parser, Debug, Clone)]
#[command(name = "inheritord", version, about = "Copies node labels onto the pods scheduled on them")]
pub struct Args {

    /// The address the metric endpoint binds to.
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub metrics_bind_address: SocketAddr,

    /// The address the probe endpoint binds to.
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = "0.0.0.0:8081")]
    pub health_probe_bind_address: SocketAddr,

    /// Enable leader election, ensuring there is only one active controller.
    #[arg(long, env = "LEADER_ELECT")]
    pub leader_elect: bool,

    #[arg(long, env = "LEADER_ELECTION_ID", default_value = DEFAULT_LEADER_ELECTION_ID)]
    pub leader_election_id: String,

    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = 15)]
    pub lease_duration_secs: u64,

    #[arg(long, env = "RENEW_INTERVAL_SECS", default_value_t = 5)]
    pub renew_interval_secs: u64,

    /// Deadline for a single reconciliation attempt.
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout_secs: u64,

    /// How long a failed reconciliation waits before its first retry.
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 10)]
    pub error_requeue_secs: u64,

    /// Upper bound for the retry delay of a pod that keeps failing.
    #[arg(long, env = "ERROR_REQUEUE_MAX_SECS", default_value_t = 300)]
    pub error_requeue_max_secs: u64,
}

impl Args {

    pub fn lease_duration(&self) -> Duration {
	Duration::from_secs(self.lease_duration_secs)
    }

    pub fn renew_interval(&self) -> Duration {
	Duration::from_secs(self.renew_interval_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
	Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn error_requeue(&self) -> Duration {
	Duration::from_secs(self.error_requeue_secs)
    }

    pub fn error_requeue_max(&self) -> Duration {
	Duration::from_secs(self.error_requeue_max_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
	Args::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
	let args = Args::try_parse_from([
	    "inheritord",
	    "--metrics-bind-address", "127.0.0.1:9090",
	    "--leader-elect",
	    "--leader-election-namespace", "kube-system",
	    "--reconcile-timeout-secs", "5",
	]).unwrap();

	assert_eq!(args.metrics_bind_address, "127.0.0.1:9090".parse().unwrap());
	assert!(args.leader_elect);
	assert_eq!(args.leader_election_namespace, "kube-system");
	assert_eq!(args.reconcile_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn retry_delays_default_to_ten_seconds_up_to_five_minutes() {
	let args = Args::try_parse_from(["inheritord"]).unwrap();

	assert_eq!(args.error_requeue(), Duration::from_secs(10));
	assert_eq!(args.error_requeue_max(), Duration::from_secs(300));
    }

    #[test]
    fn rejects_bad_address() {
	assert!(Args::try_parse_from(["inheritord", "--health-probe-bind-address", ":8081"]).is_err());
    }
}
