mod backoff;
mod config;
mod controller;
mod errors;
mod leader;
mod metrics;
mod probes;
mod reconciler;
mod store;

use config::Args;
use controller::InheritorMgr;
use leader::LeaderElector;
use leader::LeaseError;
use metrics::Metrics;

use clap::Parser;
use gethostname::gethostname;
use kube::Client as KubeClient;
use log;
use tokio_util::sync::CancellationToken;

fn get_identity() -> String {
    // Pod hostnames are unique within the deployment.
    gethostname().to_string_lossy().into_owned()
}

/*
 * Resolves when leadership is lost, never when running without election.
 */
async fn lost_leadership(elector: Option<&LeaderElector>) -> LeaseError {
    match elector {
	Some(elector) => elector.keep_leading().await,
	None => std::future::pending().await,
    }
}

/*
 * A lost lease ends the process with an error so it gets restarted as a
 * follower; every other way out is a clean exit.
 */
fn exit_status(lost: Option<LeaseError>) -> Result<(), Box<dyn std::error::Error>> {
    match lost {
	Some(err) => Err(err.into()),
	None => Ok(()),
    }
}

/*
 * Program design:
 *
 *  1. Serve health probes and metrics
 *  2. When leader election is enabled, wait for the leader lease
 *  3. Reconcile every pod annotated with nodeLabelsInherited
 *  4. On CTRL^C, cancel in-flight attempts and step down
 *  5. On a lost lease, stop right away and exit with an error
 */
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let kube_client = KubeClient::try_default().await?;
    let metrics = Metrics::new()?;
    let shutdown = CancellationToken::new();

    let probes = probes::bind("probes", args.health_probe_bind_address, probes::probe_router()).await?;
    let metrics_server = probes::bind("metrics", args.metrics_bind_address, probes::metrics_router(metrics.clone())).await?;
    tokio::spawn(probes);
    tokio::spawn(metrics_server);

    let elector = match args.leader_elect {
	true => Some(LeaderElector::new(
	    kube_client.clone(),
	    &args.leader_election_namespace,
	    &args.leader_election_id,
	    &get_identity(),
	    args.lease_duration(),
	    args.renew_interval(),
	)),
	false => None,
    };

    if let Some(elector) = &elector {
	tokio::select! {
	    _ = elector.acquire() => {},
	    _ = tokio::signal::ctrl_c() => return Ok(()),
	}
    }

    log::info!("starting inheritord");
    let mgr = InheritorMgr::new(kube_client, metrics, shutdown.clone(), args.reconcile_timeout(), args.error_requeue(), args.error_requeue_max());
    let controller = mgr.controller();
    tokio::pin!(controller);

    let (drain, lost) = tokio::select! {
	_ = &mut controller => (false, None),
	err = lost_leadership(elector.as_ref()) => (false, Some(err)),

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => (true, None),
    };

    // in-flight attempts abort before writing once this fires
    shutdown.cancel();
    if drain {
	log::info!("shutting down, waiting for in-flight reconciliations");
	controller.await;
    }

    // a lost lease is not ours to release
    if let (Some(elector), None) = (&elector, &lost) {
	if let Err(err) = elector.release().await {
	    log::warn!("Unable to release leader lease: {}", err);
	}
    }

    exit_status(lost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn leadership_is_never_lost_without_election() {
	let lost = tokio::time::timeout(Duration::from_millis(100), lost_leadership(None)).await;
	assert!(lost.is_err());
    }

    #[test]
    fn lost_lease_exits_with_an_error() {
	let status = exit_status(Some(LeaseError::Expired("inheritor".to_string())));

	assert_eq!(status.unwrap_err().to_string(), "leader lease inheritor expired before it could be renewed");
	assert!(exit_status(None).is_ok());
    }
}
