use crate::errors::Error;
use crate::store::ClusterStore;

use inheritor_api as api;
use inheritor_api::Labels;

use k8s_openapi::api::core::v1::Pod as KubePod;
use kube::runtime::reflector::ObjectRef;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/*
 * What a successful reconciliation attempt ended with. None of these asks
 * for a requeue, a later event re-triggers the pod when something changes.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /* the pod no longer exists */
    Gone,

    /* no annotations or not scheduled yet */
    NotEligible,

    NoDirective,

    /* the node the pod points at no longer exists */
    NodeGone,

    InSync,

    Updated(Labels),
}

impl Outcome {

    pub fn as_label(&self) -> &'static str {
	match self {
	    Outcome::Gone => "gone",
	    Outcome::NotEligible => "not_eligible",
	    Outcome::NoDirective => "no_directive",
	    Outcome::NodeGone => "node_gone",
	    Outcome::InSync => "in_sync",
	    Outcome::Updated(_) => "updated",
	}
    }
}

/*
 * Cancellation signal and deadline for one reconciliation attempt.
 */
#[derive(Debug, Clone)]
pub struct Attempt {
    cancel: CancellationToken,
    deadline: Instant,
}

impl Attempt {

    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
	Self{
	    cancel: cancel,
	    deadline: Instant::now() + timeout,
	}
    }

    pub fn is_aborted(&self) -> bool {
	self.cancel.is_cancelled() || Instant::now() >= self.deadline
    }

    /*
     * Runs a store read unless the attempt gets cancelled or runs out of
     * time first.
     */
    async fn guard<T, F>(&self, key: &str, fut: F) -> Result<T, Error>
    where
	F: Future<Output = Result<T, Error>>,
    {
	tokio::select! {
	    biased;

	    _ = self.cancel.cancelled() => Err(Error::Cancelled(key.to_string())),
	    _ = tokio::time::sleep_until(self.deadline) => Err(Error::Cancelled(key.to_string())),
	    res = fut => res,
	}
    }
}

/*
 * Copies the labels a pod asked for (through the nodeLabelsInherited
 * annotation) from the node it runs on.
 *
 * Every call starts from freshly read state and keeps nothing between calls,
 * so calls for different pods can run concurrently. The controller runtime
 * makes sure a single pod is never reconciled twice at the same time.
 */
pub struct PodLabelReconciler<S> {
    store: S,
}

impl<S: ClusterStore> PodLabelReconciler<S> {

    pub fn new(store: S) -> Self {
	Self{ store }
    }

    pub fn store(&self) -> &S {
	&self.store
    }

    pub async fn reconcile(&self, pod_ref: &ObjectRef<KubePod>, attempt: &Attempt) -> Result<Outcome, Error> {
	let namespace = pod_ref.namespace.as_deref().unwrap_or_default();
	let key = format!("{}/{}", namespace, pod_ref.name);

	let mut pod = match attempt.guard(&key, self.store.get_pod(namespace, &pod_ref.name)).await? {
	    Some(pod) => pod,
	    None => {
		log::debug!("pod {} is gone, nothing to reconcile", key);
		return Ok(Outcome::Gone);
	    }
	};

	let node_name = pod.spec.as_ref()
	    .and_then(|spec| spec.node_name.clone())
	    .filter(|name| !name.is_empty());
	let node_name = match node_name {
	    Some(name) if pod.metadata.annotations.is_some() => name,
	    _ => return Ok(Outcome::NotEligible),
	};

	let directive = match api::directive::extract(&pod)? {
	    Some(directive) => directive,
	    None => return Ok(Outcome::NoDirective),
	};

	let node = match attempt.guard(&key, self.store.get_node(&node_name)).await? {
	    Some(node) => node,
	    None => {
		log::warn!("pod {} is scheduled on node {} which doesn't exist", key, node_name);
		return Ok(Outcome::NodeGone);
	    }
	};

	let staged = api::labels::corrections(&directive, pod.metadata.labels.as_ref(), node.metadata.labels.as_ref());
	if staged.is_empty() {
	    log::debug!("pod {} already carries {:?} from node {}", key, directive.keys(), node_name);
	    return Ok(Outcome::InSync);
	}

	// never start the write once the attempt is aborted
	if attempt.is_aborted() {
	    return Err(Error::Cancelled(key));
	}

	api::labels::apply(&mut pod.metadata.labels, &staged);
	self.store.replace_pod(&pod).await?;

	log::info!("pod {} inherited {:?} from node {}", key, staged, node_name);
	Ok(Outcome::Updated(staged))
    }
}
