use crate::backoff::Backoff;
use crate::errors::Error;
use crate::metrics::Metrics;
use crate::reconciler::Attempt;
use crate::reconciler::PodLabelReconciler;
use crate::store::KubeStore;

use inheritor_api as api;
use inheritor_api::Labels;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node as KubeNode;
use k8s_openapi::api::core::v1::Pod as KubePod;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher as kube_watcher;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/*
 * InheritorMgr encapsulates the kube controller that keeps pod labels in
 * line with the labels of their node.
 *
 * Pods are the reconciled objects; node label changes are mapped back to
 * the annotated pods running on that node, so a relabelled node propagates
 * without waiting for a pod event.
 */
#[derive(Clone)]
pub struct InheritorMgr {
    reconcile_timeout: Duration,
    error_requeue: Duration,
    error_requeue_max: Duration,
    shutdown: CancellationToken,
    metrics: Metrics,

    pod_api: KubeApi<KubePod>,
    node_api: KubeApi<KubeNode>,
    store: KubeStore,
}

struct InheritorCtx {
    mgr: InheritorMgr,
    reconciler: PodLabelReconciler<KubeStore>,
    backoff: Backoff,
}

/*
 * Remembers the labels last seen on every node, so that status heartbeats
 * and condition updates don't requeue the pods running there.
 */
#[derive(Default)]
pub struct NodeLabelFilter {
    seen: Mutex<HashMap<String, Labels>>,
}

impl NodeLabelFilter {

    pub fn labels_changed(&self, node: &KubeNode) -> bool {
	let labels = node.metadata.labels.clone().unwrap_or_default();
	match self.seen.lock() {
	    Ok(mut seen) => seen.insert(node.name_any(), labels.clone()) != Some(labels),
	    Err(_) => true,
	}
    }
}

/*
 * Whether `pod` runs on `node_name` and asked to inherit its labels.
 */
fn inherits_from(pod: &KubePod, node_name: &str) -> bool {
    let scheduled_here = pod.spec.as_ref()
	.and_then(|spec| spec.node_name.as_deref()) == Some(node_name);
    let annotated = pod.metadata.annotations.as_ref()
	.is_some_and(|annotations| annotations.contains_key(api::NODE_LABELS_INHERITED));

    scheduled_here && annotated
}

pub fn pods_on_node(pods: impl IntoIterator<Item = Arc<KubePod>>, node_name: &str) -> Vec<ObjectRef<KubePod>> {
    pods.into_iter()
	.filter(|pod| inherits_from(pod, node_name))
	.map(|pod| ObjectRef::from_obj(pod.as_ref()))
	.collect()
}

async fn pod_reconcile(pod: Arc<KubePod>, ctx: Arc<InheritorCtx>) -> Result<KubeAction, Error> {
    let pod_ref = ObjectRef::from_obj(pod.as_ref());
    let attempt = Attempt::new(ctx.mgr.shutdown.child_token(), ctx.mgr.reconcile_timeout);

    match ctx.reconciler.reconcile(&pod_ref, &attempt).await {
	Ok(outcome) => {
	    log::debug!("Reconciled {}/{}: {:?}", pod.namespace().unwrap_or_default(), pod.name_any(), outcome);
	    ctx.mgr.metrics.record_outcome(&outcome);
	    ctx.backoff.reset(&pod_ref);
	    Ok(KubeAction::await_change())
	},
	Err(err) => {
	    ctx.mgr.metrics.record_error(&err);
	    Err(err)
	}
    }
}

fn pod_error_policy(pod: Arc<KubePod>, error: &Error, ctx: Arc<InheritorCtx>) -> KubeAction {
    let delay = ctx.backoff.next_delay(&ObjectRef::from_obj(pod.as_ref()));
    log::warn!("Unable to reconcile {}/{}, retrying in {:?}: {}",
	       pod.namespace().unwrap_or_default(), pod.name_any(), delay, error);

    KubeAction::requeue(delay)
}

impl InheritorMgr {

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = Arc::new(InheritorCtx{
	    mgr: self.clone(),
	    reconciler: PodLabelReconciler::new(self.store.clone()),
	    backoff: Backoff::new(self.error_requeue, self.error_requeue_max),
	});
	let nodes = NodeLabelFilter::default();

	let controller = KubeController::new(self.pod_api.clone(), kube_watcher::Config::default());
	let pods = controller.store();

	controller
	    .watches(self.node_api.clone(), kube_watcher::Config::default(), move |node: KubeNode| {
		match nodes.labels_changed(&node) {
		    true => pods_on_node(pods.state(), &node.name_any()),
		    false => Vec::new(),
		}
	    })
	    .graceful_shutdown_on(self.shutdown.clone().cancelled_owned())
	    .run(pod_reconcile, pod_error_policy, ctx)
	    .for_each(|reconcile| async move {
		if let Err(err) = reconcile {
		    log::error!("Failed to reconcile with error: {:?}", err);
		}
	    })
    }

    pub fn new(kube_client: KubeClient, metrics: Metrics, shutdown: CancellationToken, reconcile_timeout: Duration, error_requeue: Duration, error_requeue_max: Duration) -> Self {
	Self{
	    reconcile_timeout: reconcile_timeout,
	    error_requeue: error_requeue,
	    error_requeue_max: error_requeue_max,
	    shutdown: shutdown,
	    metrics: metrics,

	    /* k8s internal references */
	    pod_api: KubeApi::all(kube_client.clone()),
	    node_api: KubeApi::all(kube_client.clone()),
	    store: KubeStore::new(kube_client),
	}
    }
}
