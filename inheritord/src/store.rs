use crate::errors::Error;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node as KubeNode;
use k8s_openapi::api::core::v1::Pod as KubePod;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Error as KubeError;
use kube::ResourceExt;
use kube::api::PostParams as KubePostParams;

/*
 * The reads and the conditional write the reconciler needs from the cluster.
 *
 * Implementations must never cache: every call observes the store as it is
 * now. `replace_pod` is guarded by the pod's resourceVersion and reports a
 * stale write as `Error::Conflict`.
 */
#[async_trait]
pub trait ClusterStore: Send + Sync {

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<KubePod>, Error>;

    async fn get_node(&self, name: &str) -> Result<Option<KubeNode>, Error>;

    async fn replace_pod(&self, pod: &KubePod) -> Result<KubePod, Error>;
}

/*
 * ClusterStore backed by the kubernetes API server.
 */
#[derive(Clone)]
pub struct KubeStore {
    kube_client: KubeClient,
    node_api: KubeApi<KubeNode>,
}

impl KubeStore {

    pub fn new(kube_client: KubeClient) -> Self {
	Self{
	    node_api: KubeApi::all(kube_client.clone()),
	    kube_client: kube_client,
	}
    }

    fn pods(&self, namespace: &str) -> KubeApi<KubePod> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }
}

/*
 * Maps an optimistic-concurrency rejection (HTTP 409) into `Error::Conflict`.
 */
pub fn write_error(err: KubeError, pod: &str) -> Error {
    match err {
	KubeError::Api(ref response) if response.code == 409 => Error::Conflict(pod.to_string()),
	err => Error::Kube(err),
    }
}

pub fn pod_key(pod: &KubePod) -> String {
    format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any())
}

#[async_trait]
impl ClusterStore for KubeStore {

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<KubePod>, Error> {
	Ok(self.pods(namespace).get_opt(name).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Option<KubeNode>, Error> {
	Ok(self.node_api.get_opt(name).await?)
    }

    async fn replace_pod(&self, pod: &KubePod) -> Result<KubePod, Error> {
	let namespace = pod.namespace().unwrap_or_default();
	let opts = KubePostParams::default();

	self.pods(&namespace)
	    .replace(&pod.name_any(), &opts, pod)
	    .await
	    .map_err(|err| write_error(err, &pod_key(pod)))
    }
}
