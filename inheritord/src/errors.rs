use inheritor_api::DirectiveError;
use thiserror::Error;

/*
 * Every variant is scoped to a single reconciliation attempt and is retried
 * by the controller's error policy; none of them stops the process.
 */
#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0}")]
    Directive(#[from] DirectiveError),

    /* the pod changed since it was read, its resourceVersion is stale */
    #[error("conflict updating pod {0}")]
    Conflict(String),

    #[error("reconciliation of {0} was cancelled")]
    Cancelled(String),
}

impl Error {

    /*
     * A short, bounded name used as a metric label.
     */
    pub fn kind(&self) -> &'static str {
	match self {
	    Error::Kube(_) => "kube",
	    Error::Directive(_) => "malformed_directive",
	    Error::Conflict(_) => "conflict",
	    Error::Cancelled(_) => "cancelled",
	}
    }
}
