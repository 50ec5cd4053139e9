use crate::metrics::Metrics;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/*
 * /healthz and /readyz, both answer as soon as the process serves HTTP.
 */
pub fn probe_router() -> Router {
    Router::new()
	.route("/healthz", get(ping))
	.route("/readyz", get(ping))
}

pub fn metrics_router(metrics: Metrics) -> Router {
    Router::new()
	.route("/metrics", get(render_metrics))
	.with_state(metrics)
}

async fn ping() -> &'static str {
    "ok"
}

async fn render_metrics(State(metrics): State<Metrics>) -> Response {
    match metrics.encode() {
	Ok(body) => ([(CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
	Err(err) => {
	    log::error!("Unable to encode metrics: {}", err);
	    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
	}
    }
}

/*
 * Binds right away so a busy address fails at startup, and returns the
 * future serving the router.
 */
pub async fn bind(name: &'static str, addr: SocketAddr, router: Router) -> std::io::Result<impl Future<Output = ()>> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("serving {} on {}", name, addr);

    Ok(async move {
	if let Err(err) = axum::serve(listener, router).await {
	    log::error!("{} server failed: {}", name, err);
	}
    })
}
