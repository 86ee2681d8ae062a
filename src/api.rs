use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use log::{info, warn};
use tokio::net::TcpListener;

use crate::metrics::Metrics;

pub fn routes(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/procshave-metrics", get(scrape))
        .with_state(metrics)
}

async fn scrape(State(metrics): State<Arc<Metrics>>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
        .into_response()
}

/// Serve the scrape endpoint until the process exits. A bind failure is
/// logged and the rest of the program carries on without a scrape surface.
pub async fn serve(addr: String, metrics: Arc<Metrics>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!("metrics listener unavailable on {addr}: {err}");
            return;
        }
    };
    info!("metrics on http://{addr}/procshave-metrics");
    if let Err(err) = axum::serve(listener, routes(metrics)).await {
        warn!("metrics server error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::GaugeSet;

    #[tokio::test]
    async fn scrape_round_trip() {
        let metrics = Arc::new(Metrics::new(7, "testhost".into()));
        metrics.publish(GaugeSet {
            fd_read_bytes: 3072,
            ..GaugeSet::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, routes(metrics)).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /procshave-metrics HTTP/1.0\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.0 200"));
        assert!(body.contains("fd_read_bytes{pid=\"7\",hostname=\"testhost\"} 3072"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let metrics = Arc::new(Metrics::new(7, "testhost".into()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, routes(metrics)).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /metrics HTTP/1.0\r\nHost: test\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.0 404"));
    }
}
