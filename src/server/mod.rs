use crate::scanner::Scanner;
use ntex::web::{self, get, App};
use std::{net::SocketAddr, sync::Arc};

mod responders;

/// Serves internal probes, Prometheus metrics and the scan status endpoint.
pub async fn start_server(
    server_address: &SocketAddr,
    scanner: Arc<Scanner>,
) -> std::io::Result<()> {
    web::server(move || {
        App::new()
            .state(scanner.clone())
            // ==== INTERNAL ==== //
            .route(
                "/internal/probe/readiness",
                get().to(responders::probe::readiness),
            )
            .route(
                "/internal/probe/liveness",
                get().to(responders::probe::liveness),
            )
            .route("/internal/metrics", get().to(responders::metrics::scrape))
            .route("/internal/status", get().to(responders::status::scan_status))
    })
    .bind(server_address)
    .expect("Bind to server address")
    .run()
    .await
    .expect("Running server");

    Ok(())
}
