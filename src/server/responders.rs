pub mod probe {
    use ntex::web::HttpResponse;

    pub async fn readiness() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }

    pub async fn liveness() -> HttpResponse {
        HttpResponse::Ok().body("ok")
    }
}

pub mod metrics {
    use crate::metrics::get_metrics;
    use ntex::web::HttpResponse;
    use prometheus::{Encoder, TextEncoder};

    pub async fn scrape() -> HttpResponse {
        let metric_families = get_metrics().registry.gather();
        let mut buffer = Vec::new();

        if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buffer) {
            return HttpResponse::InternalServerError().body(e.to_string());
        }

        HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(buffer)
    }
}

pub mod status {
    use crate::scanner::Scanner;
    use ntex::web::{types::State, HttpResponse};
    use std::sync::Arc;

    pub async fn scan_status(scanner: State<Arc<Scanner>>) -> HttpResponse {
        match scanner.stats().await {
            Ok(stats) => HttpResponse::Ok().json(&stats),
            Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
        }
    }
}
