// /metrics and /healthz
use actix_web::{web, HttpResponse, Responder};

use crate::metrics::operational;

pub async fn metrics() -> impl Responder {
    match operational::gather_text() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}

pub async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/metrics").to(metrics))
        .service(web::resource("/healthz").to(healthz));
}

#[cfg(test)]
mod tests {
    use actix_web::{test, App};

    use super::*;

    #[actix_rt::test]
    async fn serves_metrics_text() {
        operational::record_poll_error("handler_test");
        let app = test::init_service(App::new().configure(configure)).await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"volume_autoscaler_poll_errors_total{reason="handler_test"} 1"#));
    }

    #[actix_rt::test]
    async fn healthz_is_ok() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/healthz").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
