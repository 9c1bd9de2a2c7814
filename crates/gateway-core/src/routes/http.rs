//! The gateway's single northbound proxy entrypoint.
//!
//! One catch-all `/{tail:.*}` resource, forwarding every matched request to
//! the shared [`ForwardEngine`]: its payload limits guard against oversized
//! request bodies before the forward engine ever sees them, and its header
//! validation rejects known scanner traffic ahead of routing (§10 hardening).

use crate::middleware::validation::validate_headers;
use crate::services::pipeline::ForwardEngine;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::future::{ready, Either};
use std::sync::Arc;

/// 1MB body ceiling.
const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Registers the catch-all proxy route. Must be configured last among the
/// gateway's own HTTP surface so the admin/health routes registered earlier
/// take precedence over the wildcard match.
pub fn configure_route(cfg: &mut web::ServiceConfig, engine: Arc<ForwardEngine>) {
    cfg.app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
        .app_data(web::JsonConfig::default().limit(MAX_PAYLOAD_BYTES))
        .service(
            web::resource("/{tail:.*}")
                .wrap_fn(|req, srv| {
                    let check = validate_headers()(&req);
                    match check {
                        Ok(()) => Either::Left(srv.call(req)),
                        Err(e) => {
                            let response = req.into_response(HttpResponse::from_error(e));
                            Either::Right(ready(Ok(response)))
                        }
                    }
                })
                .to(move |req: HttpRequest, body: web::Bytes| {
                    let engine = engine.clone();
                    async move { engine.handle(req, body).await }
                }),
        );
}
