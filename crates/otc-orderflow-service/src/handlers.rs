//! HTTP surface of the order index
//!
//! - `POST /order`: publish a listing (`409` if the escrow is already listed)
//! - `GET /order`: by `id` (`404` if missing) or by filter, most recent first
//! - `DELETE /order?id=`: delist; `data` is `false` if nothing was removed
//! - `GET /health`

use actix_web::error::InternalError;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use tracing::{error, info, warn};

use otc_desk_logic::api::{ApiResponse, OrderQuery};
use otc_desk_logic::error::IndexError;
use otc_desk_logic::index::{NewOrder, OrderIndex};

/// Request body limit for listings
const MAX_BODY_BYTES: usize = 256 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .route("/health", web::get().to(health))
        .service(
            web::resource("/order")
                .route(web::post().to(create_order))
                .route(web::get().to(get_orders))
                .route(web::delete().to(delete_order)),
        );
}

fn bad_request(message: &str, detail: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::failure(message, detail))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, req: &HttpRequest| {
            let detail = err.to_string();
            warn!("[JSON-PARSE] {} {}: {}", req.method(), req.path(), detail);
            InternalError::from_response(err, bad_request("Malformed order body", detail)).into()
        })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, req: &HttpRequest| {
        let detail = err.to_string();
        warn!("[QUERY-PARSE] {} {}: {}", req.method(), req.path(), detail);
        InternalError::from_response(err, bad_request("Malformed query", detail)).into()
    })
}

/// `409` for duplicates, `500` with the store's message for everything else
fn index_failure(err: IndexError) -> HttpResponse {
    match err {
        IndexError::DuplicateListing(escrow) => {
            HttpResponse::Conflict().json(ApiResponse::<()>::failure(
                format!("Escrow {} is already listed", escrow),
                "DUPLICATE_LISTING",
            ))
        }
        other => {
            error!("Order index failure: {}", other);
            HttpResponse::InternalServerError()
                .json(ApiResponse::<()>::failure("Order index failure", other.to_string()))
        }
    }
}

pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

pub async fn create_order(index: web::Data<dyn OrderIndex>, body: web::Json<NewOrder>) -> HttpResponse {
    match index.insert(body.into_inner()).await {
        Ok(order) => {
            info!("Listed order {} for escrow {}", order.order_id, order.escrow_address);
            HttpResponse::Ok().json(ApiResponse::ok_with_message("Order created", order))
        }
        Err(e) => index_failure(e),
    }
}

/// With `id`, the other parameters are ignored
pub async fn get_orders(index: web::Data<dyn OrderIndex>, query: web::Query<OrderQuery>) -> HttpResponse {
    if let Some(id) = query.id() {
        return match index.get_by_id(id).await {
            Ok(Some(order)) => HttpResponse::Ok().json(ApiResponse::ok(vec![order])),
            Ok(None) => HttpResponse::NotFound().json(ApiResponse::<()>::failure(
                format!("Order {} not found", id),
                "NOT_FOUND",
            )),
            Err(e) => index_failure(e),
        };
    }

    let filter = match query.filter() {
        Ok(filter) => filter,
        Err(e) => return bad_request("Malformed query", e.to_string()),
    };
    match index.list_filtered(&filter).await {
        Ok(orders) => HttpResponse::Ok().json(ApiResponse::ok(orders)),
        Err(e) => index_failure(e),
    }
}

pub async fn delete_order(index: web::Data<dyn OrderIndex>, query: web::Query<OrderQuery>) -> HttpResponse {
    let Some(id) = query.id() else {
        return bad_request("Missing order id", "id query parameter is required".to_string());
    };
    match index.remove(id).await {
        Ok(true) => {
            info!("Delisted order {}", id);
            HttpResponse::Ok().json(ApiResponse::ok_with_message("Order deleted", true))
        }
        Ok(false) => HttpResponse::Ok().json(ApiResponse::ok_with_message("Order not listed", false)),
        Err(e) => index_failure(e),
    }
}
