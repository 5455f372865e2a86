use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::error_response;
use crate::error::RconError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub async fn run_command(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<CommandRequest>,
) -> impl Responder {
    let name = path.into_inner();

    match data.rcon.execute(&name, &req.command).await {
        Ok(response) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "map": name,
            "response": response
        })),
        Err(e @ RconError::NotConfigured(_)) => error_response(StatusCode::NOT_FOUND, e),
        Err(e) => {
            log::warn!("rcon command for '{}' failed: {}", name, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}
