use actix_web::{http::StatusCode, web, HttpResponse, Responder};

use crate::api::error_response;
use crate::error::SupervisorError;
use crate::services::EnableOutcome;
use crate::state::AppState;

fn supervisor_error(err: SupervisorError) -> HttpResponse {
    let status = match &err {
        SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::Shutdown { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err)
}

pub async fn start_map(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.supervisor.enable(&name) {
        Ok(EnableOutcome::Started) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Process '{}' started", name)
        })),
        Ok(EnableOutcome::AlreadyRunning) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Process '{}' is already running", name)
        })),
        Ok(EnableOutcome::NotFound) => supervisor_error(SupervisorError::NotFound(name)),
        Err(e) => supervisor_error(e),
    }
}

pub async fn stop_map(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.supervisor.disable(&name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Process '{}' stopped", name)
        })),
        Err(e) => supervisor_error(e),
    }
}

pub async fn map_logs(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.supervisor.retrieve_logs(&name) {
        Ok(logs) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "map": name,
            "logs": logs
        })),
        Err(e) => supervisor_error(e),
    }
}

pub async fn list_maps(data: web::Data<AppState>) -> impl Responder {
    let maps = data.supervisor.status();

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "count": maps.len(),
        "maps": maps,
        "backups_scheduled": data.backups.scheduled_names()
    }))
}
