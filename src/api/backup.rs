use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use serde::Deserialize;

use crate::api::error_response;
use crate::error::BackupError;
use crate::services::ScheduleOutcome;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RestoreRequest {
    /// Archive file name as listed by `GET /api/maps/{name}/backups`
    pub archive: String,
    /// Entry inside the archive, `/` separated
    pub file: String,
}

fn backup_error(err: BackupError) -> HttpResponse {
    let status = match &err {
        BackupError::NotConfigured(_) => StatusCode::NOT_FOUND,
        BackupError::NotScheduled(_) => StatusCode::CONFLICT,
        BackupError::UnsafeEntry(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err)
}

pub async fn start_schedule(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.backups.start_schedule(&name) {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": match outcome {
                ScheduleOutcome::Started => format!("Backup schedule started for '{}'", name),
                ScheduleOutcome::AlreadyScheduled => format!("Backup schedule for '{}' is already running", name),
            }
        })),
        Err(e) => backup_error(e),
    }
}

pub async fn stop_schedule(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.backups.stop_schedule(&name) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Backup schedule stopped for '{}'", name)
        })),
        Err(e) => backup_error(e),
    }
}

pub async fn backup_now(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    match data.backups.backup_now(&name).await {
        Ok(report) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "backup": report
        })),
        Err(e) => backup_error(e),
    }
}

pub async fn list_backups(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();

    let archives = match data.backups.list_archives(&name).await {
        Ok(archives) => archives,
        Err(e) => return backup_error(e),
    };
    let last_backup = match data.backups.last_backup(&name) {
        Ok(at) => at.map(|at| at.to_rfc3339()),
        Err(e) => return backup_error(e),
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "map": name,
        "scheduled": data.backups.is_scheduled(&name),
        "last_backup": last_backup,
        "count": archives.len(),
        "archives": archives
    }))
}

pub async fn restore(
    data: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<RestoreRequest>,
) -> impl Responder {
    let name = path.into_inner();

    match data.backups.restore(&name, &req.archive, &req.file).await {
        Ok(target) => HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "message": format!("Restored '{}' from {}", req.file, req.archive),
            "path": target
        })),
        Err(e) => backup_error(e),
    }
}
