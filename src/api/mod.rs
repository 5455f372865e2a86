pub mod backup;
pub mod process;
pub mod rcon;

use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use std::fmt::Display;

use crate::state::AppState;

pub fn error_response(status: StatusCode, message: impl Display) -> HttpResponse {
    HttpResponse::build(status).json(serde_json::json!({
        "status": "error",
        "message": message.to_string()
    }))
}

pub async fn health(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "monitors": data.supervisor.monitor_count(),
        "backup_schedules": data.backups.scheduled_names().len()
    }))
}

/// Registers every control-plane route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/maps", web::get().to(process::list_maps))
        .route("/api/maps/{name}/start", web::post().to(process::start_map))
        .route("/api/maps/{name}/stop", web::post().to(process::stop_map))
        .route("/api/maps/{name}/logs", web::get().to(process::map_logs))
        .route("/api/maps/{name}/backup/schedule", web::post().to(backup::start_schedule))
        .route("/api/maps/{name}/backup/schedule", web::delete().to(backup::stop_schedule))
        .route("/api/maps/{name}/backup", web::post().to(backup::backup_now))
        .route("/api/maps/{name}/backups", web::get().to(backup::list_backups))
        .route("/api/maps/{name}/restore", web::post().to(backup::restore))
        .route("/api/maps/{name}/rcon", web::post().to(rcon::run_command))
        .route("/health", web::get().to(health));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstanceBackupConfig, SelectionPolicy};
    use crate::registry::InstanceRegistry;
    use crate::services::{LogDirectory, StateStore};
    use crate::state::new_state;
    use actix_web::{test, App};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn state(dir: &TempDir) -> AppState {
        let source = dir.path().join("saves");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("TheIsland.ark"), "world").unwrap();
        let backup = InstanceBackupConfig {
            name: String::new(),
            zip_dir: dir.path().join("backups"),
            extract_dir: source,
            file_extensions: [".ark".to_string()].into_iter().collect(),
            specific_files: Default::default(),
            selection: SelectionPolicy::Extensions,
            interval_minutes: 60,
            retention_days: 7,
        };
        let registry = Arc::new(
            InstanceRegistry::from_parts(Vec::new(), vec![("island".to_string(), backup)], Vec::new()).unwrap(),
        );
        let store = Arc::new(StateStore::open(dir.path().join("data")).unwrap());
        let logs = LogDirectory::open(dir.path().join("logs")).unwrap();
        new_state(registry, store, logs, Duration::from_secs(1), Duration::from_secs(2))
    }

    #[actix_web::test]
    async fn health_reports_healthy() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&dir)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["monitors"], 0);
    }

    #[actix_web::test]
    async fn unknown_maps_are_not_found() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&dir)))
                .configure(configure),
        )
        .await;

        for req in [
            test::TestRequest::post().uri("/api/maps/ragnarok/start"),
            test::TestRequest::post().uri("/api/maps/ragnarok/stop"),
            test::TestRequest::get().uri("/api/maps/ragnarok/logs"),
            test::TestRequest::post().uri("/api/maps/ragnarok/backup"),
            test::TestRequest::post().uri("/api/maps/ragnarok/backup/schedule"),
        ] {
            let resp = test::call_service(&app, req.to_request()).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }

        let req = test::TestRequest::post()
            .uri("/api/maps/ragnarok/rcon")
            .set_json(serde_json::json!({"command": "listplayers"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn stopping_an_unscheduled_backup_conflicts() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&dir)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::delete()
            .uri("/api/maps/island/backup/schedule")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[actix_web::test]
    async fn manual_backup_shows_up_in_the_listing() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&dir)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/maps/island/backup").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["backup"]["files"], 1);

        let req = test::TestRequest::get().uri("/api/maps/island/backups").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["scheduled"], false);
        assert!(body["last_backup"].is_string());

        let archive = body["archives"][0]["file_name"].as_str().unwrap().to_string();
        let req = test::TestRequest::post()
            .uri("/api/maps/island/restore")
            .set_json(serde_json::json!({"archive": archive, "file": "../../etc/passwd"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error() || resp.status().is_server_error());
    }
}
