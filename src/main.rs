// src/main.rs
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

mod errors;
mod handlers;
mod models;
mod services;

use crate::handlers::{
    analyze, camera_snapshot, close_camera, create_session, get_session, open_camera, reset,
    upload_image,
};
use crate::services::{
    CameraService, FaceAnalyzer, GeminiService, ImageProcessor, SessionStore, V4lCamera,
};

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<SessionStore>,
    analyzer: Arc<dyn FaceAnalyzer>,
    camera: Arc<CameraService>,
    images: Arc<ImageProcessor>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting facemap service...");

    let analyzer = GeminiService::from_env();
    // A missing key is not fatal at startup; analysis requests will report
    // the missing credential without touching the network.
    if std::env::var("GEMINI_API_KEY").map_or(true, |k| k.is_empty()) {
        log::warn!("GEMINI_API_KEY is not set; analysis will fail until it is configured");
    }

    let camera_device =
        std::env::var("FACEMAP_CAMERA_DEVICE").unwrap_or_else(|_| "/dev/video0".to_string());
    let bind_addr = std::env::var("FACEMAP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let app_state = AppState {
        sessions: Arc::new(SessionStore::new()),
        analyzer: Arc::new(analyzer),
        camera: Arc::new(CameraService::new(Arc::new(V4lCamera::new(&camera_device)))),
        images: Arc::new(ImageProcessor::new()),
    };

    info!("Starting HTTP server on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api/v1")
                    .route("/sessions", web::post().to(create_session))
                    .route("/sessions/{id}", web::get().to(get_session))
                    .route("/sessions/{id}/image", web::post().to(upload_image))
                    .route("/sessions/{id}/analyze", web::post().to(analyze))
                    .route("/sessions/{id}/reset", web::post().to(reset))
                    .route(
                        "/sessions/{id}/camera/snapshot",
                        web::post().to(camera_snapshot),
                    )
                    .route("/camera/open", web::post().to(open_camera))
                    .route("/camera/close", web::post().to(close_camera)),
            )
            .route("/health", web::get().to(health_check))
    })
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run()
    .await?;

    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "facemap",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
