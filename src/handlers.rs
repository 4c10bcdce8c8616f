// src/handlers.rs
use crate::{AppState, errors::FacemapError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures_util::TryStreamExt;
use uuid::Uuid;

pub async fn create_session(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let session_id = data.sessions.create().await;
    Ok(HttpResponse::Created().json(serde_json::json!({ "session_id": session_id })))
}

pub async fn get_session(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let view = data.sessions.view(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// File-upload capture affordance. Takes the first multipart field as the
/// image payload; a new capture replaces the old one and clears any result.
pub async fn upload_image(
    path: web::Path<Uuid>,
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();

    let mut image_data: Vec<u8> = Vec::new();
    if let Some(mut field) = payload.try_next().await? {
        while let Some(chunk) = field.try_next().await? {
            image_data.extend_from_slice(&chunk);
        }
    }
    if image_data.is_empty() {
        return Err(FacemapError::InvalidImage("no image payload in upload".to_string()).into());
    }

    let captured = data.images.capture_from_file(&image_data)?;
    let view = data.sessions.put_image(session_id, captured).await?;
    Ok(HttpResponse::Ok().json(view))
}

/// Primary analysis call. The outcome only commits if the session has not
/// been superseded by a new capture or reset while the call was in flight.
/// A committed success kicks off the best-effort enrichment step.
pub async fn analyze(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();
    let (epoch, image) = data.sessions.begin_analysis(session_id).await?;

    match data.analyzer.analyze_face(&image).await {
        Ok(result) => {
            let applied = data
                .sessions
                .settle_analysis(session_id, epoch, Ok(result.clone()))
                .await?;
            if applied {
                spawn_enrichment(data.clone(), session_id, epoch, result.shape, result.tips);
            }
            let view = data.sessions.view(session_id).await?;
            Ok(HttpResponse::Ok().json(view))
        }
        Err(err) => {
            let applied = data
                .sessions
                .settle_analysis(session_id, epoch, Err(err.to_string()))
                .await?;
            if applied {
                Err(err.into())
            } else {
                // Superseded mid-flight; the caller gets the current state.
                let view = data.sessions.view(session_id).await?;
                Ok(HttpResponse::Ok().json(view))
            }
        }
    }
}

/// Fire-and-forget enrichment: failure never disturbs the displayed result,
/// and a stale resolution (reset or new capture meanwhile) is discarded.
fn spawn_enrichment(
    data: web::Data<AppState>,
    session_id: Uuid,
    epoch: u64,
    shape: FaceShape,
    tips: StyleTips,
) {
    tokio::spawn(async move {
        if !data.sessions.begin_enrichment(session_id, epoch).await {
            return;
        }
        match data.analyzer.generate_inspiration(shape, &tips).await {
            Ok(data_uri) => {
                if !data
                    .sessions
                    .attach_inspiration(session_id, epoch, data_uri)
                    .await
                {
                    log::info!("discarding inspiration image for superseded result");
                }
            }
            Err(FacemapError::MissingCredential | FacemapError::NoImageProduced) => {
                log::debug!("inspiration image unavailable for session {session_id}");
            }
            Err(err) => {
                log::warn!("inspiration generation failed: {err}");
            }
        }
        data.sessions.finish_enrichment(session_id, epoch).await;
    });
}

pub async fn reset(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    data.camera.close().await;
    let view = data.sessions.reset(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(view))
}

pub async fn open_camera(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let open = data.camera.open().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "open": open })))
}

pub async fn close_camera(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    data.camera.close().await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "open": false })))
}

/// Camera capture affordance: grab a mirrored frame into the session and
/// release the device.
pub async fn camera_snapshot(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();
    let frame = data.camera.snapshot().await?;
    let captured = data.images.capture_from_frame(frame)?;
    let view = data.sessions.put_image(session_id, captured).await?;
    Ok(HttpResponse::Ok().json(view))
}
