// src/services/session_store.rs
use crate::errors::FacemapError;
use crate::models::{AnalysisResult, CapturedImage, Phase, SessionView};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One user session: at most one image in flight at a time.
///
/// `epoch` increments on every capture and reset. In-flight work (analysis,
/// enrichment) carries the epoch it started under and may only commit while
/// the session is still at that epoch; anything else is stale and discarded.
#[derive(Debug)]
struct Session {
    phase: Phase,
    image: Option<CapturedImage>,
    result: Option<AnalysisResult>,
    last_error: Option<String>,
    enriching: bool,
    epoch: u64,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            image: None,
            result: None,
            last_error: None,
            enriching: false,
            epoch: 0,
            created_at: Utc::now(),
        }
    }

    fn view(&self, id: Uuid) -> SessionView {
        SessionView {
            session_id: id,
            phase: self.phase,
            image: self.image.as_ref().map(CapturedImage::data_uri),
            provenance: self.image.as_ref().map(|i| i.provenance),
            result: self.result.clone(),
            analyzing: self.phase == Phase::Analyzing,
            enriching: self.enriching,
            last_error: self.last_error.clone(),
        }
    }
}

/// In-memory session registry. Sessions live exactly as long as the process;
/// nothing is written to disk or any external store.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.lock().await.insert(id, Session::new());
        log::debug!("created session {id}");
        id
    }

    pub async fn view(&self, id: Uuid) -> Result<SessionView, FacemapError> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(&id).ok_or(FacemapError::SessionNotFound(id))?;
        Ok(session.view(id))
    }

    /// Install a new capture. This is an interrupt, valid in every phase:
    /// the result and error are cleared atomically with the image swap, and
    /// the epoch bump invalidates any in-flight analysis or enrichment.
    pub async fn put_image(
        &self,
        id: Uuid,
        image: CapturedImage,
    ) -> Result<SessionView, FacemapError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(FacemapError::SessionNotFound(id))?;

        session.epoch += 1;
        session.image = Some(image);
        session.result = None;
        session.last_error = None;
        session.enriching = false;
        session.phase = Phase::HasImage;
        Ok(session.view(id))
    }

    /// Enter `Analyzing`. Only legal from `HasImage`; re-entrant calls and
    /// calls without a current image are rejected.
    pub async fn begin_analysis(&self, id: Uuid) -> Result<(u64, CapturedImage), FacemapError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(FacemapError::SessionNotFound(id))?;

        match session.phase {
            Phase::Analyzing => {
                return Err(FacemapError::InvalidState(
                    "analysis already in progress".to_string(),
                ));
            }
            Phase::HasImage => {}
            Phase::Idle | Phase::Analyzed => {
                return Err(FacemapError::InvalidState(
                    "no image ready for analysis".to_string(),
                ));
            }
        }

        let image = session
            .image
            .clone()
            .ok_or_else(|| FacemapError::InvalidState("no image ready for analysis".to_string()))?;
        session.phase = Phase::Analyzing;
        session.last_error = None;
        Ok((session.epoch, image))
    }

    /// Commit the outcome of an analysis call started at `epoch`. Returns
    /// whether the outcome was applied; a session that moved on (new capture
    /// or reset) discards the outcome untouched.
    pub async fn settle_analysis(
        &self,
        id: Uuid,
        epoch: u64,
        outcome: Result<AnalysisResult, String>,
    ) -> Result<bool, FacemapError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(FacemapError::SessionNotFound(id))?;

        if session.phase != Phase::Analyzing || session.epoch != epoch {
            log::info!("discarding stale analysis outcome for session {id}");
            return Ok(false);
        }

        match outcome {
            Ok(result) => {
                session.result = Some(result);
                session.last_error = None;
                session.phase = Phase::Analyzed;
            }
            Err(message) => {
                // The image stays in place so the user can retry manually.
                session.result = None;
                session.last_error = Some(message);
                session.phase = Phase::HasImage;
            }
        }
        Ok(true)
    }

    /// Mark enrichment as in flight for the result produced at `epoch`.
    pub async fn begin_enrichment(&self, id: Uuid, epoch: u64) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&id) else {
            return false;
        };
        if session.phase != Phase::Analyzed || session.epoch != epoch || session.result.is_none() {
            return false;
        }
        session.enriching = true;
        true
    }

    /// Attach the inspiration image to the result it was generated for.
    /// Write-once: a stale epoch, a missing result, or an already-attached
    /// image all discard the payload.
    pub async fn attach_inspiration(&self, id: Uuid, epoch: u64, data_uri: String) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&id) else {
            return false;
        };
        if session.epoch != epoch {
            return false;
        }
        match session.result.as_mut() {
            Some(result) if result.inspiration_image.is_none() => {
                result.inspiration_image = Some(data_uri);
                true
            }
            _ => false,
        }
    }

    pub async fn finish_enrichment(&self, id: Uuid, epoch: u64) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            if session.epoch == epoch {
                session.enriching = false;
            }
        }
    }

    /// Return to `Idle`: image, result, and error are all dropped and any
    /// in-flight work is invalidated.
    pub async fn reset(&self, id: Uuid) -> Result<SessionView, FacemapError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&id)
            .ok_or(FacemapError::SessionNotFound(id))?;

        session.epoch += 1;
        session.image = None;
        session.result = None;
        session.last_error = None;
        session.enriching = false;
        session.phase = Phase::Idle;
        Ok(session.view(id))
    }
}
