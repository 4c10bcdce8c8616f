// src/services/camera_service.rs
use crate::errors::FacemapError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// One RGB8 frame handed over by a camera backend.
#[derive(Debug)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// An open camera device. Dropping the stream releases the device.
pub trait CameraStream: Send {
    fn grab(&mut self) -> Result<RgbFrame, FacemapError>;
}

#[async_trait]
pub trait CameraSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn CameraStream>, FacemapError>;
}

enum Slot {
    Closed,
    /// An open request is in flight; the generation identifies it.
    Opening(u64),
    Open {
        generation: u64,
        stream: Box<dyn CameraStream>,
    },
}

/// Owner of the single camera device handle.
///
/// At most one stream is open at a time. Every `open` and `close` bumps a
/// monotonic generation; an open request that resolves after it has been
/// superseded finds the generation changed and releases its stream on the
/// spot instead of leaking the device.
pub struct CameraService {
    source: Arc<dyn CameraSource>,
    slot: Mutex<Slot>,
    generation: AtomicU64,
}

impl CameraService {
    pub fn new(source: Arc<dyn CameraSource>) -> Self {
        Self {
            source,
            slot: Mutex::new(Slot::Closed),
            generation: AtomicU64::new(0),
        }
    }

    /// Open the camera. A prior open stream is force-closed first; a prior
    /// pending open is superseded. Returns whether this call ended with the
    /// camera open (false means it was superseded while in flight).
    pub async fn open(&self) -> Result<bool, FacemapError> {
        let generation = {
            let mut slot = self.slot.lock().await;
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            if matches!(&*slot, Slot::Open { .. }) {
                log::warn!("camera already open; force-closing prior stream");
            }
            // Dropping a previous Open releases its stream here.
            *slot = Slot::Opening(generation);
            generation
        };

        let opened = self.source.open().await;

        let mut slot = self.slot.lock().await;
        let still_current = matches!(&*slot, Slot::Opening(g) if *g == generation);
        match opened {
            Ok(stream) if still_current => {
                *slot = Slot::Open { generation, stream };
                Ok(true)
            }
            Ok(stream) => {
                // Closed (or re-opened) while we were waiting: release the
                // device immediately rather than keep an untracked handle.
                drop(stream);
                log::info!("camera open superseded; releasing stream");
                Ok(false)
            }
            Err(err) if still_current => {
                *slot = Slot::Closed;
                Err(err)
            }
            Err(err) => {
                log::debug!("superseded camera open failed: {err}");
                Ok(false)
            }
        }
    }

    /// Close the camera. Idempotent; also cancels a pending open.
    pub async fn close(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.slot.lock().await;
        if !matches!(&*slot, Slot::Closed) {
            log::debug!("closing camera");
        }
        *slot = Slot::Closed;
    }

    /// Grab one frame and close the camera. The stream is consumed so the
    /// device is released whether or not the grab succeeds.
    pub async fn snapshot(&self) -> Result<RgbFrame, FacemapError> {
        let mut stream = {
            let mut slot = self.slot.lock().await;
            match std::mem::replace(&mut *slot, Slot::Closed) {
                Slot::Open { stream, .. } => stream,
                other => {
                    *slot = other;
                    return Err(FacemapError::CameraClosed);
                }
            }
        };

        // The grab is blocking device I/O; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            let frame = stream.grab();
            drop(stream);
            frame
        })
        .await
        .map_err(|e| FacemapError::DeviceUnavailable(format!("capture task failed: {e}")))?
    }

    pub async fn is_open(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Open { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Backend that counts live streams and can hold `open` until released.
    struct MockSource {
        live: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
    }

    struct MockStream {
        live: Arc<AtomicUsize>,
    }

    impl MockStream {
        fn new(live: Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self { live }
        }
    }

    impl Drop for MockStream {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl CameraStream for MockStream {
        fn grab(&mut self) -> Result<RgbFrame, FacemapError> {
            Ok(RgbFrame {
                width: 2,
                height: 2,
                data: vec![128; 12],
            })
        }
    }

    #[async_trait]
    impl CameraSource for MockSource {
        async fn open(&self) -> Result<Box<dyn CameraStream>, FacemapError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(Box::new(MockStream::new(self.live.clone())))
        }
    }

    fn service(gate: Option<Arc<Notify>>) -> (Arc<CameraService>, Arc<AtomicUsize>) {
        let live = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(MockSource {
            live: live.clone(),
            gate,
        });
        (Arc::new(CameraService::new(source)), live)
    }

    #[tokio::test]
    async fn open_snapshot_releases_the_device() {
        let (camera, live) = service(None);
        assert!(camera.open().await.unwrap());
        assert!(camera.is_open().await);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let frame = camera.snapshot().await.unwrap();
        assert_eq!(frame.width, 2);
        assert!(!camera.is_open().await);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn snapshot_without_open_camera_fails() {
        let (camera, _) = service(None);
        let err = camera.snapshot().await.unwrap_err();
        assert!(matches!(err, FacemapError::CameraClosed));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (camera, live) = service(None);
        camera.close().await;
        assert!(camera.open().await.unwrap());
        camera.close().await;
        camera.close().await;
        assert!(!camera.is_open().await);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_open_force_closes_the_first() {
        let (camera, live) = service(None);
        assert!(camera.open().await.unwrap());
        assert!(camera.open().await.unwrap());
        assert!(camera.is_open().await);
        // Never more than one tracked device handle.
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_before_open_resolves_leaks_no_handle() {
        let gate = Arc::new(Notify::new());
        let (camera, live) = service(Some(gate.clone()));

        let pending = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.open().await })
        };
        // Let the open request reach the backend, then cancel it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        camera.close().await;
        gate.notify_one();

        let opened = pending.await.unwrap().unwrap();
        assert!(!opened, "superseded open must not report the camera as open");
        assert!(!camera.is_open().await);
        assert_eq!(live.load(Ordering::SeqCst), 0, "no leaked device handle");
    }

    #[tokio::test]
    async fn open_during_pending_open_wins() {
        let gate = Arc::new(Notify::new());
        let (camera, live) = service(Some(gate.clone()));

        let first = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.open().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let second = {
            let camera = camera.clone();
            tokio::spawn(async move { camera.open().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Resolve both backend opens.
        gate.notify_one();
        gate.notify_one();

        let first_opened = first.await.unwrap().unwrap();
        let second_opened = second.await.unwrap().unwrap();
        assert!(!first_opened);
        assert!(second_opened);
        assert!(camera.is_open().await);
        assert_eq!(live.load(Ordering::SeqCst), 1);
    }
}
