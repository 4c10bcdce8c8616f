// src/services/v4l_camera.rs
//! V4L2 camera backend via the `v4l` crate.
use crate::errors::FacemapError;
use crate::services::camera_service::{CameraSource, CameraStream, RgbFrame};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use v4l::FourCC;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

const REQUESTED_WIDTH: u32 = 1280;
const REQUESTED_HEIGHT: u32 = 720;

/// Front-facing camera backend bound to one V4L2 device path.
pub struct V4lCamera {
    device_path: String,
}

impl V4lCamera {
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
        }
    }
}

#[async_trait]
impl CameraSource for V4lCamera {
    async fn open(&self) -> Result<Box<dyn CameraStream>, FacemapError> {
        let path = self.device_path.clone();
        // Device open and format negotiation are blocking ioctls.
        tokio::task::spawn_blocking(move || open_device(&path))
            .await
            .map_err(|e| FacemapError::DeviceUnavailable(format!("open task failed: {e}")))?
    }
}

fn open_device(path: &str) -> Result<Box<dyn CameraStream>, FacemapError> {
    if !Path::new(path).exists() {
        return Err(FacemapError::DeviceUnavailable(format!(
            "{path}: no such device"
        )));
    }

    let device = Device::with_path(path).map_err(|e| classify_open_error(path, &e))?;

    let caps = device.query_caps().map_err(|e| {
        FacemapError::DeviceUnavailable(format!("failed to query capabilities: {e}"))
    })?;
    if !caps
        .capabilities
        .contains(v4l::capability::Flags::VIDEO_CAPTURE)
    {
        return Err(FacemapError::DeviceUnavailable(format!(
            "{path} does not support video capture"
        )));
    }
    log::info!("opened camera {path} ({})", caps.card);

    let mut fmt = device
        .format()
        .map_err(|e| FacemapError::DeviceUnavailable(format!("failed to get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = REQUESTED_WIDTH;
    fmt.height = REQUESTED_HEIGHT;

    let negotiated = device
        .set_format(&fmt)
        .map_err(|e| FacemapError::DeviceUnavailable(format!("format negotiation failed: {e}")))?;
    if negotiated.fourcc != FourCC::new(b"YUYV") {
        return Err(FacemapError::DeviceUnavailable(format!(
            "unsupported pixel format {:?} (need YUYV)",
            negotiated.fourcc
        )));
    }
    log::info!("negotiated {}x{} YUYV", negotiated.width, negotiated.height);

    Ok(Box::new(V4lStream {
        device,
        width: negotiated.width,
        height: negotiated.height,
    }))
}

fn classify_open_error(path: &str, err: &std::io::Error) -> FacemapError {
    if err.kind() == ErrorKind::PermissionDenied {
        FacemapError::PermissionDenied(format!("{path}: {err}"))
    } else {
        FacemapError::DeviceUnavailable(format!("{path}: {err}"))
    }
}

struct V4lStream {
    device: Device,
    width: u32,
    height: u32,
}

impl CameraStream for V4lStream {
    fn grab(&mut self) -> Result<RgbFrame, FacemapError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| {
                FacemapError::DeviceUnavailable(format!("failed to create mmap stream: {e}"))
            })?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| FacemapError::DeviceUnavailable(format!("failed to dequeue buffer: {e}")))?;

        let data = yuyv_to_rgb(buf, self.width, self.height)?;
        Ok(RgbFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

/// Convert a packed YUYV 4:2:2 buffer to RGB8 (BT.601 full range).
fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FacemapError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(FacemapError::InvalidImage(format!(
            "YUYV buffer too short: expected {expected}, got {}",
            buf.len()
        )));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in buf[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for &y in &[chunk[0], chunk[2]] {
            let y = y as f32;
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}
