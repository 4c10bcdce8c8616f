// src/services/mod.rs
pub mod camera_service;
pub mod gemini_service;
pub mod image_processor;
pub mod session_store;
pub mod v4l_camera;

pub use camera_service::{CameraService, CameraSource};
pub use gemini_service::{FaceAnalyzer, GeminiService};
pub use image_processor::ImageProcessor;
pub use session_store::SessionStore;
pub use v4l_camera::V4lCamera;
