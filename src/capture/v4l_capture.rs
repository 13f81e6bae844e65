use super::CaptureSource;
use crate::config::CaptureConstraints;
use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbaImage};
use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Webcam capture.
///
/// The camera handle is not `Send`, so it lives on a dedicated thread that
/// grabs one frame per request.
pub struct WebcamCapture {
    requests: Option<Sender<()>>,
    frames: Receiver<Result<RgbaImage>>,
    worker: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    /// Open camera `device_index`, asking for the format closest to `constraints`.
    /// Frames are scaled to the requested size if the device picks another one.
    pub fn new(device_index: u32, constraints: CaptureConstraints) -> Result<Self> {
        let CaptureConstraints { width, height, fps } = constraints;
        tracing::info!(
            "Initializing webcam {} at {}x{} ({:.2}:1) @ {} fps",
            device_index,
            width,
            height,
            constraints.aspect_ratio(),
            fps
        );

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (frame_tx, frame_rx) = mpsc::sync_channel::<Result<RgbaImage>>(1);

        let worker = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let mut camera = match open_camera(device_index, constraints) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(()));
                        camera
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while request_rx.recv().is_ok() {
                    let frame = grab_frame(&mut camera, width, height);
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                }

                tracing::debug!("Camera capture thread stopped");
            })
            .context("Failed to spawn camera thread")?;

        ready_rx
            .recv()
            .context("Camera thread exited during startup")??;

        Ok(Self {
            requests: Some(request_tx),
            frames: frame_rx,
            worker: Some(worker),
            width,
            height,
        })
    }
}

fn open_camera(device_index: u32, constraints: CaptureConstraints) -> Result<Camera> {
    let index = CameraIndex::Index(device_index);
    let wanted = CameraFormat::new_from(
        constraints.width,
        constraints.height,
        FrameFormat::MJPEG,
        constraints.fps,
    );
    let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(wanted));

    let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

    camera
        .open_stream()
        .context("Failed to open camera stream")?;

    let actual = camera.camera_format();
    tracing::info!(
        "Webcam initialized at {}x{} {:?} @ {} fps",
        actual.width(),
        actual.height(),
        actual.format(),
        actual.frame_rate()
    );

    Ok(camera)
}

fn grab_frame(camera: &mut Camera, width: u32, height: u32) -> Result<RgbaImage> {
    let frame = camera.frame().context("Failed to capture frame")?;

    let decoded = frame
        .decode_image::<RgbAFormat>()
        .context("Failed to decode frame")?;

    if decoded.dimensions() == (width, height) {
        Ok(decoded)
    } else {
        Ok(imageops::resize(
            &decoded,
            width,
            height,
            imageops::FilterType::Triangle,
        ))
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbaImage> {
        self.requests
            .as_ref()
            .ok_or_else(|| anyhow!("Camera capture has been shut down"))?
            .send(())
            .map_err(|_| anyhow!("Camera thread has stopped"))?;

        self.frames.recv().context("Camera thread has stopped")?
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        // Closing the request channel ends the capture thread
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
