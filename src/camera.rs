// Frame sources for the capture worker.
// `CameraCapture` opens a webcam through nokhwa and decodes each frame to RGB.
// `SyntheticSource` hands out blank frames at a fixed pace for headless runs.

use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use crate::error::Error;

/// Anything the capture worker can pull frames from.
pub trait FrameSource {
    /// Block until the next frame is ready.
    fn next_frame(&mut self) -> Result<RgbImage, Error>;

    /// Size of the frames this source delivers.
    fn resolution(&self) -> (u32, u32);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<RgbImage, Error> {
        (**self).next_frame()
    }

    fn resolution(&self) -> (u32, u32) {
        (**self).resolution()
    }
}

#[cfg(feature = "camera")]
pub use self::webcam::CameraCapture;

#[cfg(feature = "camera")]
mod webcam {
    use image::RgbImage;
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    };
    use tracing::info;

    use super::FrameSource;
    use crate::error::Error;

    // A small wrapper around nokhwa::Camera so the capture loop stays clean.
    pub struct CameraCapture {
        cam: Camera,
        width: u32,
        height: u32,
    }

    impl CameraCapture {
        /// Open camera `index` near the requested size and rate (falls back if not exact).
        pub fn new(index: u32, width: u32, height: u32, fps: u32) -> Result<Self, Error> {
            let idx = CameraIndex::Index(index);

            let fmt = CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::YUYV, // uncompressed; cheap to convert to RGB
                fps,
            );
            let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(fmt));

            let mut cam = Camera::new(idx, req)
                .map_err(|e| Error::CameraInit(format!("Create camera: {e}")))?;
            cam.open_stream()
                .map_err(|e| Error::CameraInit(format!("Open stream: {e}")))?;

            // The stream might settle on a slightly different resolution.
            let actual = cam.resolution();
            info!(index, width = actual.width(), height = actual.height(), "camera opened");

            Ok(Self {
                cam,
                width: actual.width(),
                height: actual.height(),
            })
        }
    }

    impl FrameSource for CameraCapture {
        fn next_frame(&mut self) -> Result<RgbImage, Error> {
            let frame = self
                .cam
                .frame()
                .map_err(|e| Error::CameraFrame(format!("Fetch frame: {e}")))?;
            let decoded = frame
                .decode_image::<RgbFormat>()
                .map_err(|e| Error::CameraFrame(format!("Decode RGB: {e}")))?;

            // Rebuild from raw bytes so nokhwa's `image` version never leaks into ours.
            let (w, h) = decoded.dimensions();
            RgbImage::from_raw(w, h, decoded.into_raw())
                .ok_or_else(|| Error::CameraFrame(format!("Short RGB buffer for {w}x{h}")))
        }

        fn resolution(&self) -> (u32, u32) {
            (self.width, self.height)
        }
    }

    impl Drop for CameraCapture {
        fn drop(&mut self) {
            let _ = self.cam.stop_stream();
        }
    }
}

/// Blank frames at a steady rate.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fill: Rgb<u8>,
    interval: Duration,
    last: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fill: Rgb([0, 0, 0]),
            interval: Duration::from_secs(1) / fps.max(1),
            last: None,
        }
    }

    pub fn with_fill(mut self, fill: Rgb<u8>) -> Self {
        self.fill = fill;
        self
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<RgbImage, Error> {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                thread::sleep(self.interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
        Ok(RgbImage::from_pixel(self.width, self.height, self.fill))
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_have_requested_size() {
        let mut src = SyntheticSource::new(32, 24, 1000).with_fill(Rgb([9, 8, 7]));
        let frame = src.next_frame().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert_eq!(*frame.get_pixel(31, 23), Rgb([9, 8, 7]));
        assert_eq!(src.resolution(), (32, 24));
    }

    #[test]
    fn synthetic_source_is_paced() {
        let mut src = SyntheticSource::new(2, 2, 50);
        let start = Instant::now();
        for _ in 0..3 {
            src.next_frame().unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
