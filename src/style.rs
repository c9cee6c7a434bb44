// Style presets, input preparation and the generator seam.
//
// The image-to-image model is external and slow; it plugs in through
// `Generator`. Before a call the canvas is cropped to its drawn content
// and resized to the model's working size by `prepare_input`.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{Error, Result};
use crate::types::Rect;

/// Channel difference below which a pixel still counts as background.
const CONTENT_TOLERANCE: u8 = 5;

/// Fraction of the content box added on every side before cropping.
pub const CROP_MARGIN: f32 = 0.15;

/// Long side of the prepared input.
pub const TARGET_SIZE: u32 = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct StylePreset {
    pub key: &'static str,
    pub name: &'static str,
    pub prompt: &'static str,
    pub negative_prompt: &'static str,
    pub strength: f32,
    pub guidance_scale: f32,
}

pub static STYLE_PRESETS: [StylePreset; 5] = [
    StylePreset {
        key: "photorealistic",
        name: "Photorealistic",
        prompt: "professional photography, highly detailed, sharp focus, 8k resolution, natural lighting, award winning photo",
        negative_prompt: "cartoon, digital art, illustration, painting, drawing, anime",
        strength: 0.70,
        guidance_scale: 8.0,
    },
    StylePreset {
        key: "anime",
        name: "Anime Style",
        prompt: "anime illustration, clean line art, vibrant colors, Studio Ghibli style, high quality, cel shading",
        negative_prompt: "photo, realistic, 3d render, blurry, low quality",
        strength: 0.75,
        guidance_scale: 7.5,
    },
    StylePreset {
        key: "oil_painting",
        name: "Oil Painting",
        prompt: "oil painting on canvas, brushstrokes visible, impressionist style, classical art, museum quality, rich colors",
        negative_prompt: "photo, digital art, 3d render, low quality",
        strength: 0.80,
        guidance_scale: 9.0,
    },
    StylePreset {
        key: "watercolor",
        name: "Watercolor",
        prompt: "watercolor painting, soft edges, translucent colors, artistic, high quality, on textured paper",
        negative_prompt: "photo, digital art, sharp edges, low quality",
        strength: 0.75,
        guidance_scale: 8.0,
    },
    StylePreset {
        key: "sketch",
        name: "Pencil Sketch",
        prompt: "pencil sketch, graphite drawing, artistic shading, detailed linework, high quality illustration",
        negative_prompt: "photo, color, digital art, low quality",
        strength: 0.70,
        guidance_scale: 7.0,
    },
];

/// Look up a preset by key.
pub fn preset(key: &str) -> Result<&'static StylePreset> {
    STYLE_PRESETS
        .iter()
        .find(|p| p.key == key)
        .ok_or_else(|| Error::UnknownStyle(key.to_string()))
}

pub fn style_keys() -> impl Iterator<Item = &'static str> {
    STYLE_PRESETS.iter().map(|p| p.key)
}

/// Output of one generator call.
#[derive(Debug, Clone)]
pub struct Generated {
    pub image: RgbImage,
    /// Free-form name of whatever produced the image (model id, device...).
    pub backend: String,
}

/// The image-to-image collaborator. Runs on the generation worker, one call at a time.
pub trait Generator: Send {
    fn generate(&mut self, input: &RgbImage, style: &StylePreset, steps: u32) -> std::result::Result<Generated, String>;

    /// Drop transient buffers after a run.
    fn clear_cache(&mut self) {}
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&mut self, input: &RgbImage, style: &StylePreset, steps: u32) -> std::result::Result<Generated, String> {
        (**self).generate(input, style, steps)
    }

    fn clear_cache(&mut self) {
        (**self).clear_cache()
    }
}

/* ---------- Input preparation ---------- */

#[derive(Debug, Clone, PartialEq)]
pub struct CropInfo {
    /// Crop box in canvas pixels; `None` when the canvas was blank.
    pub bbox: Option<Rect>,
    pub original_size: (u32, u32),
    pub resized_size: (u32, u32),
    pub margin: f32,
}

#[derive(Debug, Clone)]
pub struct Prepared {
    pub image: RgbImage,
    pub info: CropInfo,
}

/// Crop `image` to its drawn content plus `margin`, then fit to `target`.
pub fn prepare_input(image: &RgbImage, background: Rgb<u8>, margin: f32, target: u32) -> Prepared {
    let (img_w, img_h) = image.dimensions();
    let bbox = content_rect(image, background).map(|r| {
        let mw = (r.width() as f32 * margin) as u32;
        let mh = (r.height() as f32 * margin) as u32;
        Rect {
            x1: r.x1.saturating_sub(mw),
            y1: r.y1.saturating_sub(mh),
            x2: (r.x2 + mw).min(img_w),
            y2: (r.y2 + mh).min(img_h),
        }
    });

    let cropped = match bbox {
        Some(r) => imageops::crop_imm(image, r.x1, r.y1, r.width(), r.height()).to_image(),
        None => image.clone(),
    };

    let (w, h) = fit_dimensions(cropped.dimensions(), target);
    let resized = imageops::resize(&cropped, w, h, FilterType::Lanczos3);

    Prepared {
        image: resized,
        info: CropInfo {
            bbox,
            original_size: (img_w, img_h),
            resized_size: (w, h),
            margin,
        },
    }
}

/// Scale so the long side is `target`, then round both sides down to multiples of 8.
pub fn fit_dimensions((w, h): (u32, u32), target: u32) -> (u32, u32) {
    let (w, h) = (w.max(1) as f32, h.max(1) as f32);
    let aspect = w / h;
    let (nw, nh) = if aspect > 1.0 {
        (target as f32, target as f32 / aspect)
    } else {
        (target as f32 * aspect, target as f32)
    };
    let snap = |v: f32| ((v as u32) / 8 * 8).max(8);
    (snap(nw), snap(nh))
}

/// Bounding box of pixels that differ from `background`.
fn content_rect(image: &RgbImage, background: Rgb<u8>) -> Option<Rect> {
    let (mut x1, mut y1, mut x2, mut y2) = (u32::MAX, u32::MAX, 0u32, 0u32);
    for (x, y, px) in image.enumerate_pixels() {
        let differs = px.0.iter().zip(background.0.iter()).any(|(a, b)| a.abs_diff(*b) > CONTENT_TOLERANCE);
        if differs {
            x1 = x1.min(x);
            y1 = y1.min(y);
            x2 = x2.max(x + 1);
            y2 = y2.max(y + 1);
        }
    }
    (x1 != u32::MAX).then_some(Rect { x1, y1, x2, y2 })
}

/* ---------- PreviewStylizer ---------- */

/// Cheap in-process stand-in for a diffusion model.
///
/// Each preset maps to a couple of `image` filters, scaled by the preset's
/// strength. Good enough to exercise the whole pipeline without a GPU.
#[derive(Debug, Default)]
pub struct PreviewStylizer {
    runs: u64,
}

impl PreviewStylizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }
}

impl Generator for PreviewStylizer {
    fn generate(&mut self, input: &RgbImage, style: &StylePreset, steps: u32) -> std::result::Result<Generated, String> {
        if input.width() == 0 || input.height() == 0 {
            return Err("empty input image".into());
        }
        self.runs += 1;
        let s = style.strength;

        let image = match style.key {
            "photorealistic" => imageops::contrast(&imageops::blur(input, 0.8 * s), 15.0 * s),
            "anime" => posterize(&imageops::unsharpen(input, 1.0, 4), 4),
            "oil_painting" => imageops::huerotate(&imageops::blur(input, 2.5 * s), 12),
            "watercolor" => imageops::brighten(&imageops::blur(input, 3.5 * s), (20.0 * s) as i32),
            "sketch" => {
                let gray = imageops::grayscale(input);
                DynamicImage::ImageLuma8(imageops::contrast(&gray, 40.0 * s)).to_rgb8()
            }
            other => return Err(format!("no preview filter for style {other}")),
        };

        Ok(Generated { image, backend: format!("preview/{steps}-step") })
    }
}

/// Quantize each channel to `levels` evenly spaced values.
fn posterize(img: &RgbImage, levels: u8) -> RgbImage {
    let step = 255 / levels.saturating_sub(1).max(1);
    let mut out = img.clone();
    for px in out.pixels_mut() {
        for c in px.0.iter_mut() {
            *c = ((*c as u16 + step as u16 / 2) / step as u16 * step as u16).min(255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

    #[test]
    fn known_and_unknown_presets() {
        assert_eq!(preset("anime").unwrap().name, "Anime Style");
        assert!(matches!(preset("cubism"), Err(Error::UnknownStyle(_))));
        assert_eq!(style_keys().count(), 5);
    }

    #[test]
    fn blank_canvas_keeps_whole_image() {
        let img = RgbImage::from_pixel(1024, 1024, WHITE);
        let prepared = prepare_input(&img, WHITE, CROP_MARGIN, TARGET_SIZE);
        assert_eq!(prepared.info.bbox, None);
        assert_eq!(prepared.image.dimensions(), (512, 512));
    }

    #[test]
    fn crop_adds_margin_and_clips() {
        let mut img = RgbImage::from_pixel(200, 200, WHITE);
        for x in 100..200 {
            for y in 50..70 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let prepared = prepare_input(&img, WHITE, CROP_MARGIN, TARGET_SIZE);
        // Content 100x20: margin 15 x 3, right edge clipped to the image.
        assert_eq!(prepared.info.bbox, Some(Rect { x1: 85, y1: 47, x2: 200, y2: 73 }));
        let (w, h) = prepared.info.resized_size;
        assert_eq!(w, 512);
        assert_eq!(h % 8, 0);
        assert_eq!(prepared.image.dimensions(), (w, h));
    }

    #[test]
    fn near_background_noise_is_ignored() {
        let mut img = RgbImage::from_pixel(64, 64, WHITE);
        img.put_pixel(3, 3, Rgb([252, 252, 252]));
        assert!(prepare_input(&img, WHITE, CROP_MARGIN, 64).info.bbox.is_none());
    }

    #[test]
    fn fit_dimensions_rounds_to_eight() {
        assert_eq!(fit_dimensions((1024, 1024), 512), (512, 512));
        assert_eq!(fit_dimensions((300, 200), 512), (512, 336));
        assert_eq!(fit_dimensions((200, 300), 512), (336, 512));
        // Extreme strips never collapse below 8.
        assert_eq!(fit_dimensions((1000, 1), 512), (512, 8));
    }

    #[test]
    fn preview_handles_every_preset() {
        let mut stylizer = PreviewStylizer::new();
        let input = RgbImage::from_pixel(16, 16, Rgb([120, 60, 30]));
        for p in STYLE_PRESETS.iter() {
            let out = stylizer.generate(&input, p, 4).unwrap();
            assert_eq!(out.image.dimensions(), (16, 16), "{}", p.key);
        }
        assert_eq!(stylizer.runs(), 5);
    }

    #[test]
    fn sketch_is_monochrome() {
        let mut stylizer = PreviewStylizer::new();
        let input = RgbImage::from_pixel(8, 8, Rgb([200, 30, 90]));
        let out = stylizer.generate(&input, preset("sketch").unwrap(), 1).unwrap();
        let px = out.image.get_pixel(4, 4);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn posterize_snaps_channels() {
        let img = RgbImage::from_pixel(1, 1, Rgb([0, 100, 250]));
        assert_eq!(*posterize(&img, 4).get_pixel(0, 0), Rgb([0, 85, 255]));
    }
}
