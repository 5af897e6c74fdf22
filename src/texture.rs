use std::{
    fs,
    path::Path,
    sync::LazyLock,
};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, RgbaImage, imageops::FilterType};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Toon ramp size: 24 lit rows above 8 shade rows.
const TOON_WIDTH: u32 = 32;
const TOON_LIT_ROWS: u32 = 24;
const TOON_SHADE_ROWS: u32 = 8;

static HAIR_MATERIAL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"((F\d+_\d+_Hair_\d+)_HAIR_\d+)").ok());

/// Interpolation method used for texture resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeInterpolation {
    /// Fast nearest-neighbor interpolation.
    Nearest,
    /// Bilinear interpolation (`image`'s `Triangle` filter).
    #[default]
    Bilinear,
    /// Bicubic interpolation (`image`'s `CatmullRom` filter).
    Bicubic,
    /// Gaussian interpolation.
    Gaussian,
    /// Lanczos (windowed sinc) interpolation.
    Lanczos3,
}

impl From<ResizeInterpolation> for FilterType {
    fn from(value: ResizeInterpolation) -> Self {
        match value {
            ResizeInterpolation::Nearest => FilterType::Nearest,
            ResizeInterpolation::Bilinear => FilterType::Triangle,
            ResizeInterpolation::Bicubic => FilterType::CatmullRom,
            ResizeInterpolation::Gaussian => FilterType::Gaussian,
            ResizeInterpolation::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// File extension for an embedded image MIME type.
pub fn mime_extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/ktx" => Some("ktx"),
        "image/ktx2" => Some("ktx2"),
        "image/webp" => Some("webp"),
        "image/vnd-ms.dds" => Some("dds"),
        _ => None,
    }
}

/// Write the same bytes into every directory, creating each as needed.
pub fn write_texture_file(dirs: &[&Path], file_name: &str, bytes: &[u8]) -> Result<()> {
    for dir in dirs {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create texture dir: {}", dir.display()))?;
        let path = dir.join(file_name);
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write texture: {}", path.display()))?;
    }
    Ok(())
}

// ─── Toon ramps ───────────────────────────────────────────────────────────────

/// 32×32 ramp: white on top, the shade colour in the bottom rows.
pub fn toon_ramp(shade: [f32; 3]) -> RgbImage {
    let shade_pixel = Rgb(shade.map(unit_to_byte));
    RgbImage::from_fn(TOON_WIDTH, TOON_LIT_ROWS + TOON_SHADE_ROWS, |_, y| {
        if y < TOON_LIT_ROWS {
            Rgb([255, 255, 255])
        } else {
            shade_pixel
        }
    })
}

pub fn write_toon_ramp(path: &Path, shade: [f32; 3]) -> Result<()> {
    toon_ramp(shade)
        .save_with_format(path, ImageFormat::Bmp)
        .with_context(|| format!("failed to write toon ramp: {}", path.display()))
}

// ─── Hair blend ───────────────────────────────────────────────────────────────

/// Output and input file names for a hair material's blended texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HairBlendNames {
    pub blend: String,
    pub specular: String,
}

/// Names for a hair material (`F00_000_Hair_00_HAIR_01` style), if it is one.
pub fn hair_blend_names(material_name: &str) -> Option<HairBlendNames> {
    let captures = HAIR_MATERIAL.as_ref()?.captures(material_name)?;
    Some(HairBlendNames {
        blend: format!("{}_blend.png", captures.get(1)?.as_str()),
        specular: format!("{}_spe.png", captures.get(2)?.as_str()),
    })
}

/// `screen(main × color, specular × emissive)`, per channel including alpha.
///
/// The specular layer is resampled to the main texture's size when they differ.
pub fn hair_blend(
    main: &DynamicImage,
    specular: &DynamicImage,
    color: [f32; 4],
    emissive: [f32; 3],
    interpolation: ResizeInterpolation,
) -> RgbaImage {
    let main = main.to_rgba8();
    let specular = resize_to_match(specular, main.width(), main.height(), interpolation).to_rgba8();
    let tint = color.map(unit_to_byte);
    let glow = [emissive[0], emissive[1], emissive[2], 1.0].map(unit_to_byte);

    RgbaImage::from_fn(main.width(), main.height(), |x, y| {
        let base = main.get_pixel(x, y).0;
        let shine = specular.get_pixel(x, y).0;
        let mut out = [0u8; 4];
        for channel in 0..4 {
            let lit = multiply(base[channel], tint[channel]);
            let spec = multiply(shine[channel], glow[channel]);
            out[channel] = screen(lit, spec);
        }
        image::Rgba(out)
    })
}

/// Resample to exactly `width`×`height`; unchanged clone when already that size.
pub fn resize_to_match(
    image: &DynamicImage,
    width: u32,
    height: u32,
    interpolation: ResizeInterpolation,
) -> DynamicImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }

    image.resize_exact(width, height, interpolation.into())
}

fn unit_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0) as u8
}

fn multiply(a: u8, b: u8) -> u8 {
    ((u16::from(a) * u16::from(b)) / 255) as u8
}

fn screen(a: u8, b: u8) -> u8 {
    255 - (((255 - u16::from(a)) * (255 - u16::from(b))) / 255) as u8
}
