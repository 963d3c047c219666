//! Image → RGB565 pixel buffer conversion.
//!
//! The remote display is a fixed 128×128 panel that takes 16-bit RGB565
//! pixels. Arbitrary source images are mapped onto it with a cover-fit:
//! the image is scaled until it fills the whole canvas, centred, and the
//! overflow on one axis is cropped. Sampling is bilinear at pixel
//! centres with edge clamping, so the output is a pure function of the
//! input pixels.
//!
//! ```text
//!  256×128 source            drawn 256×128, offset (-64, 0)
//!  ┌────────────────┐        ┌───┬────────┬───┐
//!  │                │   ──►  │ x │ canvas │ x │   x = cropped
//!  └────────────────┘        └───┴────────┴───┘
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MxError;

// ── Constants ────────────────────────────────────────────────────

/// Display width in pixels.
pub const CANVAS_WIDTH: u32 = 128;
/// Display height in pixels.
pub const CANVAS_HEIGHT: u32 = 128;
/// Bytes per RGB565 pixel.
pub const RGB565_BYTES: usize = 2;
/// Serialized size of one full frame (32768 bytes).
pub const FRAME_BYTES: usize = CANVAS_WIDTH as usize * CANVAS_HEIGHT as usize * RGB565_BYTES;

// ── ByteOrder ────────────────────────────────────────────────────

/// Order of the two bytes of each packed RGB565 value.
///
/// Must match the receiving device end-to-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ByteOrder {
    /// High byte first (network order).
    #[default]
    BigEndian,
    /// Low byte first.
    LittleEndian,
}

impl ByteOrder {
    fn write(self, value: u16) -> [u8; 2] {
        match self {
            ByteOrder::BigEndian => value.to_be_bytes(),
            ByteOrder::LittleEndian => value.to_le_bytes(),
        }
    }

    fn read(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::BigEndian => u16::from_be_bytes(bytes),
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOrder::BigEndian => write!(f, "big-endian"),
            ByteOrder::LittleEndian => write!(f, "little-endian"),
        }
    }
}

impl FromStr for ByteOrder {
    type Err = MxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "big-endian" | "big" | "be" => Ok(ByteOrder::BigEndian),
            "little-endian" | "little" | "le" => Ok(ByteOrder::LittleEndian),
            other => Err(MxError::InvalidConfig(format!("unknown byte order: {other}"))),
        }
    }
}

// ── RGB565 packing ───────────────────────────────────────────────

/// Truncate 8-bit channels to 5/6/5 bits and pack them.
pub const fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 & 0xF8) << 8) | ((g as u16 & 0xFC) << 3) | (b as u16 >> 3)
}

/// Expand a packed RGB565 value back to 8-bit channels.
///
/// The high bits are replicated into the low bits so that full-scale
/// values map to 255.
pub const fn unpack_rgb565(value: u16) -> [u8; 3] {
    let r5 = ((value >> 11) & 0x1F) as u8;
    let g6 = ((value >> 5) & 0x3F) as u8;
    let b5 = (value & 0x1F) as u8;
    [
        (r5 << 3) | (r5 >> 2),
        (g6 << 2) | (g6 >> 4),
        (b5 << 3) | (b5 >> 2),
    ]
}

// ── Image ────────────────────────────────────────────────────────

/// A decoded source image: tightly packed RGBA8, row-major.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Image {
    /// Wrap raw RGBA bytes.
    ///
    /// Fails with [`MxError::InvalidImage`] on a zero dimension or when
    /// `data` is not exactly `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, MxError> {
        if width == 0 || height == 0 {
            return Err(MxError::InvalidImage(format!(
                "zero dimension: {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(MxError::InvalidImage(format!(
                "pixel data is {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert any decoded image into RGBA8.
    pub fn from_dynamic(img: image::DynamicImage) -> Result<Self, MxError> {
        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba(width, height, rgba.into_raw())
    }

    /// Decode an image file (PNG, JPEG or BMP).
    pub fn open(path: &Path) -> Result<Self, MxError> {
        let img = image::open(path)?;
        Self::from_dynamic(img)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// RGBA at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// A 128×128 RGB565 frame, serialized row-major, 2 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    byte_order: ByteOrder,
}

impl PixelBuffer {
    /// Rebuild a buffer from a reassembled frame.
    pub fn from_bytes(data: Vec<u8>, byte_order: ByteOrder) -> Result<Self, MxError> {
        if data.len() != FRAME_BYTES {
            return Err(MxError::InvalidImage(format!(
                "frame is {} bytes, expected {FRAME_BYTES}",
                data.len()
            )));
        }
        Ok(Self { data, byte_order })
    }

    /// The serialized byte stream that gets chunked onto the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Packed RGB565 value at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the canvas.
    pub fn pixel(&self, x: u32, y: u32) -> u16 {
        let offset = (y as usize * CANVAS_WIDTH as usize + x as usize) * RGB565_BYTES;
        self.byte_order
            .read([self.data[offset], self.data[offset + 1]])
    }

    /// Expand back to 8-bit RGBA for previews.
    pub fn to_rgba(&self) -> image::RgbaImage {
        image::RgbaImage::from_fn(CANVAS_WIDTH, CANVAS_HEIGHT, |x, y| {
            let [r, g, b] = unpack_rgb565(self.pixel(x, y));
            image::Rgba([r, g, b, 0xFF])
        })
    }

    /// Write the expanded preview as a PNG file.
    pub fn save_preview(&self, path: &Path) -> Result<(), MxError> {
        self.to_rgba()
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| MxError::Io(std::io::Error::other(e)))
    }
}

// ── CoverFit ─────────────────────────────────────────────────────

/// Placement of the scaled source image over the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverFit {
    pub drawn_width: f64,
    pub drawn_height: f64,
    /// Left edge of the drawn image in canvas coordinates (≤ 0).
    pub offset_x: f64,
    /// Top edge of the drawn image in canvas coordinates (≤ 0).
    pub offset_y: f64,
}

impl CoverFit {
    /// Fill the canvas along the shorter axis, crop the longer one.
    pub fn compute(width: u32, height: u32) -> Self {
        let cw = CANVAS_WIDTH as f64;
        let ch = CANVAS_HEIGHT as f64;
        let image_ratio = width as f64 / height as f64;
        let canvas_ratio = cw / ch;

        let (drawn_width, drawn_height) = if image_ratio > canvas_ratio {
            (ch * image_ratio, ch)
        } else {
            (cw, cw / image_ratio)
        };

        Self {
            drawn_width,
            drawn_height,
            offset_x: (cw - drawn_width) / 2.0,
            offset_y: (ch - drawn_height) / 2.0,
        }
    }
}

// ── PixelConverter ───────────────────────────────────────────────

/// Maps source images onto the 128×128 RGB565 canvas.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelConverter {
    byte_order: ByteOrder,
}

impl PixelConverter {
    pub fn new(byte_order: ByteOrder) -> Self {
        Self { byte_order }
    }

    /// Cover-fit `image` onto the canvas and reduce it to RGB565.
    ///
    /// Alpha is discarded; the panel has no transparency.
    pub fn convert(&self, image: &Image) -> Result<PixelBuffer, MxError> {
        if image.width == 0 || image.height == 0 {
            return Err(MxError::InvalidImage("zero dimension".into()));
        }

        let fit = CoverFit::compute(image.width, image.height);
        let scale_x = image.width as f64 / fit.drawn_width;
        let scale_y = image.height as f64 / fit.drawn_height;

        let mut data = Vec::with_capacity(FRAME_BYTES);
        for y in 0..CANVAS_HEIGHT {
            let sy = (y as f64 + 0.5 - fit.offset_y) * scale_y - 0.5;
            for x in 0..CANVAS_WIDTH {
                let sx = (x as f64 + 0.5 - fit.offset_x) * scale_x - 0.5;
                let [r, g, b] = sample_bilinear(image, sx, sy);
                data.extend_from_slice(&self.byte_order.write(pack_rgb565(r, g, b)));
            }
        }

        Ok(PixelBuffer {
            data,
            byte_order: self.byte_order,
        })
    }
}

/// Convert with the default (big-endian) byte order.
pub fn convert(image: &Image) -> Result<PixelBuffer, MxError> {
    PixelConverter::default().convert(image)
}

/// Bilinear RGB sample at source coordinates, clamped to the edges.
fn sample_bilinear(image: &Image, sx: f64, sy: f64) -> [u8; 3] {
    let max_x = (image.width - 1) as f64;
    let max_y = (image.height - 1) as f64;
    let sx = sx.clamp(0.0, max_x);
    let sy = sy.clamp(0.0, max_y);

    let x0 = sx.floor() as u32;
    let y0 = sy.floor() as u32;
    let x1 = (x0 + 1).min(image.width - 1);
    let y1 = (y0 + 1).min(image.height - 1);
    let fx = sx - x0 as f64;
    let fy = sy - y0 as f64;

    let p00 = image.pixel(x0, y0);
    let p10 = image.pixel(x1, y0);
    let p01 = image.pixel(x0, y1);
    let p11 = image.pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        let v = top * (1.0 - fy) + bottom * fy;
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    out
}

// ── Tests ────────────────────────────────────────────────────────
