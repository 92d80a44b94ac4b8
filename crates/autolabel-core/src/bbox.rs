//! Bounding-box geometry.
//!
//! All boxes are XYXY (`x1, y1, x2, y2`). Stored annotations are always in
//! absolute pixel coordinates of the original image; the functions here take
//! model output (fractional or absolute, possibly relative to a crop) into that
//! space.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Width and height of an image in pixels. Both are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImageSize")]
pub struct ImageSize {
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct RawImageSize {
    width: u32,
    height: u32,
}

impl TryFrom<RawImageSize> for ImageSize {
    type Error = Error;

    fn try_from(raw: RawImageSize) -> Result<Self> {
        Self::new(raw.width, raw.height)
    }
}

impl ImageSize {
    /// Create a size, rejecting zero dimensions.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "image size must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Integer pixel offset of a crop inside its source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub x: u32,
    pub y: u32,
}

/// Axis-aligned box in XYXY order.
///
/// Serialized as a plain four-element array to match the stored and wire
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for BBox {
    fn from(v: [f64; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f64; 4] {
    fn from(b: BBox) -> Self {
        b.to_array()
    }
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from an untyped slice, as received from the model.
    ///
    /// Returns `None` unless the slice has exactly four finite values.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        match values {
            [x1, y1, x2, y2] if values.iter().all(|v| v.is_finite()) => {
                Some(Self::new(*x1, *y1, *x2, *y2))
            }
            _ => None,
        }
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// COCO `[x, y, width, height]`. Negative extents collapse to zero.
    pub fn to_xywh(&self) -> [f64; 4] {
        [
            self.x1,
            self.y1,
            self.width().max(0.0),
            self.height().max(0.0),
        ]
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Whether the model expressed this box as fractions of the image.
    ///
    /// Only the far corner is inspected: a box whose `x2` and `y2` are both at
    /// most 1.0 cannot be a meaningful absolute box.
    pub fn is_fractional(&self) -> bool {
        self.x2 <= 1.0 && self.y2 <= 1.0
    }

    /// Convert to absolute pixels of `size` and clamp into a non-degenerate box.
    pub fn normalize(&self, size: ImageSize) -> BBox {
        let (w, h) = (f64::from(size.width()), f64::from(size.height()));
        let scaled = if self.is_fractional() {
            BBox::new(self.x1 * w, self.y1 * h, self.x2 * w, self.y2 * h)
        } else {
            *self
        };
        scaled.clamp_to(size)
    }

    /// Clamp an absolute box into `size`.
    ///
    /// `x1, y1` land in `[0, ref - 1]`; `x2, y2` land in `[x1 + 1, ref]` and
    /// `[y1 + 1, ref]`, so the result always has a positive area.
    pub fn clamp_to(&self, size: ImageSize) -> BBox {
        let (w, h) = (f64::from(size.width()), f64::from(size.height()));
        let x1 = self.x1.clamp(0.0, w - 1.0);
        let y1 = self.y1.clamp(0.0, h - 1.0);
        let x2 = self.x2.clamp(x1 + 1.0, w);
        let y2 = self.y2.clamp(y1 + 1.0, h);
        BBox::new(x1, y1, x2, y2)
    }

    /// Shift by a crop origin.
    pub fn translate(&self, origin: Origin) -> BBox {
        let (dx, dy) = (f64::from(origin.x), f64::from(origin.y));
        BBox::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Map a box the model returned for a crop back into the source image.
    ///
    /// The box is normalized against the crop, translated by the crop origin
    /// and clamped against the original image.
    pub fn remap_crop_to_original(
        &self,
        crop_size: ImageSize,
        origin: Origin,
        original_size: ImageSize,
    ) -> BBox {
        self.normalize(crop_size)
            .translate(origin)
            .clamp_to(original_size)
    }
}

/// Integer pixel rectangle to cut out of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub origin: Origin,
    pub size: ImageSize,
}

impl CropRect {
    /// Round an (already normalized) box to whole pixels inside `image`.
    pub fn from_bbox(bbox: &BBox, image: ImageSize) -> Self {
        let b = bbox.clamp_to(image);
        let left = (b.x1.round() as u32).min(image.width() - 1);
        let top = (b.y1.round() as u32).min(image.height() - 1);
        let width = (b.width().round() as u32)
            .max(1)
            .min(image.width() - left);
        let height = (b.height().round() as u32)
            .max(1)
            .min(image.height() - top);
        Self {
            origin: Origin { x: left, y: top },
            // width/height are >= 1 because left < image.width() and top < image.height()
            size: ImageSize { width, height },
        }
    }
}
