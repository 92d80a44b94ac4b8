//! Region cropping for crop-and-relabel.

use std::io::Cursor;

use chrono::Utc;
use image::{DynamicImage, ImageFormat};
use rand::Rng;

use autolabel_core::{defaults, BBox, CropRect, Error, ImageSize, Result, StorageKey};

/// A cut-out region, JPEG-encoded, with its placement in the source image.
#[derive(Debug, Clone)]
pub struct CroppedRegion {
    pub jpeg: Vec<u8>,
    pub rect: CropRect,
    pub original: ImageSize,
}

/// Decode `source`, cut out `bbox` and encode it as JPEG.
///
/// `bbox` may be fractional or absolute; it is normalized against the source
/// dimensions before cutting.
pub fn crop_region(source: &[u8], bbox: &BBox) -> Result<CroppedRegion> {
    let img = image::load_from_memory(source)
        .map_err(|e| Error::Image(format!("cannot decode source image: {}", e)))?;
    let original = ImageSize::new(img.width(), img.height())?;
    let rect = CropRect::from_bbox(&bbox.normalize(original), original);

    let cropped = img.crop_imm(
        rect.origin.x,
        rect.origin.y,
        rect.size.width(),
        rect.size.height(),
    );
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(cropped.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| Error::Image(format!("cannot encode crop: {}", e)))?;

    Ok(CroppedRegion {
        jpeg,
        rect,
        original,
    })
}

/// Fresh key for an uploaded crop: `{dataset}/crops/{millis}_{random}.jpg`.
pub fn crop_key(dataset: &str) -> StorageKey {
    let suffix: u64 = rand::thread_rng().gen();
    StorageKey::new(format!(
        "{}/{}/{}_{:016x}.jpg",
        dataset,
        defaults::CROPS_DIR,
        Utc::now().timestamp_millis(),
        suffix
    ))
}
