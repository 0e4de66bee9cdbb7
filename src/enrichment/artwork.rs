//! Artwork decoding and scaling.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::catalog_store::ImageData;

/// Scales `img` to exactly `width`x`height`, cropping the overflow around
/// the center, and encodes the result as PNG.
pub fn scale_to_fill(
    img: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, image::ImageError> {
    let scaled = img.resize_to_fill(width, height, FilterType::Lanczos3);
    let mut buf = Cursor::new(Vec::new());
    scaled.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// The images stored for downloaded artwork: the original as fetched and a
/// thumbnail of the configured size.
pub fn thumbnail_set(
    data: &[u8],
    thumbnail: (u32, u32),
) -> Result<Vec<ImageData>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let (width, height) = thumbnail;

    let mut images = vec![ImageData {
        width: img.width(),
        height: img.height(),
        data: data.to_vec(),
    }];
    if (img.width(), img.height()) != thumbnail {
        images.push(ImageData {
            width,
            height,
            data: scale_to_fill(&img, width, height)?,
        });
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn thumbnail_has_requested_size() {
        let original = png(300, 200);
        let images = thumbnail_set(&original, (64, 64)).unwrap();

        assert_eq!(images.len(), 2);
        assert_eq!((images[0].width, images[0].height), (300, 200));
        assert_eq!(images[0].data, original);

        let thumb = image::load_from_memory(&images[1].data).unwrap();
        assert_eq!(thumb.dimensions(), (64, 64));
        assert_eq!((images[1].width, images[1].height), (64, 64));
    }

    #[test]
    fn original_of_thumbnail_size_is_stored_once() {
        let images = thumbnail_set(&png(64, 64), (64, 64)).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn rejects_non_images() {
        assert!(thumbnail_set(b"<html>nope</html>", (64, 64)).is_err());
    }
}
