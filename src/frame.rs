/// Trait for accessing pixel intensities from an image.
pub trait ImageAccess {
    /// Get the grayscale intensity at (x, y). Returns 0 for out-of-bounds pixels.
    fn get_pixel(&self, x: i32, y: i32) -> u8;

    /// Image dimensions.
    fn width(&self) -> u32;
    fn height(&self) -> u32;
}

/// A simple grayscale image buffer implementing ImageAccess.
#[derive(Debug, Clone)]
pub struct GrayImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl GrayImage {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            data,
            width,
            height,
        }
    }

    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> u8,
    {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { data, width, height }
    }

    /// A uniform image, handy as a featureless frame.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(vec![value; (width * height) as usize], width, height)
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }
}

impl ImageAccess for GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0;
        }
        self.data[(y as u32 * self.width + x as u32) as usize]
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

impl ImageAccess for image::GrayImage {
    fn get_pixel(&self, x: i32, y: i32) -> u8 {
        let (w, h) = self.dimensions();
        if x < 0 || y < 0 || x as u32 >= w || y as u32 >= h {
            return 0;
        }
        image::GenericImageView::get_pixel(self, x as u32, y as u32).0[0]
    }

    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }
}

impl From<&image::GrayImage> for GrayImage {
    fn from(img: &image::GrayImage) -> Self {
        let (width, height) = img.dimensions();
        Self::new(img.as_raw().clone(), width, height)
    }
}

/// Copy any image into a tightly packed row-major luma buffer.
pub fn to_luma_buffer<I: ImageAccess + ?Sized>(image: &I) -> Vec<u8> {
    let (w, h) = (image.width(), image.height());
    let mut data = Vec::with_capacity((w * h) as usize);
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            data.push(image.get_pixel(x, y));
        }
    }
    data
}

/// Intensity at a sub-pixel position, bilinearly interpolated.
///
/// Landmarks sit at fractional coordinates, so this is the usual way for a
/// [`PatchExpert`](crate::PatchExpert) to read the image around one.
#[inline]
pub fn sample_bilinear<I: ImageAccess + ?Sized>(image: &I, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0) as f64;
    let p10 = image.get_pixel(x1, y0) as f64;
    let p01 = image.get_pixel(x0, y1) as f64;
    let p11 = image.get_pixel(x1, y1) as f64;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bilinear_sampling_is_exact_on_ramps() {
        let ramp = GrayImage::from_fn(8, 8, |x, y| (10 * x + 20 * y) as u8);

        for (x, y) in [(0.0, 0.0), (2.25, 3.5), (6.9, 0.1), (4.5, 4.5)] {
            assert!((sample_bilinear(&ramp, x, y) - (10.0 * x + 20.0 * y)).abs() < 1e-9);
        }
        // past the last column the missing neighbour reads as 0
        assert!((sample_bilinear(&ramp, 7.5, 0.0) - 35.0).abs() < 1e-9);
    }

    #[test]
    fn gray_image_access() {
        let data = vec![
            0, 255, 0, //
            255, 0, 255, //
            0, 255, 0, //
        ];
        let img = GrayImage::new(data, 3, 3);

        assert_eq!(img.get_pixel(0, 0), 0);
        assert_eq!(img.get_pixel(1, 0), 255);
        assert_eq!(img.get_pixel(1, 1), 0);

        // Out of bounds returns 0
        assert_eq!(img.get_pixel(-1, 0), 0);
        assert_eq!(img.get_pixel(3, 0), 0);
    }

    #[test]
    fn image_crate_adapter_matches_native_buffer() {
        let img = image::GrayImage::from_fn(4, 3, |x, y| image::Luma([(x * 10 + y) as u8]));
        let native = GrayImage::from(&img);

        assert_eq!(ImageAccess::width(&img), 4);
        assert_eq!(ImageAccess::height(&img), 3);
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(ImageAccess::get_pixel(&img, x, y), native.get_pixel(x, y));
            }
        }
        assert_eq!(ImageAccess::get_pixel(&img, 4, 0), 0);
        assert_eq!(to_luma_buffer(&img), native.as_raw());
    }
}
