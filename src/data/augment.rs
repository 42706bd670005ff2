// ============================================================
// Layer 4 — Image Augmentations
// ============================================================
// Two independently augmented views of the same image are the
// positive pair both SimCLR and SimSiam learn from. Applied in
// this order on CHW f32 pixels in [0, 1]:
//
//   1. random crop  — zero-pad by 4 pixels, crop back to size
//   2. h-flip       — p = 0.5
//   3. jitter       — p = 0.8, brightness and contrast
//   4. grayscale    — p = 0.2
//
// Every function takes the RNG explicitly so seeded runs are
// reproducible.
//
// Reference: Chen et al. (2020) SimCLR, Appendix A

use rand::Rng;

use crate::data::dataset::CHANNELS;

/// ITU-R BT.601 luma weights
const LUMA: [f32; CHANNELS] = [0.299, 0.587, 0.114];

#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    pub crop_padding:   usize,
    pub flip_prob:      f64,
    pub jitter_prob:    f64,
    pub brightness:     f32,
    pub contrast:       f32,
    pub grayscale_prob: f64,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            crop_padding:   4,
            flip_prob:      0.5,
            jitter_prob:    0.8,
            brightness:     0.4,
            contrast:       0.4,
            grayscale_prob: 0.2,
        }
    }
}

impl Augmentation {
    /// Produce one augmented view of `pixels`
    pub fn apply<R: Rng + ?Sized>(&self, pixels: &[f32], size: usize, rng: &mut R) -> Vec<f32> {
        let mut view = random_crop(pixels, size, self.crop_padding, rng);
        if rng.gen_bool(self.flip_prob) {
            horizontal_flip(&mut view, size);
        }
        if rng.gen_bool(self.jitter_prob) {
            let brightness = 1.0 + rng.gen_range(-self.brightness..=self.brightness);
            let contrast   = 1.0 + rng.gen_range(-self.contrast..=self.contrast);
            color_jitter(&mut view, brightness, contrast);
        }
        if rng.gen_bool(self.grayscale_prob) {
            grayscale(&mut view, size);
        }
        view
    }
}

/// Crop a `size` window out of the image zero-padded by `padding`
pub fn random_crop<R: Rng + ?Sized>(pixels: &[f32], size: usize, padding: usize, rng: &mut R) -> Vec<f32> {
    let dy = rng.gen_range(0..=2 * padding);
    let dx = rng.gen_range(0..=2 * padding);
    crop_at(pixels, size, padding, dy, dx)
}

/// Deterministic crop: window top-left at (dy, dx) in padded coordinates
pub fn crop_at(pixels: &[f32], size: usize, padding: usize, dy: usize, dx: usize) -> Vec<f32> {
    let plane   = size * size;
    let mut out = vec![0.0; pixels.len()];
    for c in 0..CHANNELS {
        for y in 0..size {
            let sy = (y + dy) as isize - padding as isize;
            if sy < 0 || sy >= size as isize {
                continue;
            }
            for x in 0..size {
                let sx = (x + dx) as isize - padding as isize;
                if sx < 0 || sx >= size as isize {
                    continue;
                }
                out[c * plane + y * size + x] = pixels[c * plane + sy as usize * size + sx as usize];
            }
        }
    }
    out
}

pub fn horizontal_flip(pixels: &mut [f32], size: usize) {
    for row in pixels.chunks_mut(size) {
        row.reverse();
    }
}

/// Scale brightness, then stretch contrast around the image mean
pub fn color_jitter(pixels: &mut [f32], brightness: f32, contrast: f32) {
    pixels.iter_mut().for_each(|v| *v *= brightness);
    let mean = pixels.iter().sum::<f32>() / pixels.len().max(1) as f32;
    pixels
        .iter_mut()
        .for_each(|v| *v = ((*v - mean) * contrast + mean).clamp(0.0, 1.0));
}

/// Replace every channel with the luma of the pixel
pub fn grayscale(pixels: &mut [f32], size: usize) {
    let plane = size * size;
    for i in 0..plane {
        let luma: f32 = (0..CHANNELS).map(|c| LUMA[c] * pixels[c * plane + i]).sum();
        for c in 0..CHANNELS {
            pixels[c * plane + i] = luma;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    /// 3 channels of a 2x2 image: channel c holds c*10 + index
    fn image() -> Vec<f32> {
        (0..3).flat_map(|c| (0..4).map(move |i| (c * 10 + i) as f32)).collect()
    }

    #[test]
    fn centred_crop_is_identity() {
        assert_eq!(crop_at(&image(), 2, 4, 4, 4), image());
    }

    #[test]
    fn shifted_crop_fills_with_zeros() {
        // Window moved one pixel up-left: first row and column come from padding
        let out = crop_at(&image(), 2, 1, 0, 0);
        assert_eq!(&out[0..4], &[0.0, 0.0, 0.0, 0.0]);
        assert_eq!(&out[4..8], &[0.0, 0.0, 0.0, 10.0]);
    }

    #[test]
    fn flip_reverses_rows_per_channel() {
        let mut px = image();
        horizontal_flip(&mut px, 2);
        assert_eq!(&px[0..4], &[1.0, 0.0, 3.0, 2.0]);
        assert_eq!(&px[8..12], &[21.0, 20.0, 23.0, 22.0]);
    }

    #[test]
    fn grayscale_equalises_channels() {
        let mut px = vec![1.0, 0.0, 0.0]; // one red pixel
        grayscale(&mut px, 1);
        assert!(px.iter().all(|&v| (v - 0.299).abs() < 1e-6));
    }

    #[test]
    fn jitter_stays_in_unit_range() {
        let mut px = vec![0.0, 0.5, 1.0, 0.9];
        color_jitter(&mut px, 1.4, 1.4);
        assert!(px.iter().all(|&v| (0.0..=1.0).contains(&v)));

        let mut flat = vec![0.5; 4];
        color_jitter(&mut flat, 1.0, 2.0);
        assert_eq!(flat, vec![0.5; 4]);
    }

    #[test]
    fn views_differ_but_keep_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let pixels: Vec<f32> = (0..3 * 64).map(|i| (i % 7) as f32 / 7.0).collect();
        let aug = Augmentation::default();
        let a = aug.apply(&pixels, 8, &mut rng);
        let b = aug.apply(&pixels, 8, &mut rng);
        assert_eq!(a.len(), pixels.len());
        assert_ne!(a, b);
    }
}
