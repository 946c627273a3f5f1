//! Normalized correlation-coefficient template matching.
//!
//! For a template `T` (w×h) placed at `(x, y)` over an image `I`:
//!
//! ```text
//!            Σ (I(x+i, y+j) − Ī_xy) · (T(i, j) − T̄)
//! R(x, y) = ─────────────────────────────────────────
//!            sqrt( Σ (I − Ī_xy)² · Σ (T − T̄)² )
//! ```
//!
//! The numerator is evaluated for every offset at once with a 2-D FFT
//! cross-correlation; the window variances come from integral images. In
//! color mode the numerator and both variance sums run over R, G and B
//! together. A window or template without variance scores 0.

use anyhow::{anyhow, Result};
use image::RgbaImage;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Variance sums at or below this (per pixel) count as flat.
const FLAT_EPSILON: f64 = 1e-6;

/// Correlation scores for every valid template offset, row-major.
#[derive(Debug, Clone)]
pub struct ScoreMap {
    width: u32,
    height: u32,
    scores: Vec<f32>,
}

impl ScoreMap {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Score of the template placed with its top-left corner at `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.scores[(y * self.width + x) as usize]
    }

    /// Highest score and its top-left offset; the first one in row-major
    /// order wins ties.
    pub fn peak(&self) -> Option<(u32, u32, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, &score) in self.scores.iter().enumerate() {
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        best.map(|(i, score)| {
            let i = i as u32;
            (i % self.width, i / self.width, score)
        })
    }

    /// Every offset scoring at least `threshold`, row-major.
    pub fn above(&self, threshold: f32) -> Vec<(u32, u32, f32)> {
        self.scores
            .iter()
            .enumerate()
            .filter(|(_, s)| **s >= threshold)
            .map(|(i, s)| {
                let i = i as u32;
                (i % self.width, i / self.width, *s)
            })
            .collect()
    }
}

/// Produces a correlation score map of a template over an image.
pub trait TemplateMatch: Send + Sync {
    fn score_map(
        &self,
        haystack: &RgbaImage,
        needle: &RgbaImage,
        grayscale: bool,
    ) -> Result<ScoreMap>;
}

/// FFT-backed normalized cross-correlation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NccMatcher;

impl TemplateMatch for NccMatcher {
    fn score_map(
        &self,
        haystack: &RgbaImage,
        needle: &RgbaImage,
        grayscale: bool,
    ) -> Result<ScoreMap> {
        let (iw, ih) = haystack.dimensions();
        let (tw, th) = needle.dimensions();
        if tw == 0 || th == 0 {
            return Err(anyhow!("Template is empty"));
        }
        if tw > iw || th > ih {
            return Err(anyhow!(
                "Template {}x{} is larger than the search image {}x{}",
                tw,
                th,
                iw,
                ih
            ));
        }

        let out_w = (iw - tw + 1) as usize;
        let out_h = (ih - th + 1) as usize;
        let n = (tw * th) as f64;

        let image_planes = planes(haystack, grayscale);
        let template_planes = planes(needle, grayscale);

        let mut planner = FftPlanner::<f64>::new();
        let mut numerator = vec![0.0f64; out_w * out_h];
        let mut window_var = vec![0.0f64; out_w * out_h];
        let mut template_var = 0.0f64;

        for (image, template) in image_planes.iter().zip(template_planes.iter()) {
            let t_mean = template.iter().sum::<f64>() / n;
            let centered: Vec<f64> = template.iter().map(|v| v - t_mean).collect();
            template_var += centered.iter().map(|v| v * v).sum::<f64>();

            // Shifting the image by a constant leaves both the numerator (the
            // template is zero-mean) and the window variance unchanged
            let i_mean = image.iter().sum::<f64>() / image.len() as f64;
            let shifted: Vec<f64> = image.iter().map(|v| v - i_mean).collect();

            let corr = cross_correlate(
                &mut planner,
                &shifted,
                iw as usize,
                ih as usize,
                &centered,
                tw as usize,
                th as usize,
            );
            let (sum, sq_sum) = integral_images(&shifted, iw as usize, ih as usize);

            for y in 0..out_h {
                for x in 0..out_w {
                    let idx = y * out_w + x;
                    numerator[idx] += corr[y * iw as usize + x];

                    let s1 = window_sum(&sum, iw as usize, x, y, tw as usize, th as usize);
                    let s2 = window_sum(&sq_sum, iw as usize, x, y, tw as usize, th as usize);
                    window_var[idx] += (s2 - s1 * s1 / n).max(0.0);
                }
            }
        }

        let flat = FLAT_EPSILON * n;
        let scores = numerator
            .iter()
            .zip(window_var.iter())
            .map(|(&num, &wvar)| {
                if template_var <= flat || wvar <= flat {
                    return 0.0;
                }
                let denom = (template_var * wvar).sqrt();
                (num / denom).clamp(-1.0, 1.0) as f32
            })
            .collect();

        Ok(ScoreMap {
            width: out_w as u32,
            height: out_h as u32,
            scores,
        })
    }
}

/// Splits an image into f64 planes: one luma plane, or R, G, B.
fn planes(image: &RgbaImage, grayscale: bool) -> Vec<Vec<f64>> {
    if grayscale {
        let luma = image
            .pixels()
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .collect();
        vec![luma]
    } else {
        (0..3)
            .map(|c| image.pixels().map(|p| p[c] as f64).collect())
            .collect()
    }
}

/// Summed-area tables of `values` and `values²`, each (w+1)×(h+1).
fn integral_images(values: &[f64], width: usize, height: usize) -> (Vec<f64>, Vec<f64>) {
    let stride = width + 1;
    let mut sum = vec![0.0; stride * (height + 1)];
    let mut sq_sum = vec![0.0; stride * (height + 1)];
    for y in 0..height {
        let mut row = 0.0;
        let mut sq_row = 0.0;
        for x in 0..width {
            let v = values[y * width + x];
            row += v;
            sq_row += v * v;
            sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
            sq_sum[(y + 1) * stride + x + 1] = sq_sum[y * stride + x + 1] + sq_row;
        }
    }
    (sum, sq_sum)
}

fn window_sum(table: &[f64], width: usize, x: usize, y: usize, w: usize, h: usize) -> f64 {
    let stride = width + 1;
    table[(y + h) * stride + x + w] - table[y * stride + x + w] - table[(y + h) * stride + x]
        + table[y * stride + x]
}

/// Circular cross-correlation of `image` with `template` zero-padded to the
/// image size. Offsets where the template fits entirely never wrap.
fn cross_correlate(
    planner: &mut FftPlanner<f64>,
    image: &[f64],
    width: usize,
    height: usize,
    template: &[f64],
    tw: usize,
    th: usize,
) -> Vec<f64> {
    let mut a: Vec<Complex<f64>> = image.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut b = vec![Complex::new(0.0, 0.0); width * height];
    for y in 0..th {
        for x in 0..tw {
            b[y * width + x] = Complex::new(template[y * tw + x], 0.0);
        }
    }

    fft_2d(planner, &mut a, width, height, false);
    fft_2d(planner, &mut b, width, height, false);
    for (av, bv) in a.iter_mut().zip(b.iter()) {
        *av *= bv.conj();
    }
    fft_2d(planner, &mut a, width, height, true);

    let scale = (width * height) as f64;
    a.iter().map(|c| c.re / scale).collect()
}

/// In-place 2-D FFT: rows, then columns through a transposed buffer.
fn fft_2d(
    planner: &mut FftPlanner<f64>,
    data: &mut [Complex<f64>],
    width: usize,
    height: usize,
    inverse: bool,
) {
    let (rows, cols) = if inverse {
        (planner.plan_fft_inverse(width), planner.plan_fft_inverse(height))
    } else {
        (planner.plan_fft_forward(width), planner.plan_fft_forward(height))
    };

    rows.process(data);

    let mut transposed = vec![Complex::new(0.0, 0.0); width * height];
    for y in 0..height {
        for x in 0..width {
            transposed[x * height + y] = data[y * width + x];
        }
    }
    cols.process(&mut transposed);
    for x in 0..width {
        for y in 0..height {
            data[y * width + x] = transposed[x * height + y];
        }
    }
}
