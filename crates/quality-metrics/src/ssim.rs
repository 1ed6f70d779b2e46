use video_ingest::Frame;

use crate::{MetricsError, ensure_same_shape};

/// Side length of the uniform SSIM window.
pub const SSIM_WINDOW: u32 = 7;

const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DATA_RANGE: f64 = 255.0;

/// Mean structural similarity between the luminance of two frames.
///
/// Uses a 7×7 uniform window with sample covariance and averages the index over
/// every window that lies fully inside the image. The result is in `[-1, 1]`.
pub fn ssim(a: &Frame, b: &Frame) -> Result<f64, MetricsError> {
    ensure_same_shape(a, b)?;
    let (width, height) = (a.width(), a.height());
    if width < SSIM_WINDOW || height < SSIM_WINDOW {
        return Err(MetricsError::TooSmall {
            width,
            height,
            window: SSIM_WINDOW,
        });
    }

    let x = a.to_luma();
    let y = b.to_luma();
    let tables = MomentTables::build(x.data(), y.data(), width as usize, height as usize);

    let win = SSIM_WINDOW as usize;
    let n = (win * win) as f64;
    let cov_norm = n / (n - 1.0);
    let c1 = (K1 * DATA_RANGE).powi(2);
    let c2 = (K2 * DATA_RANGE).powi(2);

    let mut total = 0.0;
    let mut count = 0usize;
    for top in 0..=(height as usize - win) {
        for left in 0..=(width as usize - win) {
            let [sx, sy, sxx, syy, sxy] = tables.window(left, top, win);
            let ux = sx / n;
            let uy = sy / n;
            let vx = cov_norm * (sxx / n - ux * ux);
            let vy = cov_norm * (syy / n - uy * uy);
            let vxy = cov_norm * (sxy / n - ux * uy);

            let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
            let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }

    Ok((total / count as f64).clamp(-1.0, 1.0))
}

/// Summed-area tables of x, y, x², y² and xy.
struct MomentTables {
    stride: usize,
    sums: Vec<[u64; 5]>,
}

impl MomentTables {
    fn build(x: &[u8], y: &[u8], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sums = vec![[0u64; 5]; stride * (height + 1)];
        for row in 0..height {
            let mut running = [0u64; 5];
            for col in 0..width {
                let a = x[row * width + col] as u64;
                let b = y[row * width + col] as u64;
                let moments = [a, b, a * a, b * b, a * b];
                let above = sums[row * stride + col + 1];
                let cell = &mut sums[(row + 1) * stride + col + 1];
                for k in 0..5 {
                    running[k] += moments[k];
                    cell[k] = above[k] + running[k];
                }
            }
        }
        Self { stride, sums }
    }

    fn window(&self, left: usize, top: usize, size: usize) -> [f64; 5] {
        let (right, bottom) = (left + size, top + size);
        let br = self.sums[bottom * self.stride + right];
        let tl = self.sums[top * self.stride + left];
        let tr = self.sums[top * self.stride + right];
        let bl = self.sums[bottom * self.stride + left];
        let mut out = [0.0; 5];
        for k in 0..5 {
            out[k] = (br[k] + tl[k] - tr[k] - bl[k]) as f64;
        }
        out
    }
}
