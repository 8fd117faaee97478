use super::BinaryMask;

/// Horizontal and vertical opening kernel lengths: `frac` of the image
/// dimension, never below `min_len`.
pub fn grid_kernels(width: u32, height: u32, frac: f64, min_len: u32) -> (u32, u32) {
    let h = ((width as f64 * frac).round() as u32).max(min_len);
    let v = ((height as f64 * frac).round() as u32).max(min_len);
    (h, v)
}

/// Ruling-line mask: horizontal opening unioned with vertical opening.
pub fn grid_mask(ink: &BinaryMask, h_kernel: u32, v_kernel: u32) -> BinaryMask {
    let horizontal = open_horizontal(ink, h_kernel);
    let vertical = open_vertical(ink, v_kernel);
    horizontal.union(&vertical)
}

/// Erode then dilate along rows. Only runs at least `kernel` long survive.
pub fn open_horizontal(mask: &BinaryMask, kernel: u32) -> BinaryMask {
    let half = (kernel / 2) as usize;
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let mut out = BinaryMask::new(mask.width(), mask.height());
    let mut line = vec![false; w];
    for y in 0..h {
        line.copy_from_slice(mask.row(y as u32));
        let opened = dilate_line(&erode_line(&line, half), half);
        for (x, on) in opened.into_iter().enumerate() {
            if on {
                out.set(x as u32, y as u32, true);
            }
        }
    }
    out
}

/// Erode then dilate along columns.
pub fn open_vertical(mask: &BinaryMask, kernel: u32) -> BinaryMask {
    let half = (kernel / 2) as usize;
    let (w, h) = (mask.width() as usize, mask.height() as usize);
    let mut out = BinaryMask::new(mask.width(), mask.height());
    let mut line = vec![false; h];
    for x in 0..w {
        for (y, slot) in line.iter_mut().enumerate() {
            *slot = mask.get(x as u32, y as u32);
        }
        let opened = dilate_line(&erode_line(&line, half), half);
        for (y, on) in opened.into_iter().enumerate() {
            if on {
                out.set(x as u32, y as u32, true);
            }
        }
    }
    out
}

fn prefix_counts(line: &[bool]) -> Vec<usize> {
    let mut prefix = Vec::with_capacity(line.len() + 1);
    prefix.push(0);
    let mut running = 0;
    for &on in line {
        running += on as usize;
        prefix.push(running);
    }
    prefix
}

/// Set only where every pixel in [i-half, i+half] is set; out of range counts as unset.
fn erode_line(line: &[bool], half: usize) -> Vec<bool> {
    let n = line.len();
    let prefix = prefix_counts(line);
    let window = 2 * half + 1;
    (0..n)
        .map(|i| {
            if i < half || i + half >= n {
                return false;
            }
            prefix[i + half + 1] - prefix[i - half] == window
        })
        .collect()
}

/// Set where any pixel in [i-half, i+half] is set.
fn dilate_line(line: &[bool], half: usize) -> Vec<bool> {
    let n = line.len();
    let prefix = prefix_counts(line);
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            prefix[hi] - prefix[lo] > 0
        })
        .collect()
}
