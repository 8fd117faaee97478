use serde::Serialize;

use super::BinaryMask;

/// Parameters for near-horizontal line voting.
#[derive(Debug, Clone, Copy)]
pub struct HoughParams {
    /// Search range is [-max_angle_deg, +max_angle_deg] around horizontal.
    pub max_angle_deg: f64,
    pub step_deg: f64,
    pub min_votes: u32,
    /// Suppression radius in angle bins.
    pub nms_angle_bins: usize,
    /// Suppression radius in rho bins.
    pub nms_rho_bins: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HoughLine {
    /// Deviation from horizontal in degrees; positive slopes down to the right.
    pub angle_deg: f64,
    pub rho: i32,
    pub votes: u32,
}

/// Vote edge pixels into a (angle, rho) accumulator restricted to lines
/// within `max_angle_deg` of horizontal, then keep local maxima.
///
/// Returned lines are sorted by votes, strongest first.
pub fn near_horizontal_lines(edges: &BinaryMask, params: &HoughParams) -> Vec<HoughLine> {
    let step = params.step_deg.max(1e-3);
    let n_angles = ((2.0 * params.max_angle_deg) / step).round() as usize + 1;
    let angles: Vec<f64> = (0..n_angles)
        .map(|i| -params.max_angle_deg + i as f64 * step)
        .collect();
    let trig: Vec<(f64, f64)> = angles
        .iter()
        .map(|a| {
            let theta = (90.0 + a).to_radians();
            (theta.cos(), theta.sin())
        })
        .collect();

    let (w, h) = (edges.width() as f64, edges.height() as f64);
    let diag = (w * w + h * h).sqrt().ceil() as i64;
    let n_rho = (2 * diag + 1) as usize;
    let mut acc = vec![0u32; n_angles * n_rho];

    for y in 0..edges.height() {
        for (x, &on) in edges.row(y).iter().enumerate() {
            if !on {
                continue;
            }
            let (xf, yf) = (x as f64, y as f64);
            for (ai, &(cos_t, sin_t)) in trig.iter().enumerate() {
                let rho = (xf * cos_t + yf * sin_t).round() as i64 + diag;
                if rho >= 0 && (rho as usize) < n_rho {
                    acc[ai * n_rho + rho as usize] += 1;
                }
            }
        }
    }

    let mut lines = Vec::new();
    for ai in 0..n_angles {
        for ri in 0..n_rho {
            let votes = acc[ai * n_rho + ri];
            if votes < params.min_votes {
                continue;
            }
            if is_local_max(&acc, n_angles, n_rho, ai, ri, params) {
                lines.push(HoughLine {
                    angle_deg: angles[ai],
                    rho: ri as i32 - diag as i32,
                    votes,
                });
            }
        }
    }

    lines.sort_by(|a, b| b.votes.cmp(&a.votes));
    lines
}

/// A cell survives unless some neighbour holds strictly more votes.
fn is_local_max(
    acc: &[u32],
    n_angles: usize,
    n_rho: usize,
    ai: usize,
    ri: usize,
    params: &HoughParams,
) -> bool {
    let votes = acc[ai * n_rho + ri];
    let a0 = ai.saturating_sub(params.nms_angle_bins);
    let a1 = (ai + params.nms_angle_bins).min(n_angles - 1);
    let r0 = ri.saturating_sub(params.nms_rho_bins);
    let r1 = (ri + params.nms_rho_bins).min(n_rho - 1);
    for a in a0..=a1 {
        for r in r0..=r1 {
            if acc[a * n_rho + r] > votes {
                return false;
            }
        }
    }
    true
}

/// Indices of 1-D projection peaks at or above `min_votes` that no
/// neighbour within `radius` strictly exceeds.
pub fn projection_peaks(votes: &[u32], min_votes: u32, radius: usize) -> Vec<usize> {
    let n = votes.len();
    (0..n)
        .filter(|&i| {
            let v = votes[i];
            if v < min_votes {
                return false;
            }
            let lo = i.saturating_sub(radius);
            let hi = (i + radius).min(n - 1);
            (lo..=hi).all(|j| votes[j] <= v)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min_votes: u32) -> HoughParams {
        HoughParams {
            max_angle_deg: 10.0,
            step_deg: 0.25,
            min_votes,
            nms_angle_bins: 1,
            nms_rho_bins: 5,
        }
    }

    #[test]
    fn test_horizontal_line_detected_at_zero_degrees() {
        let mut edges = BinaryMask::new(200, 100);
        for x in 0..200 {
            edges.set(x, 50, true);
        }
        let lines = near_horizontal_lines(&edges, &params(100));
        assert!(!lines.is_empty());
        assert_eq!(lines[0].angle_deg, 0.0);
        assert_eq!(lines[0].votes, 200);
        assert_eq!(lines[0].rho, 50);
    }

    #[test]
    fn test_sloped_line_detected_at_its_angle() {
        let mut edges = BinaryMask::new(400, 200);
        let slope = 3f64.to_radians().tan();
        for x in 0..400u32 {
            let y = (60.0 + x as f64 * slope).round() as u32;
            edges.set(x, y, true);
        }
        let lines = near_horizontal_lines(&edges, &params(100));
        assert!((lines[0].angle_deg - 3.0).abs() <= 0.25);
    }

    #[test]
    fn test_empty_edges_give_no_lines() {
        let edges = BinaryMask::new(50, 50);
        assert!(near_horizontal_lines(&edges, &params(10)).is_empty());
    }

    #[test]
    fn test_projection_peaks_suppress_shoulders() {
        let votes = [0, 5, 12, 30, 12, 5, 0, 0, 25, 25, 0];
        let peaks = projection_peaks(&votes, 10, 2);
        assert_eq!(peaks, vec![3, 8, 9]);
    }
}
