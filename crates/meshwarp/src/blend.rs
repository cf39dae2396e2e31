//! Blend-pattern randomization.
//!
//! Every vertex is assigned a normalized transition order `u` in `[0, 1]`
//! (which part of the screen flips first) and a band width `b`: the vertex
//! begins transitioning at `t = u*(1-b)` and takes `b` of the blend window to
//! finish. That folds into the `(a, c)` ramp as `a = 1/b`, `c = -u*(a-1)`,
//! giving `mix(0) = 0` and `mix(1) = 1` for every vertex.

use rand::Rng;

use crate::{BlendWeight, VertInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    /// Linear gradient along a random screen direction.
    DirectionalWipe,
    /// Recursive midpoint-displacement fractal, normalized to [0, 1].
    Plasma,
    /// Distance from center, sweeping inward or outward.
    RadialWipe,
}

pub(crate) fn generate(
    kind: PatternKind,
    grid_x: usize,
    grid_y: usize,
    verts: &[VertInfo],
    rng: &mut impl Rng,
) -> Vec<BlendWeight> {
    let (order, band) = match kind {
        PatternKind::DirectionalWipe => {
            let band = rng.gen_range(0.15..0.6);
            (directional_order(verts, rng), band)
        }
        PatternKind::Plasma => {
            let band = rng.gen_range(0.12..0.35);
            (plasma_order(grid_x, grid_y, rng), band)
        }
        PatternKind::RadialWipe => {
            let band = rng.gen_range(0.15..0.5);
            (radial_order(verts, rng), band)
        }
    };
    order
        .into_iter()
        .map(|u| ramp(u.clamp(0.0, 1.0), band))
        .collect()
}

/// Builds the `(a, c)` pair, nudging `a` when rounding would let the
/// endpoints drift off their exact 0 and 1 clamps.
fn ramp(u: f32, band: f32) -> BlendWeight {
    let mut a = 1.0 / band;
    let mut c = -u * (a - 1.0);
    if c > 0.0 {
        c = 0.0;
    }
    if a + c < 1.0 {
        a = 1.0 - c + 1e-3;
    }
    BlendWeight { a, c }
}

fn directional_order(verts: &[VertInfo], rng: &mut impl Rng) -> Vec<f32> {
    let theta = rng.gen_range(0.0..std::f32::consts::TAU);
    let (dx, dy) = (theta.cos(), theta.sin());
    let proj: Vec<f32> = verts.iter().map(|v| v.x * dx + v.y * dy).collect();
    normalize(proj)
}

fn radial_order(verts: &[VertInfo], rng: &mut impl Rng) -> Vec<f32> {
    let inward = rng.gen_bool(0.5);
    let rad: Vec<f32> = verts
        .iter()
        .map(|v| if inward { -v.rad } else { v.rad })
        .collect();
    normalize(rad)
}

/// Recursive midpoint displacement over the vertex grid. Midpoints seed from
/// the average of their parents plus noise scaled by `2^(-depth/2)`;
/// recursion stops when a sub-quad is one cell wide. Seam cells shared by
/// neighboring sub-quads are written once and kept.
fn plasma_order(grid_x: usize, grid_y: usize, rng: &mut impl Rng) -> Vec<f32> {
    let pitch = grid_x + 1;
    let mut field = vec![0.0f32; pitch * (grid_y + 1)];
    let mut written = vec![false; field.len()];

    let mut seed = |field: &mut Vec<f32>, written: &mut Vec<bool>, i: usize, j: usize, v: f32| {
        let idx = j * pitch + i;
        if !written[idx] {
            field[idx] = v;
            written[idx] = true;
        }
    };
    for (i, j) in [(0, 0), (grid_x, 0), (0, grid_y), (grid_x, grid_y)] {
        let v = rng.gen_range(-1.0..1.0);
        seed(&mut field, &mut written, i, j, v);
    }

    subdivide(
        &mut field,
        &mut written,
        pitch,
        (0, 0),
        (grid_x, grid_y),
        1,
        rng,
    );
    normalize(field)
}

#[allow(clippy::too_many_arguments)]
fn subdivide(
    field: &mut Vec<f32>,
    written: &mut Vec<bool>,
    pitch: usize,
    (x0, y0): (usize, usize),
    (x1, y1): (usize, usize),
    depth: u32,
    rng: &mut impl Rng,
) {
    if x1 - x0 <= 1 && y1 - y0 <= 1 {
        return;
    }
    let mx = (x0 + x1) / 2;
    let my = (y0 + y1) / 2;
    let scale = 2.0f32.powf(-(depth as f32) / 2.0);
    let at = |f: &Vec<f32>, i: usize, j: usize| f[j * pitch + i];

    let mut put = |field: &mut Vec<f32>, written: &mut Vec<bool>, i: usize, j: usize, v: f32| {
        let idx = j * pitch + i;
        if !written[idx] {
            field[idx] = v;
            written[idx] = true;
        }
    };

    // Edge midpoints average their edge's corners; the center averages the
    // diagonal corners.
    if mx > x0 && mx < x1 {
        let top = (at(field, x0, y0) + at(field, x1, y0)) * 0.5
            + rng.gen_range(-1.0..1.0) * scale;
        put(field, written, mx, y0, top);
        let bottom = (at(field, x0, y1) + at(field, x1, y1)) * 0.5
            + rng.gen_range(-1.0..1.0) * scale;
        put(field, written, mx, y1, bottom);
    }
    if my > y0 && my < y1 {
        let left = (at(field, x0, y0) + at(field, x0, y1)) * 0.5
            + rng.gen_range(-1.0..1.0) * scale;
        put(field, written, x0, my, left);
        let right = (at(field, x1, y0) + at(field, x1, y1)) * 0.5
            + rng.gen_range(-1.0..1.0) * scale;
        put(field, written, x1, my, right);
    }
    if mx > x0 && mx < x1 && my > y0 && my < y1 {
        let center = (at(field, x0, y0) + at(field, x1, y1)) * 0.5
            + rng.gen_range(-1.0..1.0) * scale;
        put(field, written, mx, my, center);
    }

    let xs = if mx > x0 && mx < x1 {
        vec![(x0, mx), (mx, x1)]
    } else {
        vec![(x0, x1)]
    };
    let ys = if my > y0 && my < y1 {
        vec![(y0, my), (my, y1)]
    } else {
        vec![(y0, y1)]
    };
    for &(ax0, ax1) in &xs {
        for &(ay0, ay1) in &ys {
            if (ax1 - ax0 > 1) || (ay1 - ay0 > 1) {
                subdivide(field, written, pitch, (ax0, ay0), (ax1, ay1), depth + 1, rng);
            }
        }
    }
}

/// Rescales an arbitrary scalar field to [0, 1]. A constant field maps to 0
/// so the whole screen still completes its transition.
fn normalize(mut values: Vec<f32>) -> Vec<f32> {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &v in &values {
        lo = lo.min(v);
        hi = hi.max(v);
    }
    let span = hi - lo;
    if span <= f32::EPSILON {
        values.iter_mut().for_each(|v| *v = 0.0);
    } else {
        values.iter_mut().for_each(|v| *v = (*v - lo) / span);
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Aspect, WarpMesh};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn normalize_spans_unit_interval() {
        let out = normalize(vec![2.0, 4.0, 3.0]);
        assert_eq!(out, vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_constant_field_is_zero() {
        let out = normalize(vec![5.0; 4]);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn ramp_pins_endpoints() {
        for u in [0.0f32, 0.25, 0.5, 0.9999, 1.0] {
            for band in [0.12f32, 0.3, 0.6] {
                let w = ramp(u, band);
                assert_eq!(w.mix(0.0), 0.0);
                assert_eq!(w.mix(1.0), 1.0);
            }
        }
    }

    #[test]
    fn plasma_covers_unit_interval() {
        let mut rng = StdRng::seed_from_u64(11);
        let order = plasma_order(32, 24, &mut rng);
        assert_eq!(order.len(), 33 * 25);
        let lo = order.iter().cloned().fold(f32::INFINITY, f32::min);
        let hi = order.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_eq!(lo, 0.0);
        assert_eq!(hi, 1.0);
    }

    #[test]
    fn plasma_handles_tiny_grids() {
        let mut rng = StdRng::seed_from_u64(2);
        for (gx, gy) in [(1, 1), (2, 1), (1, 2), (3, 2)] {
            let order = plasma_order(gx, gy, &mut rng);
            assert_eq!(order.len(), (gx + 1) * (gy + 1));
            assert!(order.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn directional_wipe_orders_along_direction() {
        let mut rng = StdRng::seed_from_u64(5);
        let mesh = WarpMesh::new(8, Aspect::square());
        let order = directional_order(mesh.verts(), &mut rng);
        assert!(order.iter().all(|v| (0.0..=1.0).contains(v)));
        // A linear projection must take both extremes somewhere on the grid.
        assert!(order.iter().any(|&v| v == 0.0));
        assert!(order.iter().any(|&v| v == 1.0));
    }
}
