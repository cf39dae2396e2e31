//! Final-composite grid.
//!
//! The composite pass draws the whole screen through a fixed 32x24 grid so
//! composite shaders get interpolated `rad`/`ang` varyings. `atan2` has a
//! branch cut along the negative x axis and further discontinuities at every
//! quadrant seam once values are interpolated across shared vertices, so the
//! grid is built as four separate quadrants with duplicated seam vertices,
//! and each seam row/column receives its analytically-correct angle instead
//! of the interpolated one.

use bytemuck::{Pod, Zeroable};

use crate::Aspect;

pub const COMP_GRID_X: usize = 32;
pub const COMP_GRID_Y: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CompVertex {
    pub x: f32,
    pub y: f32,
    pub uv: [f32; 2],
    pub rad: f32,
    pub ang: f32,
}

pub struct CompositeGrid {
    verts: Vec<CompVertex>,
    indices: Vec<u32>,
}

impl CompositeGrid {
    pub fn new(aspect: Aspect) -> Self {
        let half_x = COMP_GRID_X / 2;
        let half_y = COMP_GRID_Y / 2;
        let mut verts = Vec::with_capacity(4 * (half_x + 1) * (half_y + 1));
        let mut indices = Vec::new();

        for quadrant in 0..4u32 {
            let (qx, qy) = ((quadrant % 2) as usize, (quadrant / 2) as usize);
            let base = verts.len() as u32;
            let (i0, j0) = (qx * half_x, qy * half_y);
            for j in 0..=half_y {
                for i in 0..=half_x {
                    let gi = i0 + i;
                    let gj = j0 + j;
                    let x = gi as f32 / COMP_GRID_X as f32 * 2.0 - 1.0;
                    let y = gj as f32 / COMP_GRID_Y as f32 * 2.0 - 1.0;
                    let sx = x * aspect.x;
                    let sy = y * aspect.y;
                    let rad = (sx * sx + sy * sy).sqrt();
                    let ang = seam_angle(gi, gj, quadrant).unwrap_or_else(|| sy.atan2(sx));
                    verts.push(CompVertex {
                        x,
                        y,
                        uv: [(x + 1.0) * 0.5, (y + 1.0) * 0.5],
                        rad,
                        ang,
                    });
                }
            }
            let pitch = (half_x + 1) as u32;
            for j in 0..half_y as u32 {
                for i in 0..half_x as u32 {
                    let v00 = base + j * pitch + i;
                    let v10 = v00 + 1;
                    let v01 = v00 + pitch;
                    let v11 = v01 + 1;
                    indices.extend_from_slice(&[v00, v01, v10, v10, v01, v11]);
                }
            }
        }

        Self { verts, indices }
    }

    pub fn verts(&self) -> &[CompVertex] {
        &self.verts
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }
}

/// Explicit angles on the quadrant seams. `gi`/`gj` are whole-grid vertex
/// coordinates; the quadrant index decides which side of a shared seam this
/// copy belongs to (0..=3 as left-top, right-top, left-bottom, right-bottom,
/// with +y pointing down-grid toward j = COMP_GRID_Y).
fn seam_angle(gi: usize, gj: usize, quadrant: u32) -> Option<f32> {
    use std::f32::consts::PI;
    let center_col = gi == COMP_GRID_X / 2;
    let center_row = gj == COMP_GRID_Y / 2;
    let left_half = quadrant % 2 == 0;
    let top_half = quadrant / 2 == 0;

    if center_col && center_row {
        // The exact center would be atan2(0, 0). rad is 0 there, so the
        // value only matters for interpolation continuity; give each
        // quadrant's copy the angle its own seam row carries.
        return Some(match (left_half, top_half) {
            (true, true) => -PI,
            (true, false) => PI,
            (false, _) => 0.0,
        });
    }
    if center_row {
        // Along y = 0 the true angle is 0 on the right, and +/- PI on the
        // left depending on which side of the branch cut interpolates in.
        if gi > COMP_GRID_X / 2 {
            return Some(0.0);
        }
        return Some(if top_half { -PI } else { PI });
    }
    if center_col {
        return Some(if gj < COMP_GRID_Y / 2 {
            -PI / 2.0
        } else {
            PI / 2.0
        });
    }
    // Outer-edge rows/columns keep their computed angle; only interior seams
    // between quadrants wrap.
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn vertex_and_index_counts() {
        let grid = CompositeGrid::new(Aspect::square());
        let per_quadrant = (COMP_GRID_X / 2 + 1) * (COMP_GRID_Y / 2 + 1);
        assert_eq!(grid.verts().len(), 4 * per_quadrant);
        assert_eq!(grid.indices().len(), COMP_GRID_X * COMP_GRID_Y * 6);
        let count = grid.verts().len() as u32;
        assert!(grid.indices().iter().all(|&i| i < count));
    }

    #[test]
    fn seam_angles_do_not_wrap_within_a_quadrant() {
        let grid = CompositeGrid::new(Aspect::square());
        let per_quadrant = (COMP_GRID_X / 2 + 1) * (COMP_GRID_Y / 2 + 1);
        // Within one quadrant, adjacent vertices must never differ by close
        // to 2*PI (the wrap naive interpolation would produce).
        let pitch = COMP_GRID_X / 2 + 1;
        for q in 0..4 {
            let verts = &grid.verts()[q * per_quadrant..(q + 1) * per_quadrant];
            for j in 0..=COMP_GRID_Y / 2 {
                for i in 0..COMP_GRID_X / 2 {
                    let a = verts[j * pitch + i].ang;
                    let b = verts[j * pitch + i + 1].ang;
                    assert!((a - b).abs() < PI, "wrap between columns in quadrant {q}");
                }
            }
            for j in 0..COMP_GRID_Y / 2 {
                for i in 0..=COMP_GRID_X / 2 {
                    let a = verts[j * pitch + i].ang;
                    let b = verts[(j + 1) * pitch + i].ang;
                    assert!((a - b).abs() < PI, "wrap between rows in quadrant {q}");
                }
            }
        }
    }

    #[test]
    fn center_copies_are_finite_with_zero_radius() {
        let grid = CompositeGrid::new(Aspect::square());
        let mut found = 0;
        for v in grid.verts() {
            if v.x == 0.0 && v.y == 0.0 {
                assert!(v.ang.is_finite());
                assert_eq!(v.rad, 0.0);
                found += 1;
            }
        }
        // One copy per quadrant.
        assert_eq!(found, 4);
    }

    #[test]
    fn uv_covers_unit_square() {
        let grid = CompositeGrid::new(Aspect::square());
        for v in grid.verts() {
            assert!((0.0..=1.0).contains(&v.uv[0]));
            assert!((0.0..=1.0).contains(&v.uv[1]));
        }
        assert!(grid.verts().iter().any(|v| v.uv == [0.0, 0.0]));
        assert!(grid.verts().iter().any(|v| v.uv == [1.0, 1.0]));
    }
}
