//! Procedural warp-mesh geometry.
//!
//! The warp stage draws the feedback canvas through a `(gx+1) x (gy+1)` grid
//! of vertices in normalized device space. Polar coordinates are precomputed
//! once per grid-size change because every per-vertex expression reads `rad`
//! and `ang`, and the final composite pass uses its own fixed 32x24 grid with
//! hand-fixed angles along the quadrant seams (see [`composite`]).
//!
//! Preset crossfades ride on a per-vertex transition weight field: each vertex
//! carries an `(a, c)` pair such that the instantaneous mix fraction is
//! `clamp(a*t + c, 0, 1)`. [`WarpMesh::randomize_blend_pattern`] rebuilds the
//! field from one of three geometric patterns on every preset switch.

use bytemuck::{Pod, Zeroable};
use rand::Rng;

pub mod blend;
pub mod composite;

pub use blend::PatternKind;
pub use composite::{CompVertex, CompositeGrid, COMP_GRID_X, COMP_GRID_Y};

pub const MAX_GRID_X: usize = 192;
pub const MAX_GRID_Y: usize = 144;

/// GPU-facing warp vertex. Layout is shared with the renderer's vertex buffer
/// description.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WarpVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub uv_orig: [f32; 2],
    pub rad_ang: [f32; 2],
}

/// Per-vertex geometry cache: NDC position plus aspect-corrected polar
/// coordinates. Regenerated only when the grid resolution changes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertInfo {
    pub x: f32,
    pub y: f32,
    pub rad: f32,
    pub ang: f32,
}

/// Per-vertex blend ramp; `mix(t) = clamp(a*t + c, 0, 1)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlendWeight {
    pub a: f32,
    pub c: f32,
}

impl BlendWeight {
    #[inline]
    pub fn mix(&self, t: f32) -> f32 {
        (self.a * t + self.c).clamp(0.0, 1.0)
    }
}

/// Aspect-correction factors applied before the polar transform so `rad` and
/// `ang` describe circles on screen rather than on the (stretched) texture.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aspect {
    pub x: f32,
    pub y: f32,
}

impl Aspect {
    pub fn from_size(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1) as f32, height.max(1) as f32);
        Self {
            x: if height > width { width / height } else { 1.0 },
            y: if width > height { height / width } else { 1.0 },
        }
    }

    pub fn square() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

/// Clamps a requested horizontal grid resolution and derives the vertical one.
pub fn clamp_grid(grid_x: usize) -> (usize, usize) {
    let gx = grid_x.clamp(1, MAX_GRID_X);
    let gy = (gx * 3 / 4).clamp(1, MAX_GRID_Y);
    (gx, gy)
}

pub struct WarpMesh {
    grid_x: usize,
    grid_y: usize,
    aspect: Aspect,
    verts: Vec<VertInfo>,
    weights: Vec<BlendWeight>,
}

impl WarpMesh {
    pub fn new(grid_x: usize, aspect: Aspect) -> Self {
        let (gx, gy) = clamp_grid(grid_x);
        let mut mesh = Self {
            grid_x: gx,
            grid_y: gy,
            aspect,
            verts: Vec::new(),
            weights: vec![BlendWeight { a: 1.0, c: 0.0 }; (gx + 1) * (gy + 1)],
        };
        mesh.rebuild();
        mesh
    }

    pub fn grid_x(&self) -> usize {
        self.grid_x
    }

    pub fn grid_y(&self) -> usize {
        self.grid_y
    }

    pub fn vertex_count(&self) -> usize {
        (self.grid_x + 1) * (self.grid_y + 1)
    }

    pub fn verts(&self) -> &[VertInfo] {
        &self.verts
    }

    pub fn weights(&self) -> &[BlendWeight] {
        &self.weights
    }

    /// Instantaneous mix fraction of vertex `index` at blend time `t`.
    pub fn mix_at(&self, index: usize, t: f32) -> f32 {
        self.weights[index].mix(t)
    }

    pub fn set_aspect(&mut self, aspect: Aspect) {
        if aspect != self.aspect {
            self.aspect = aspect;
            self.rebuild();
        }
    }

    pub fn set_grid(&mut self, grid_x: usize) {
        let (gx, gy) = clamp_grid(grid_x);
        if gx != self.grid_x || gy != self.grid_y {
            self.grid_x = gx;
            self.grid_y = gy;
            self.weights = vec![BlendWeight { a: 1.0, c: 0.0 }; self.vertex_count()];
            self.rebuild();
        }
    }

    fn rebuild(&mut self) {
        let (gx, gy) = (self.grid_x, self.grid_y);
        let mut verts = Vec::with_capacity((gx + 1) * (gy + 1));
        for j in 0..=gy {
            for i in 0..=gx {
                let x = i as f32 / gx as f32 * 2.0 - 1.0;
                let y = j as f32 / gy as f32 * 2.0 - 1.0;
                let sx = x * self.aspect.x;
                let sy = y * self.aspect.y;
                let rad = (sx * sx + sy * sy).sqrt();
                // The exact center would hit atan2(0, 0); force it to zero.
                let ang = if i * 2 == gx && j * 2 == gy {
                    0.0
                } else {
                    sy.atan2(sx)
                };
                verts.push(VertInfo { x, y, rad, ang });
            }
        }
        self.verts = verts;
    }

    /// Picks one of the three transition patterns uniformly at random and
    /// rebuilds the per-vertex `(a, c)` ramp field.
    pub fn randomize_blend_pattern(&mut self, rng: &mut impl Rng) -> PatternKind {
        let kind = match rng.gen_range(0u32..3) {
            0 => PatternKind::DirectionalWipe,
            1 => PatternKind::Plasma,
            _ => PatternKind::RadialWipe,
        };
        self.apply_blend_pattern(kind, rng);
        kind
    }

    /// Deterministic variant used by tests and by callers that want a
    /// specific transition.
    pub fn apply_blend_pattern(&mut self, kind: PatternKind, rng: &mut impl Rng) {
        self.weights = blend::generate(kind, self.grid_x, self.grid_y, &self.verts, rng);
    }

    /// Triangle-list indices, `gx * gy * 6` entries, for the non-strip path.
    pub fn list_indices(&self) -> Vec<u32> {
        let (gx, gy) = (self.grid_x, self.grid_y);
        let pitch = (gx + 1) as u32;
        let mut indices = Vec::with_capacity(gx * gy * 6);
        for j in 0..gy as u32 {
            for i in 0..gx as u32 {
                let v00 = j * pitch + i;
                let v10 = v00 + 1;
                let v01 = v00 + pitch;
                let v11 = v01 + 1;
                indices.extend_from_slice(&[v00, v01, v10, v10, v01, v11]);
            }
        }
        indices
    }

    /// Triangle-strip orderings split into four quadrants, so the warp shader
    /// can be drawn in quadrant-sized batches. Rows inside a quadrant are
    /// joined with degenerate triangles.
    pub fn quadrant_strips(&self) -> [Vec<u32>; 4] {
        let (gx, gy) = (self.grid_x, self.grid_y);
        let half_x = gx / 2;
        let half_y = gy / 2;
        let ranges = [
            (0, half_x, 0, half_y),
            (half_x, gx, 0, half_y),
            (0, half_x, half_y, gy),
            (half_x, gx, half_y, gy),
        ];
        ranges.map(|(x0, x1, y0, y1)| self.strip_for(x0, x1, y0, y1))
    }

    fn strip_for(&self, x0: usize, x1: usize, y0: usize, y1: usize) -> Vec<u32> {
        let pitch = (self.grid_x + 1) as u32;
        let mut strip = Vec::new();
        for j in y0..y1 {
            let row = j as u32 * pitch;
            let next = row + pitch;
            if !strip.is_empty() {
                // Degenerate join from the previous row.
                let first = row + x0 as u32;
                let last = *strip.last().expect("non-empty strip");
                strip.push(last);
                strip.push(first);
            }
            for i in x0..=x1 {
                strip.push(row + i as u32);
                strip.push(next + i as u32);
            }
        }
        strip
    }
}
