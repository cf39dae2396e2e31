//! Per-shader-instance parameter binding tables.
//!
//! A `ShaderParams` maps reflection-discovered symbol names to cache entries
//! and float4 constants. Tables are rebuilt whenever their shader is
//! recompiled and live inside `Rc<RefCell<...>>` so the cache can null
//! bindings when it evicts a texture out from under them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::TextureId;

pub type SharedParams<T> = Rc<RefCell<ShaderParams<T>>>;

/// One resolved texture binding. Holds a shared handle to the resource so a
/// bound texture stays alive for the draw even mid-eviction.
pub struct TexBinding<T> {
    pub id: TextureId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub resource: Rc<T>,
}

// Manual impl: the GPU resource type need not be Debug.
impl<T> std::fmt::Debug for TexBinding<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TexBinding")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl<T> Clone for TexBinding<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            resource: Rc::clone(&self.resource),
        }
    }
}

impl<T> TexBinding<T> {
    /// `texsize_*` constant layout: width, height, 1/width, 1/height.
    pub fn texsize(&self) -> [f32; 4] {
        let w = self.width.max(1) as f32;
        let h = self.height.max(1) as f32;
        [w, h, 1.0 / w, 1.0 / h]
    }
}

#[derive(Default)]
pub struct ShaderParams<T> {
    textures: HashMap<String, TexBinding<T>>,
    float4s: HashMap<String, [f32; 4]>,
}

impl<T> ShaderParams<T> {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            float4s: HashMap::new(),
        }
    }

    pub fn shared() -> SharedParams<T> {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Drops every binding; used when the owning shader is recompiled.
    pub fn clear(&mut self) {
        self.textures.clear();
        self.float4s.clear();
    }

    pub fn bind_texture(&mut self, symbol: &str, binding: TexBinding<T>) {
        self.textures.insert(symbol.to_string(), binding);
    }

    pub fn texture(&self, symbol: &str) -> Option<&TexBinding<T>> {
        self.textures.get(symbol)
    }

    pub fn texture_symbols(&self) -> impl Iterator<Item = &str> {
        self.textures.keys().map(String::as_str)
    }

    pub fn set_float4(&mut self, symbol: &str, value: [f32; 4]) {
        self.float4s.insert(symbol.to_string(), value);
    }

    pub fn float4(&self, symbol: &str) -> Option<[f32; 4]> {
        self.float4s.get(symbol).copied()
    }

    /// Nulls every binding that references the evicted texture. Called by the
    /// cache's eviction broadcast.
    pub fn invalidate(&mut self, id: TextureId) {
        self.textures.retain(|_, binding| binding.id != id);
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.float4s.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextureCache;
    use std::path::PathBuf;

    fn cache() -> TextureCache<u32> {
        TextureCache::new(PathBuf::from("/nonexistent"), PathBuf::from("/nonexistent"))
    }

    #[test]
    fn invalidate_only_touches_matching_bindings() {
        let mut cache = cache();
        cache.insert_permanent("a", 1, 8, 8);
        cache.insert_permanent("b", 2, 8, 8);
        let a = cache.resolve("a").unwrap();
        let b = cache.resolve("b").unwrap();

        let mut params = ShaderParams::new();
        params.bind_texture("sampler_a", a.clone());
        params.bind_texture("sampler_b", b);
        params.invalidate(a.id);
        assert!(params.texture("sampler_a").is_none());
        assert!(params.texture("sampler_b").is_some());
    }

    #[test]
    fn texsize_matches_dimensions() {
        let mut cache = cache();
        cache.insert_permanent("t", 3, 256, 128);
        let binding = cache.resolve("t").unwrap();
        let ts = binding.texsize();
        assert_eq!(ts[0], 256.0);
        assert_eq!(ts[1], 128.0);
        assert!((ts[2] - 1.0 / 256.0).abs() < 1e-9);
    }

    #[test]
    fn clear_empties_the_table() {
        let mut params: ShaderParams<u32> = ShaderParams::new();
        params.set_float4("rot_s1", [1.0, 0.0, 0.0, 0.0]);
        assert!(!params.is_empty());
        params.clear();
        assert!(params.is_empty());
    }
}
