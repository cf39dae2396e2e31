//! Binds a discovered parameter table against the texture cache.
//!
//! Runs once per compiled shader and again whenever a `randNN` slot re-rolls.
//! Failures degrade: a texture that cannot be loaded leaves its binding
//! absent and the draw proceeds without it.

use rand::Rng;
use texbind::{SharedParams, TexBinding, TextureCache, TextureLoader};

use crate::binding::{parse_rand, BindingKind, ParamTable, RandFrameCache};

/// Textures the renderer owns directly rather than through the cache.
pub struct StageTextures<T> {
    /// The double-buffered virtual-screen texture (`sampler_main`).
    pub main: Option<TexBinding<T>>,
    /// Blur chain, `blur1` at index 0.
    pub blur: [Option<TexBinding<T>>; 3],
}

impl<T> Default for StageTextures<T> {
    fn default() -> Self {
        Self {
            main: None,
            blur: [None, None, None],
        }
    }
}

/// Fills `params` from a discovered table. `rand_pool` holds the logical
/// names eligible for `randNN` slots; picks are memoized per frame in
/// `rand_cache` so a sampler and its `texsize_*` constant agree.
#[allow(clippy::too_many_arguments)]
pub fn resolve_bindings<T, L, R>(
    table: &ParamTable,
    params: &SharedParams<T>,
    cache: &mut TextureCache<T>,
    loader: &mut L,
    stage: &StageTextures<T>,
    rand_cache: &mut RandFrameCache,
    rand_pool: &[String],
    rng: &mut R,
) where
    L: TextureLoader<Texture = T>,
    R: Rng,
{
    let mut params = params.borrow_mut();
    params.clear();

    for sampler in &table.samplers {
        let binding = match &sampler.kind {
            BindingKind::Main => stage.main.clone(),
            BindingKind::Blur(n) => stage.blur[(*n as usize) - 1].clone(),
            BindingKind::Rand { slot, prefix } => {
                rand_cache
                    .choose(*slot, prefix.as_deref(), rand_pool, rng)
                    .and_then(|name| load_or_warn(cache, loader, &name))
            }
            BindingKind::Named(name) => load_or_warn(cache, loader, name),
        };
        if let Some(binding) = binding {
            params.bind_texture(&sampler.decl_name, binding);
        }
    }

    for name in &table.texsizes {
        let binding = match parse_rand(name) {
            Some((slot, prefix)) => rand_cache
                .choose(slot, prefix.as_deref(), rand_pool, rng)
                .and_then(|chosen| cache.resolve(&chosen)),
            None => cache.resolve(name),
        };
        if let Some(binding) = binding {
            params.set_float4(&format!("texsize_{name}"), binding.texsize());
        }
    }
}

fn load_or_warn<T>(
    cache: &mut TextureCache<T>,
    loader: &mut impl TextureLoader<Texture = T>,
    name: &str,
) -> Option<TexBinding<T>> {
    match cache.load(name, loader) {
        Ok(binding) => Some(binding),
        Err(err) => {
            tracing::warn!(name, error = %err, "texture binding left empty");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::discover;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::path::{Path, PathBuf};
    use texbind::{LoadedTexture, ShaderParams, TexError};

    struct StubLoader;

    impl TextureLoader for StubLoader {
        type Texture = u32;
        fn load(&mut self, _path: &Path) -> Result<LoadedTexture<u32>, TexError> {
            Ok(LoadedTexture {
                resource: 1,
                width: 64,
                height: 32,
                size_bytes: 64 * 32 * 4,
            })
        }
    }

    fn stage_with_main(cache: &mut TextureCache<u32>) -> StageTextures<u32> {
        cache.insert_permanent("__canvas", 0, 512, 512);
        StageTextures {
            main: cache.resolve("__canvas"),
            blur: [None, None, None],
        }
    }

    #[test]
    fn main_and_named_bindings_resolve() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("billow.png"), b"x").unwrap();
        let mut cache: TextureCache<u32> =
            TextureCache::new(dir.path().to_path_buf(), PathBuf::from("/nonexistent"));
        let stage = stage_with_main(&mut cache);

        let table = discover("tex2D(sampler_main, uv) + tex2D(sampler_billow, uv) * texsize_billow");
        let params = ShaderParams::shared();
        let mut rand_cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(0);
        resolve_bindings(
            &table,
            &params,
            &mut cache,
            &mut StubLoader,
            &stage,
            &mut rand_cache,
            &[],
            &mut rng,
        );

        let params = params.borrow();
        assert!(params.texture("sampler_main").is_some());
        assert!(params.texture("sampler_billow").is_some());
        assert_eq!(
            params.float4("texsize_billow"),
            Some([64.0, 32.0, 1.0 / 64.0, 1.0 / 32.0])
        );
    }

    #[test]
    fn missing_texture_leaves_binding_absent() {
        let mut cache: TextureCache<u32> =
            TextureCache::new(PathBuf::from("/nonexistent"), PathBuf::from("/nonexistent"));
        let stage = StageTextures::default();
        let table = discover("tex2D(sampler_ghost, uv)");
        let params = ShaderParams::shared();
        let mut rand_cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(0);
        resolve_bindings(
            &table,
            &params,
            &mut cache,
            &mut StubLoader,
            &stage,
            &mut rand_cache,
            &[],
            &mut rng,
        );
        assert!(params.borrow().texture("sampler_ghost").is_none());
    }

    #[test]
    fn rand_sampler_and_texsize_agree() {
        let dir = tempfile::tempdir().unwrap();
        let pool: Vec<String> = (0..8).map(|i| format!("noisetex{i}")).collect();
        for name in &pool {
            std::fs::write(dir.path().join(format!("{name}.png")), b"x").unwrap();
        }
        let mut cache: TextureCache<u32> =
            TextureCache::new(dir.path().to_path_buf(), PathBuf::from("/nonexistent"));
        let stage = StageTextures::default();

        let table = discover("tex2D(sampler_rand03, uv) * texsize_rand03");
        let params = ShaderParams::shared();
        let mut rand_cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(9);
        resolve_bindings(
            &table,
            &params,
            &mut cache,
            &mut StubLoader,
            &stage,
            &mut rand_cache,
            &pool,
            &mut rng,
        );

        let params = params.borrow();
        let bound = params.texture("sampler_rand03").expect("rand binding");
        // The texsize constant reflects whichever texture the slot picked.
        assert_eq!(params.float4("texsize_rand03"), Some(bound.texsize()));
    }

    #[test]
    fn blur_bindings_come_from_stage_textures() {
        let mut cache: TextureCache<u32> =
            TextureCache::new(PathBuf::from("/nonexistent"), PathBuf::from("/nonexistent"));
        cache.insert_permanent("__blur2", 0, 128, 128);
        let stage = StageTextures {
            main: None,
            blur: [None, cache.resolve("__blur2"), None],
        };
        let table = discover("tex2D(sampler_blur2, uv)");
        let params = ShaderParams::shared();
        let mut rand_cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(0);
        resolve_bindings(
            &table,
            &params,
            &mut cache,
            &mut StubLoader,
            &stage,
            &mut rand_cache,
            &[],
            &mut rng,
        );
        assert_eq!(
            params.borrow().texture("sampler_blur2").unwrap().name,
            "__blur2"
        );
    }
}
