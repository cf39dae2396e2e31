//! Shader parameter discovery.
//!
//! After preprocessing we scan the shader text for `sampler_*` and
//! `texsize_*` identifiers and classify each name into the binding it
//! requests. Classification is by naming convention: `sampler_main` is the
//! double-buffered canvas, `blurN` the blur chain, `randNN` a pseudo-random
//! texture pick, and everything else a texture looked up by name.

use std::collections::HashMap;

use rand::Rng;

/// Texture filtering requested by the sampler-name prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SamplerFilter {
    #[default]
    Bilinear,
    Point,
}

/// Addressing mode requested by the sampler-name prefix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SamplerWrap {
    #[default]
    Wrap,
    Clamp,
}

/// What a sampler name resolves to at bind time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// The current virtual-screen texture (`sampler_main`).
    Main,
    /// One level of the precomputed blur chain (`blur1`..`blur3`).
    Blur(u32),
    /// A texture chosen pseudo-randomly per frame, optionally restricted to
    /// filenames starting with the suffix (`rand03`, `rand07_smalltiled`).
    Rand { slot: u32, prefix: Option<String> },
    /// Any other name, loaded through the texture cache.
    Named(String),
}

/// One sampler the shader declares, with its resolved filter/wrap modes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplerBinding {
    /// The identifier as written, including the `sampler_` prefix.
    pub decl_name: String,
    pub kind: BindingKind,
    pub filter: SamplerFilter,
    pub wrap: SamplerWrap,
}

/// Everything discovery found in one shader: its samplers plus the
/// `texsize_*` float4 constants that must be filled alongside them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamTable {
    pub samplers: Vec<SamplerBinding>,
    pub texsizes: Vec<String>,
}

impl ParamTable {
    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty() && self.texsizes.is_empty()
    }
}

/// Scans shader text for `sampler_*` and `texsize_*` identifiers.
/// Duplicates are reported once; declaration order is preserved.
pub fn discover(source: &str) -> ParamTable {
    let mut table = ParamTable::default();
    for ident in identifiers(source) {
        if let Some(rest) = ident.strip_prefix("sampler_") {
            if rest.is_empty() || table.samplers.iter().any(|s| s.decl_name == ident) {
                continue;
            }
            table.samplers.push(classify(ident, rest));
        } else if let Some(rest) = ident.strip_prefix("texsize_") {
            if rest.is_empty() || table.texsizes.iter().any(|t| t == rest) {
                continue;
            }
            table.texsizes.push(rest.to_string());
        }
    }
    table
}

fn classify(decl_name: &str, rest: &str) -> SamplerBinding {
    let (filter, wrap, base) = split_modes(rest);
    let kind = if base == "main" {
        BindingKind::Main
    } else if let Some(n) = base
        .strip_prefix("blur")
        .and_then(|d| d.parse::<u32>().ok())
        .filter(|n| (1..=3).contains(n))
    {
        BindingKind::Blur(n)
    } else if let Some((slot, prefix)) = parse_rand(base) {
        BindingKind::Rand { slot, prefix }
    } else {
        BindingKind::Named(base.to_string())
    };
    SamplerBinding {
        decl_name: decl_name.to_string(),
        kind,
        filter,
        wrap,
    }
}

/// Strips the optional two-letter filter/wrap prefix (`fw_`, `pc_`, `wf_`,
/// ...) off a sampler base name. Either letter order is accepted.
fn split_modes(rest: &str) -> (SamplerFilter, SamplerWrap, &str) {
    if rest.len() > 3 && rest.as_bytes()[2] == b'_' {
        let mut filter = None;
        let mut wrap = None;
        for b in rest.bytes().take(2) {
            match b.to_ascii_lowercase() {
                b'f' => filter = Some(SamplerFilter::Bilinear),
                b'p' => filter = Some(SamplerFilter::Point),
                b'w' => wrap = Some(SamplerWrap::Wrap),
                b'c' => wrap = Some(SamplerWrap::Clamp),
                _ => return (SamplerFilter::default(), SamplerWrap::default(), rest),
            }
        }
        if let (Some(f), Some(w)) = (filter, wrap) {
            return (f, w, &rest[3..]);
        }
    }
    (SamplerFilter::default(), SamplerWrap::default(), rest)
}

/// `rand07` or `rand13_smalltiled`. The two digits select a slot; the
/// suffix restricts the candidate pool by filename prefix.
pub(crate) fn parse_rand(base: &str) -> Option<(u32, Option<String>)> {
    let rest = base.strip_prefix("rand")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() != 2 {
        return None;
    }
    let slot = digits.parse().ok()?;
    let tail = &rest[2..];
    let prefix = match tail.strip_prefix('_') {
        Some(p) if !p.is_empty() => Some(p.to_string()),
        Some(_) => None,
        None if tail.is_empty() => None,
        None => return None,
    };
    Some((slot, prefix))
}

fn identifiers(source: &str) -> impl Iterator<Item = &str> {
    let bytes = source.as_bytes();
    let mut at = 0;
    std::iter::from_fn(move || {
        while at < bytes.len() {
            if bytes[at].is_ascii_alphabetic() || bytes[at] == b'_' {
                let start = at;
                while at < bytes.len()
                    && (bytes[at].is_ascii_alphanumeric() || bytes[at] == b'_')
                {
                    at += 1;
                }
                return Some(&source[start..at]);
            }
            at += 1;
        }
        None
    })
}

/// Per-frame memo of which texture each `randNN` key picked.
///
/// A shader may reference `sampler_rand07_x` and `texsize_rand07_x`; both
/// must agree within the frame, so the first pick is cached under the
/// rand key and reused until [`RandFrameCache::begin_frame`].
#[derive(Debug, Default)]
pub struct RandFrameCache {
    chosen: HashMap<String, String>,
}

impl RandFrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_frame(&mut self) {
        self.chosen.clear();
    }

    /// The texture name chosen this frame for `slot`/`prefix`, picking one
    /// from `candidates` on first use. Returns `None` when no candidate
    /// matches the prefix.
    pub fn choose<R: Rng>(
        &mut self,
        slot: u32,
        prefix: Option<&str>,
        candidates: &[String],
        rng: &mut R,
    ) -> Option<String> {
        let key = match prefix {
            Some(p) => format!("rand{slot:02}_{p}"),
            None => format!("rand{slot:02}"),
        };
        if let Some(name) = self.chosen.get(&key) {
            return Some(name.clone());
        }
        let pool: Vec<&String> = match prefix {
            Some(p) => {
                let p = p.to_ascii_lowercase();
                candidates
                    .iter()
                    .filter(|c| c.to_ascii_lowercase().starts_with(&p))
                    .collect()
            }
            None => candidates.iter().collect(),
        };
        if pool.is_empty() {
            return None;
        }
        let name = pool[rng.gen_range(0..pool.len())].clone();
        self.chosen.insert(key, name.clone());
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn classifies_main_and_prefixes() {
        let table = discover("tex2D(sampler_main, uv) + tex2D(sampler_fc_main, uv) + tex2D(sampler_pw_main, uv)");
        assert_eq!(table.samplers.len(), 3);
        for s in &table.samplers {
            assert_eq!(s.kind, BindingKind::Main);
        }
        assert_eq!(table.samplers[0].filter, SamplerFilter::Bilinear);
        assert_eq!(table.samplers[0].wrap, SamplerWrap::Wrap);
        assert_eq!(table.samplers[1].filter, SamplerFilter::Bilinear);
        assert_eq!(table.samplers[1].wrap, SamplerWrap::Clamp);
        assert_eq!(table.samplers[2].filter, SamplerFilter::Point);
        assert_eq!(table.samplers[2].wrap, SamplerWrap::Wrap);
    }

    #[test]
    fn reversed_prefix_letters_work() {
        let table = discover("sampler_cf_main sampler_wp_noise_lq");
        assert_eq!(table.samplers[0].filter, SamplerFilter::Bilinear);
        assert_eq!(table.samplers[0].wrap, SamplerWrap::Clamp);
        assert_eq!(table.samplers[1].filter, SamplerFilter::Point);
        assert_eq!(table.samplers[1].wrap, SamplerWrap::Wrap);
        assert_eq!(
            table.samplers[1].kind,
            BindingKind::Named("noise_lq".into())
        );
    }

    #[test]
    fn classifies_blur_rand_and_named() {
        let table = discover("sampler_blur2 sampler_rand07 sampler_rand13_smalltiled sampler_billow");
        assert_eq!(table.samplers[0].kind, BindingKind::Blur(2));
        assert_eq!(
            table.samplers[1].kind,
            BindingKind::Rand {
                slot: 7,
                prefix: None
            }
        );
        assert_eq!(
            table.samplers[2].kind,
            BindingKind::Rand {
                slot: 13,
                prefix: Some("smalltiled".into())
            }
        );
        assert_eq!(table.samplers[3].kind, BindingKind::Named("billow".into()));
    }

    #[test]
    fn blur_out_of_range_is_named() {
        let table = discover("sampler_blur9");
        assert_eq!(table.samplers[0].kind, BindingKind::Named("blur9".into()));
    }

    #[test]
    fn texsize_constants_are_collected_once() {
        let table = discover("texsize_billow.xy * texsize_billow.zw + texsize_rand07");
        assert_eq!(table.texsizes, vec!["billow".to_string(), "rand07".to_string()]);
    }

    #[test]
    fn duplicate_samplers_report_once() {
        let table = discover("sampler_main sampler_main sampler_main");
        assert_eq!(table.samplers.len(), 1);
    }

    #[test]
    fn rand_cache_is_stable_within_a_frame() {
        let candidates: Vec<String> = (0..16).map(|i| format!("tex{i:02}")).collect();
        let mut cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(7);
        let first = cache.choose(3, None, &candidates, &mut rng).unwrap();
        for _ in 0..10 {
            assert_eq!(cache.choose(3, None, &candidates, &mut rng).unwrap(), first);
        }
        // A different slot rolls independently of slot 3's memo.
        let other = cache.choose(4, None, &candidates, &mut rng).unwrap();
        assert_eq!(cache.choose(4, None, &candidates, &mut rng).unwrap(), other);
    }

    #[test]
    fn rand_cache_resets_each_frame() {
        let candidates: Vec<String> = (0..64).map(|i| format!("tex{i:02}")).collect();
        let mut cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..32 {
            cache.begin_frame();
            seen.insert(cache.choose(0, None, &candidates, &mut rng).unwrap());
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn rand_prefix_filters_candidates() {
        let candidates = vec![
            "smalltiled_a".to_string(),
            "smalltiled_b".to_string(),
            "billow".to_string(),
        ];
        let mut cache = RandFrameCache::new();
        let mut rng = SmallRng::seed_from_u64(2);
        let pick = cache
            .choose(13, Some("smalltiled"), &candidates, &mut rng)
            .unwrap();
        assert!(pick.starts_with("smalltiled"));
        assert!(cache.choose(13, Some("zzz"), &candidates, &mut rng).is_none());
    }
}
