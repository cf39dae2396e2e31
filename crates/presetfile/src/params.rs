//! The blendable numeric knobs of a preset, keyed by their `.milk` names.
//!
//! One table drives everything: struct layout, defaults, import/export key
//! lookup, and blend-endpoint capture, so a knob added here is automatically
//! parsed, written, and crossfaded.

use crate::blend::Blendable;

macro_rules! preset_params {
    ($(($field:ident, $key:literal, $default:expr)),* $(,)?) => {
        #[derive(Clone, Debug, PartialEq)]
        pub struct PresetParams {
            $(pub $field: Blendable,)*
        }

        impl Default for PresetParams {
            fn default() -> Self {
                Self {
                    $($field: Blendable::new($default),)*
                }
            }
        }

        impl PresetParams {
            /// `.milk` keys, in file order.
            pub const KEYS: &'static [&'static str] = &[$($key,)*];

            pub fn get(&self, key: &str) -> Option<&Blendable> {
                match key {
                    $($key => Some(&self.$field),)*
                    _ => None,
                }
            }

            pub fn get_mut(&mut self, key: &str) -> Option<&mut Blendable> {
                match key {
                    $($key => Some(&mut self.$field),)*
                    _ => None,
                }
            }
        }
    };
}

preset_params! {
    (gamma, "fGammaAdj", 2.0),
    (decay, "fDecay", 0.98),
    (echo_zoom, "fVideoEchoZoom", 2.0),
    (echo_alpha, "fVideoEchoAlpha", 0.0),
    (wave_alpha, "fWaveAlpha", 0.8),
    (wave_scale, "fWaveScale", 1.0),
    (wave_smoothing, "fWaveSmoothing", 0.75),
    (wave_param, "fWaveParam", 0.0),
    (mod_wave_alpha_start, "fModWaveAlphaStart", 0.75),
    (mod_wave_alpha_end, "fModWaveAlphaEnd", 0.95),
    (warp_anim_speed, "fWarpAnimSpeed", 1.0),
    (warp_scale, "fWarpScale", 1.0),
    (zoom_exponent, "fZoomExponent", 1.0),
    (shader, "fShader", 0.0),
    (zoom, "zoom", 1.0),
    (rot, "rot", 0.0),
    (cx, "cx", 0.5),
    (cy, "cy", 0.5),
    (dx, "dx", 0.0),
    (dy, "dy", 0.0),
    (warp, "warp", 1.0),
    (sx, "sx", 1.0),
    (sy, "sy", 1.0),
    (wave_r, "wave_r", 1.0),
    (wave_g, "wave_g", 1.0),
    (wave_b, "wave_b", 1.0),
    (wave_x, "wave_x", 0.5),
    (wave_y, "wave_y", 0.5),
    (ob_size, "ob_size", 0.01),
    (ob_r, "ob_r", 0.0),
    (ob_g, "ob_g", 0.0),
    (ob_b, "ob_b", 0.0),
    (ob_a, "ob_a", 0.0),
    (ib_size, "ib_size", 0.01),
    (ib_r, "ib_r", 0.25),
    (ib_g, "ib_g", 0.25),
    (ib_b, "ib_b", 0.25),
    (ib_a, "ib_a", 0.0),
    (mv_x, "nMotionVectorsX", 12.0),
    (mv_y, "nMotionVectorsY", 9.0),
    (mv_dx, "mv_dx", 0.0),
    (mv_dy, "mv_dy", 0.0),
    (mv_l, "mv_l", 0.9),
    (mv_r, "mv_r", 1.0),
    (mv_g, "mv_g", 1.0),
    (mv_b, "mv_b", 1.0),
    (mv_a, "mv_a", 0.0),
    (blur1_min, "b1n", 0.0),
    (blur1_max, "b1x", 1.0),
    (blur2_min, "b2n", 0.0),
    (blur2_max, "b2x", 1.0),
    (blur3_min, "b3n", 0.0),
    (blur3_max, "b3x", 1.0),
    (blur1_edge_darken, "b1ed", 0.25),
}

impl PresetParams {
    /// Captures blend start points from `old` for every knob.
    pub fn start_blend_from(&mut self, old: &PresetParams, now: f64, duration: f64) {
        for key in Self::KEYS {
            let from = old
                .get(key)
                .map(|b| b.value_at(now))
                .unwrap_or_default();
            if let Some(param) = self.get_mut(key) {
                param.start_blend(from, now, duration);
            }
        }
    }

    pub fn finish_if_done(&mut self, time: f64) {
        for key in Self::KEYS {
            if let Some(param) = self.get_mut(key) {
                param.finish_if_done(time);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_key_resolves() {
        let mut params = PresetParams::default();
        for key in PresetParams::KEYS {
            assert!(params.get(key).is_some(), "missing {key}");
            assert!(params.get_mut(key).is_some(), "missing mut {key}");
        }
        assert!(params.get("no_such_knob").is_none());
    }

    #[test]
    fn defaults_are_sane() {
        let params = PresetParams::default();
        assert_eq!(params.zoom.target(), 1.0);
        assert_eq!(params.cx.target(), 0.5);
        assert_eq!(params.decay.target(), 0.98);
    }

    #[test]
    fn blend_capture_covers_all_knobs() {
        let mut old = PresetParams::default();
        old.zoom.set(2.0);
        old.rot.set(0.5);
        let mut new = PresetParams::default();
        new.zoom.set(4.0);
        new.start_blend_from(&old, 0.0, 2.0);
        assert_eq!(new.zoom.value_at(0.0), 2.0);
        assert_eq!(new.zoom.value_at(1.0), 3.0);
        assert_eq!(new.zoom.value_at(2.0), 4.0);
        assert_eq!(new.rot.value_at(0.0), 0.5);
        assert_eq!(new.rot.value_at(2.0), 0.0);
    }
}
