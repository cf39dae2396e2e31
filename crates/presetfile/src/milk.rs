//! `.milk` import/export.
//!
//! The format is line-oriented `key=value` text: an optional
//! `MILKDROP_PRESET_VERSION` header, `PSVERSION*` lines, a `[preset00]`
//! section, numeric knobs, and numbered code lines (`per_frame_3=...`)
//! that concatenate into the code sections. Shader code lines carry a
//! leading backtick to preserve leading whitespace; expression code lines
//! do not. Unknown keys are ignored so newer files degrade gracefully.
//!
//! Floats are written with Rust's shortest-round-trip formatting, so
//! `import(export(state))` reproduces every numeric field exactly.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::custom::{bool_str, parse_bool, parse_float, parse_int};
use crate::{PresetState, MAX_CUSTOM_SHAPES, MAX_CUSTOM_WAVES};

pub const SECTION_HEADER: &str = "[preset00]";
pub const VERSION_KEY: &str = "MILKDROP_PRESET_VERSION";

/// The text had no `[preset00]` section and cannot be a preset.
#[derive(Debug, thiserror::Error)]
#[error("no [preset00] section")]
pub struct NoSection;

#[derive(Default)]
struct CodeLines {
    per_frame_init: BTreeMap<u32, String>,
    per_frame: BTreeMap<u32, String>,
    per_pixel: BTreeMap<u32, String>,
    warp: BTreeMap<u32, String>,
    comp: BTreeMap<u32, String>,
    wave_init: [BTreeMap<u32, String>; MAX_CUSTOM_WAVES],
    wave_frame: [BTreeMap<u32, String>; MAX_CUSTOM_WAVES],
    wave_point: [BTreeMap<u32, String>; MAX_CUSTOM_WAVES],
    shape_init: [BTreeMap<u32, String>; MAX_CUSTOM_SHAPES],
    shape_frame: [BTreeMap<u32, String>; MAX_CUSTOM_SHAPES],
}

pub(crate) fn import(state: &mut PresetState, name: &str, text: &str) -> Result<(), NoSection> {
    if !text.lines().any(|l| l.trim() == SECTION_HEADER) {
        return Err(NoSection);
    }

    *state = PresetState {
        name: name.to_string(),
        ..PresetState::default()
    };
    let mut code = CodeLines::default();

    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() || line.trim() == SECTION_HEADER {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        apply_line(state, &mut code, key, value);
    }

    state.per_frame_init_code = join(&code.per_frame_init);
    state.per_frame_code = join(&code.per_frame);
    state.per_pixel_code = join(&code.per_pixel);
    state.warp_shader = join(&code.warp);
    state.comp_shader = join(&code.comp);
    for i in 0..MAX_CUSTOM_WAVES {
        state.waves[i].init_code = join(&code.wave_init[i]);
        state.waves[i].per_frame_code = join(&code.wave_frame[i]);
        state.waves[i].per_point_code = join(&code.wave_point[i]);
    }
    for i in 0..MAX_CUSTOM_SHAPES {
        state.shapes[i].init_code = join(&code.shape_init[i]);
        state.shapes[i].per_frame_code = join(&code.shape_frame[i]);
    }
    Ok(())
}

fn apply_line(state: &mut PresetState, code: &mut CodeLines, key: &str, value: &str) {
    // Numbered code lines first; "per_frame_init_" must be tried before
    // "per_frame_", and the code prefixes before the scalar knobs.
    if let Some(n) = numbered(key, "per_frame_init_") {
        code.per_frame_init.insert(n, strip_tick(value));
        return;
    }
    if let Some(n) = numbered(key, "per_frame_") {
        code.per_frame.insert(n, strip_tick(value));
        return;
    }
    if let Some(n) = numbered(key, "per_pixel_") {
        code.per_pixel.insert(n, strip_tick(value));
        return;
    }
    if let Some(n) = numbered(key, "warp_") {
        code.warp.insert(n, strip_tick(value));
        return;
    }
    if let Some(n) = numbered(key, "comp_") {
        code.comp.insert(n, strip_tick(value));
        return;
    }
    if let Some((idx, rest)) = indexed(key, "wavecode_") {
        if idx < MAX_CUSTOM_WAVES {
            state.waves[idx].apply_param(rest, value);
        }
        return;
    }
    if let Some((idx, rest)) = indexed(key, "shapecode_") {
        if idx < MAX_CUSTOM_SHAPES {
            state.shapes[idx].apply_param(rest, value);
        }
        return;
    }
    if let Some((idx, rest)) = indexed(key, "wave_") {
        if idx < MAX_CUSTOM_WAVES {
            if let Some(n) = numbered(rest, "init_") {
                code.wave_init[idx].insert(n, strip_tick(value));
            } else if let Some(n) = numbered(rest, "per_frame_") {
                code.wave_frame[idx].insert(n, strip_tick(value));
            } else if let Some(n) = numbered(rest, "per_point_") {
                code.wave_point[idx].insert(n, strip_tick(value));
            }
            return;
        }
        // Not a wave index ("wave_r" and friends fall through to the knobs).
    }
    if let Some((idx, rest)) = indexed(key, "shape_") {
        if idx < MAX_CUSTOM_SHAPES {
            if let Some(n) = numbered(rest, "init_") {
                code.shape_init[idx].insert(n, strip_tick(value));
            } else if let Some(n) = numbered(rest, "per_frame_") {
                code.shape_frame[idx].insert(n, strip_tick(value));
            }
            return;
        }
    }

    if let Some(param) = state.params.get_mut(key) {
        param.set(parse_float(value));
        return;
    }

    match key {
        VERSION_KEY => state.preset_version = parse_int(value).max(0) as u32,
        "PSVERSION" => state.ps_version = parse_int(value).max(0) as u32,
        "PSVERSION_WARP" => state.ps_version_warp = parse_int(value).max(0) as u32,
        "PSVERSION_COMP" => state.ps_version_comp = parse_int(value).max(0) as u32,
        "fRating" => state.rating = parse_float(value).clamp(0.0, 5.0),
        "nWaveMode" => state.wave_mode = parse_int(value).max(0) as u32,
        "nVideoEchoOrientation" => state.echo_orient = parse_int(value).max(0) as u32,
        "bAdditiveWaves" => state.additive_waves = parse_bool(value),
        "bWaveDots" => state.wave_dots = parse_bool(value),
        "bWaveThick" => state.wave_thick = parse_bool(value),
        "bModWaveAlphaByVolume" => state.mod_wave_alpha_by_volume = parse_bool(value),
        "bMaximizeWaveColor" => state.maximize_wave_color = parse_bool(value),
        "bTexWrap" => state.tex_wrap = parse_bool(value),
        "bDarkenCenter" => state.darken_center = parse_bool(value),
        "bRedBlueStereo" => state.red_blue_stereo = parse_bool(value),
        "bBrighten" => state.brighten = parse_bool(value),
        "bDarken" => state.darken = parse_bool(value),
        "bSolarize" => state.solarize = parse_bool(value),
        "bInvert" => state.invert = parse_bool(value),
        _ => {}
    }
}

pub(crate) fn export(state: &PresetState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{VERSION_KEY}={}", state.preset_version);
    let _ = writeln!(out, "PSVERSION={}", state.ps_version);
    let _ = writeln!(out, "PSVERSION_WARP={}", state.ps_version_warp);
    let _ = writeln!(out, "PSVERSION_COMP={}", state.ps_version_comp);
    out.push_str(SECTION_HEADER);
    out.push('\n');
    let _ = writeln!(out, "fRating={}", state.rating);

    let _ = writeln!(out, "nWaveMode={}", state.wave_mode);
    let _ = writeln!(out, "nVideoEchoOrientation={}", state.echo_orient);
    let _ = writeln!(out, "bAdditiveWaves={}", bool_str(state.additive_waves));
    let _ = writeln!(out, "bWaveDots={}", bool_str(state.wave_dots));
    let _ = writeln!(out, "bWaveThick={}", bool_str(state.wave_thick));
    let _ = writeln!(
        out,
        "bModWaveAlphaByVolume={}",
        bool_str(state.mod_wave_alpha_by_volume)
    );
    let _ = writeln!(
        out,
        "bMaximizeWaveColor={}",
        bool_str(state.maximize_wave_color)
    );
    let _ = writeln!(out, "bTexWrap={}", bool_str(state.tex_wrap));
    let _ = writeln!(out, "bDarkenCenter={}", bool_str(state.darken_center));
    let _ = writeln!(out, "bRedBlueStereo={}", bool_str(state.red_blue_stereo));
    let _ = writeln!(out, "bBrighten={}", bool_str(state.brighten));
    let _ = writeln!(out, "bDarken={}", bool_str(state.darken));
    let _ = writeln!(out, "bSolarize={}", bool_str(state.solarize));
    let _ = writeln!(out, "bInvert={}", bool_str(state.invert));

    for key in crate::PresetParams::KEYS {
        if let Some(param) = state.params.get(key) {
            let _ = writeln!(out, "{key}={}", param.target());
        }
    }

    for (i, wave) in state.waves.iter().enumerate() {
        for (key, value) in wave.export_params() {
            let _ = writeln!(out, "wavecode_{i}_{key}={value}");
        }
    }
    for (i, shape) in state.shapes.iter().enumerate() {
        for (key, value) in shape.export_params() {
            let _ = writeln!(out, "shapecode_{i}_{key}={value}");
        }
    }

    write_code(&mut out, "per_frame_init_", &state.per_frame_init_code, false);
    write_code(&mut out, "per_frame_", &state.per_frame_code, false);
    write_code(&mut out, "per_pixel_", &state.per_pixel_code, false);
    for (i, wave) in state.waves.iter().enumerate() {
        write_code(&mut out, &format!("wave_{i}_init_"), &wave.init_code, false);
        write_code(
            &mut out,
            &format!("wave_{i}_per_frame_"),
            &wave.per_frame_code,
            false,
        );
        write_code(
            &mut out,
            &format!("wave_{i}_per_point_"),
            &wave.per_point_code,
            false,
        );
    }
    for (i, shape) in state.shapes.iter().enumerate() {
        write_code(&mut out, &format!("shape_{i}_init_"), &shape.init_code, false);
        write_code(
            &mut out,
            &format!("shape_{i}_per_frame_"),
            &shape.per_frame_code,
            false,
        );
    }
    write_code(&mut out, "warp_", &state.warp_shader, true);
    write_code(&mut out, "comp_", &state.comp_shader, true);
    out
}

fn write_code(out: &mut String, prefix: &str, code: &str, tick: bool) {
    for (i, line) in code.lines().enumerate() {
        let n = i + 1;
        if tick {
            let _ = writeln!(out, "{prefix}{n}=`{line}");
        } else {
            let _ = writeln!(out, "{prefix}{n}={line}");
        }
    }
}

/// `numbered("per_frame_12", "per_frame_") == Some(12)`.
fn numbered(key: &str, prefix: &str) -> Option<u32> {
    let rest = key.strip_prefix(prefix)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// `indexed("wavecode_2_enabled", "wavecode_") == Some((2, "enabled"))`.
fn indexed<'a>(key: &'a str, prefix: &str) -> Option<(usize, &'a str)> {
    let rest = key.strip_prefix(prefix)?;
    let (digits, tail) = rest.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((digits.parse().ok()?, tail))
}

/// Shader code lines are written with a leading backtick so significant
/// leading whitespace survives ini-style parsers.
fn strip_tick(value: &str) -> String {
    value.strip_prefix('`').unwrap_or(value).to_string()
}

fn join(lines: &BTreeMap<u32, String>) -> String {
    let mut out = String::new();
    for (i, line) in lines.values().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PresetState;

    const SAMPLE: &str = "\
MILKDROP_PRESET_VERSION=201
PSVERSION=2
PSVERSION_WARP=2
PSVERSION_COMP=3
[preset00]
fRating=4.5
fDecay=0.97
zoom=1.012
rot=0.02
nWaveMode=7
bTexWrap=0
wavecode_0_enabled=1
wavecode_0_samples=256
wave_0_init_1=t1 = 0;
wave_0_per_point_1=x = x + 0.01;
per_frame_1=zoom = zoom + 0.01*sin(time);
per_frame_2=rot = rot + 0.002;
per_pixel_1=rot = rot + 0.01*rad;
warp_1=`shader_body
warp_2=`{
warp_3=`  ret = tex2D(sampler_main, uv).xyz;
warp_4=`}
unknown_key=whatever
";

    #[test]
    fn imports_sample() {
        let mut state = PresetState::default();
        state.import_text("sample", SAMPLE).expect("import");
        assert_eq!(state.name, "sample");
        assert_eq!(state.rating, 4.5);
        assert_eq!(state.preset_version, 201);
        assert_eq!(state.ps_version_comp, 3);
        assert_eq!(state.required_ps_version(), 3);
        assert_eq!(state.params.decay.target(), 0.97);
        assert_eq!(state.params.zoom.target(), 1.012);
        assert_eq!(state.wave_mode, 7);
        assert!(!state.tex_wrap);
        assert!(state.waves[0].enabled);
        assert_eq!(state.waves[0].samples, 256);
        assert_eq!(state.waves[0].init_code, "t1 = 0;");
        assert_eq!(state.waves[0].per_point_code, "x = x + 0.01;");
        assert_eq!(
            state.per_frame_code,
            "zoom = zoom + 0.01*sin(time);\nrot = rot + 0.002;"
        );
        assert!(state.warp_shader.starts_with("shader_body"));
        assert!(state.warp_shader.contains("tex2D(sampler_main, uv)"));
    }

    #[test]
    fn missing_section_is_rejected() {
        let mut state = PresetState::default();
        assert!(state.import_text("x", "zoom=1.0\n").is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut state = PresetState::default();
        state
            .import_text("x", "[preset00]\nsome_future_knob=9\nzoom=2\n")
            .expect("import");
        assert_eq!(state.params.zoom.target(), 2.0);
    }

    #[test]
    fn export_import_round_trips() {
        let mut state = PresetState::default();
        state.import_text("sample", SAMPLE).expect("import");
        state.params.cx.set(0.123456789012345);
        state.rating = 2.5;
        state.shapes[1].enabled = true;
        state.shapes[1].init_code = "t1 = rand(5);".to_string();

        let text = state.export_text();
        let mut copy = PresetState::default();
        copy.import_text("sample", &text).expect("reimport");
        assert_eq!(state, copy);
    }

    #[test]
    fn code_lines_reassemble_in_numeric_order() {
        let mut state = PresetState::default();
        state
            .import_text(
                "x",
                "[preset00]\nper_frame_10=c;\nper_frame_2=b;\nper_frame_1=a;\n",
            )
            .expect("import");
        assert_eq!(state.per_frame_code, "a;\nb;\nc;");
    }

    #[test]
    fn wave_knob_names_do_not_shadow_wave_code() {
        let mut state = PresetState::default();
        state
            .import_text("x", "[preset00]\nwave_r=0.25\nwave_0_init_1=t1=1;\n")
            .expect("import");
        assert_eq!(state.params.wave_r.target(), 0.25);
        assert_eq!(state.waves[0].init_code, "t1=1;");
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.milk");
        let mut state = PresetState::default();
        state.import_text("roundtrip", SAMPLE).expect("import");
        state.export(&path).expect("export");

        let mut copy = PresetState::default();
        copy.import(&path).expect("import file");
        assert_eq!(state, copy);
    }
}
