//! Custom waves and custom shapes.
//!
//! A preset carries up to four of each; every instance owns its expression
//! code sections (evaluated in their own VM contexts by the orchestrator) and
//! a handful of numeric knobs.

pub const MAX_CUSTOM_WAVES: usize = 4;
pub const MAX_CUSTOM_SHAPES: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct CustomWave {
    pub enabled: bool,
    pub samples: u32,
    pub sep: u32,
    pub spectrum: bool,
    pub use_dots: bool,
    pub draw_thick: bool,
    pub additive: bool,
    pub scaling: f64,
    pub smoothing: f64,
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
    pub init_code: String,
    pub per_frame_code: String,
    pub per_point_code: String,
}

impl Default for CustomWave {
    fn default() -> Self {
        Self {
            enabled: false,
            samples: 512,
            sep: 0,
            spectrum: false,
            use_dots: false,
            draw_thick: false,
            additive: false,
            scaling: 1.0,
            smoothing: 0.5,
            r: 1.0,
            g: 1.0,
            b: 1.0,
            a: 1.0,
            init_code: String::new(),
            per_frame_code: String::new(),
            per_point_code: String::new(),
        }
    }
}

impl CustomWave {
    /// Applies one `wavecode_N_<key>` parameter. Returns false for keys this
    /// wave does not recognize.
    pub fn apply_param(&mut self, key: &str, raw: &str) -> bool {
        match key {
            "enabled" => self.enabled = parse_bool(raw),
            "samples" => self.samples = parse_int(raw).clamp(2, 512) as u32,
            "sep" => self.sep = parse_int(raw).max(0) as u32,
            "bSpectrum" => self.spectrum = parse_bool(raw),
            "bUseDots" => self.use_dots = parse_bool(raw),
            "bDrawThick" => self.draw_thick = parse_bool(raw),
            "bAdditive" => self.additive = parse_bool(raw),
            "scaling" => self.scaling = parse_float(raw),
            "smoothing" => self.smoothing = parse_float(raw),
            "r" => self.r = parse_float(raw),
            "g" => self.g = parse_float(raw),
            "b" => self.b = parse_float(raw),
            "a" => self.a = parse_float(raw),
            _ => return false,
        }
        true
    }

    /// Parameter lines in export order, without the `wavecode_N_` prefix.
    pub fn export_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("enabled", bool_str(self.enabled)),
            ("samples", self.samples.to_string()),
            ("sep", self.sep.to_string()),
            ("bSpectrum", bool_str(self.spectrum)),
            ("bUseDots", bool_str(self.use_dots)),
            ("bDrawThick", bool_str(self.draw_thick)),
            ("bAdditive", bool_str(self.additive)),
            ("scaling", self.scaling.to_string()),
            ("smoothing", self.smoothing.to_string()),
            ("r", self.r.to_string()),
            ("g", self.g.to_string()),
            ("b", self.b.to_string()),
            ("a", self.a.to_string()),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomShape {
    pub enabled: bool,
    pub sides: u32,
    pub additive: bool,
    pub thick: bool,
    pub textured: bool,
    pub x: f64,
    pub y: f64,
    pub rad: f64,
    pub ang: f64,
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
    pub r2: f64,
    pub g2: f64,
    pub b2: f64,
    pub a2: f64,
    pub border_r: f64,
    pub border_g: f64,
    pub border_b: f64,
    pub border_a: f64,
    pub init_code: String,
    pub per_frame_code: String,
}

impl Default for CustomShape {
    fn default() -> Self {
        Self {
            enabled: false,
            sides: 4,
            additive: false,
            thick: false,
            textured: false,
            x: 0.5,
            y: 0.5,
            rad: 0.1,
            ang: 0.0,
            r: 1.0,
            g: 0.0,
            b: 0.0,
            a: 1.0,
            r2: 0.0,
            g2: 1.0,
            b2: 0.0,
            a2: 0.0,
            border_r: 1.0,
            border_g: 1.0,
            border_b: 1.0,
            border_a: 0.1,
            init_code: String::new(),
            per_frame_code: String::new(),
        }
    }
}

impl CustomShape {
    pub fn apply_param(&mut self, key: &str, raw: &str) -> bool {
        match key {
            "enabled" => self.enabled = parse_bool(raw),
            "sides" => self.sides = parse_int(raw).clamp(3, 100) as u32,
            "additive" => self.additive = parse_bool(raw),
            "thickOutline" => self.thick = parse_bool(raw),
            "textured" => self.textured = parse_bool(raw),
            "x" => self.x = parse_float(raw),
            "y" => self.y = parse_float(raw),
            "rad" => self.rad = parse_float(raw),
            "ang" => self.ang = parse_float(raw),
            "r" => self.r = parse_float(raw),
            "g" => self.g = parse_float(raw),
            "b" => self.b = parse_float(raw),
            "a" => self.a = parse_float(raw),
            "r2" => self.r2 = parse_float(raw),
            "g2" => self.g2 = parse_float(raw),
            "b2" => self.b2 = parse_float(raw),
            "a2" => self.a2 = parse_float(raw),
            "border_r" => self.border_r = parse_float(raw),
            "border_g" => self.border_g = parse_float(raw),
            "border_b" => self.border_b = parse_float(raw),
            "border_a" => self.border_a = parse_float(raw),
            _ => return false,
        }
        true
    }

    pub fn export_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("enabled", bool_str(self.enabled)),
            ("sides", self.sides.to_string()),
            ("additive", bool_str(self.additive)),
            ("thickOutline", bool_str(self.thick)),
            ("textured", bool_str(self.textured)),
            ("x", self.x.to_string()),
            ("y", self.y.to_string()),
            ("rad", self.rad.to_string()),
            ("ang", self.ang.to_string()),
            ("r", self.r.to_string()),
            ("g", self.g.to_string()),
            ("b", self.b.to_string()),
            ("a", self.a.to_string()),
            ("r2", self.r2.to_string()),
            ("g2", self.g2.to_string()),
            ("b2", self.b2.to_string()),
            ("a2", self.a2.to_string()),
            ("border_r", self.border_r.to_string()),
            ("border_g", self.border_g.to_string()),
            ("border_b", self.border_b.to_string()),
            ("border_a", self.border_a.to_string()),
        ]
    }
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    parse_int(raw) != 0
}

pub(crate) fn parse_int(raw: &str) -> i64 {
    raw.trim().parse::<f64>().map(|v| v as i64).unwrap_or(0)
}

pub(crate) fn parse_float(raw: &str) -> f64 {
    raw.trim().parse().unwrap_or(0.0)
}

pub(crate) fn bool_str(v: bool) -> String {
    if v { "1" } else { "0" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_params_round_trip() {
        let mut wave = CustomWave::default();
        assert!(wave.apply_param("enabled", "1"));
        assert!(wave.apply_param("samples", "128"));
        assert!(wave.apply_param("scaling", "2.25"));
        assert!(!wave.apply_param("nope", "1"));

        let mut copy = CustomWave::default();
        for (key, value) in wave.export_params() {
            assert!(copy.apply_param(key, &value));
        }
        assert_eq!(wave, copy);
    }

    #[test]
    fn shape_sides_clamp() {
        let mut shape = CustomShape::default();
        shape.apply_param("sides", "1");
        assert_eq!(shape.sides, 3);
        shape.apply_param("sides", "5000");
        assert_eq!(shape.sides, 100);
    }

    #[test]
    fn malformed_numbers_fall_back_to_zero() {
        let mut wave = CustomWave::default();
        wave.apply_param("scaling", "banana");
        assert_eq!(wave.scaling, 0.0);
    }
}
