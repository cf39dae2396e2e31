//! Turns the shader text stored in a preset into a complete GLSL fragment
//! shader.
//!
//! Preset authors write only a `shader_body { ... }` block against implicit
//! inputs (`uv`, `rad`, ...) and an implicit output accumulator `ret`. We
//! splice that block into a fixed prelude/epilogue pair, alias the implicit
//! inputs to our varyings with `#define`s, and strip comments so the
//! downstream GLSL frontend sees one self-contained translation unit.

use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::binding::{discover, ParamTable};
use crate::CompileError;

/// Which of the two programmable preset stages a shader body belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageKind {
    Warp,
    Composite,
}

impl StageKind {
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Warp => "warp",
            StageKind::Composite => "composite",
        }
    }
}

/// Shared declarations prepended to every preset shader. Comment-stripped
/// once and cached; the per-compile pass never re-strips it.
fn shared_include() -> &'static str {
    static STRIPPED: OnceLock<String> = OnceLock::new();
    STRIPPED.get_or_init(|| strip_comments(SHARED_INCLUDE))
}

/// Assembles a preset shader body into a compilable GLSL fragment shader.
///
/// The `shader_body` token becomes a synthesized function, a prologue
/// declares the `ret` accumulator, and an epilogue inside the real `main`
/// writes it to the fragment output.
pub fn assemble(stage: StageKind, body: &str) -> Result<String, CompileError> {
    let rewritten = synthesize_entry(body)?;
    let stripped = strip_comments(&rewritten);
    let decls = resource_declarations(&discover(body));
    let mut out = String::with_capacity(
        shared_include().len()
            + STAGE_DEFINES_COMMON.len()
            + decls.len()
            + stripped.len()
            + FOOTER.len()
            + 64,
    );
    out.push_str(HEADER);
    out.push_str(shared_include());
    out.push_str(STAGE_DEFINES_COMMON);
    if stage == StageKind::Composite {
        out.push_str(STAGE_DEFINES_COMPOSITE);
    }
    out.push_str(&decls);
    out.push_str("#line 1\n");
    out.push_str(&stripped);
    out.push_str(FOOTER);
    Ok(out)
}

/// Declares the shader's samplers and `texsize_*` constants.
///
/// Each discovered sampler becomes a split texture/sampler pair in bind
/// group 1, two bindings per sampler in table order, with a macro mapping
/// the preset-visible name onto the combined constructor. The renderer
/// builds its bind group from the same table in the same order. Declaring
/// combined `sampler2D` globals directly does not survive the naga GLSL
/// frontend, so the split form is required.
fn resource_declarations(table: &ParamTable) -> String {
    let mut out = String::new();
    for (i, sampler) in table.samplers.iter().enumerate() {
        let tex_binding = 2 * i;
        let smp_binding = 2 * i + 1;
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {tex_binding}) uniform texture2D _milk_tex{i};"
        );
        let _ = writeln!(
            out,
            "layout(set = 1, binding = {smp_binding}) uniform sampler _milk_smp{i};"
        );
        let _ = writeln!(
            out,
            "#define {} sampler2D(_milk_tex{i}, _milk_smp{i})",
            sampler.decl_name
        );
    }
    if !table.texsizes.is_empty() {
        out.push_str("layout(std140, set = 0, binding = 1) uniform MilkTexSizes {\n");
        for name in &table.texsizes {
            let _ = writeln!(out, "    vec4 ts_{name};");
        }
        out.push_str("} _milk_ts;\n");
        for name in &table.texsizes {
            let _ = writeln!(out, "#define texsize_{name} (_milk_ts.ts_{name})");
        }
    }
    out
}

/// Replaces the `shader_body` token with a function signature and injects
/// the accumulator prologue just inside its opening brace.
fn synthesize_entry(body: &str) -> Result<String, CompileError> {
    let Some(token_at) = find_token(body, "shader_body") else {
        return Err(CompileError::NoShaderBody);
    };
    let after_token = token_at + "shader_body".len();
    let Some(brace_rel) = body[after_token..].find('{') else {
        return Err(CompileError::NoShaderBody);
    };
    let brace_at = after_token + brace_rel;

    let mut out = String::with_capacity(body.len() + 96);
    out.push_str(&body[..token_at]);
    out.push_str("void milk_shader_body()");
    out.push_str(&body[after_token..=brace_at]);
    out.push_str("\n    ret = vec3(0.0);\n");
    out.push_str(&body[brace_at + 1..]);
    Ok(out)
}

/// Finds `token` at a position where it is not part of a longer identifier.
fn find_token(text: &str, token: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(rel) = text[from..].find(token) {
        let at = from + rel;
        let before_ok = at == 0 || !is_ident_byte(bytes[at - 1]);
        let end = at + token.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        if before_ok && after_ok {
            return Some(at);
        }
        from = at + token.len();
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Removes `/* */` and `//` comments. Newlines inside block comments are
/// kept so `#line` directives and error positions stay meaningful.
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    // Literal text is copied as whole slices between comment markers, which
    // keeps multi-byte characters intact.
    let mut copied = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'/' => {
                    out.push_str(&text[copied..i]);
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    copied = i;
                    continue;
                }
                b'*' => {
                    out.push_str(&text[copied..i]);
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        if bytes[i] == b'\n' {
                            out.push('\n');
                        }
                        i += 1;
                    }
                    i = (i + 2).min(bytes.len());
                    out.push(' ');
                    copied = i;
                    continue;
                }
                _ => {}
            }
        }
        i += 1;
    }
    out.push_str(&text[copied..]);
    out
}

const HEADER: &str = r"#version 450
layout(location = 0) in vec4 _milk_uv;
layout(location = 1) in vec4 _milk_rad_ang;
layout(location = 2) in vec4 _milk_diffuse;
layout(location = 0) out vec4 _milk_out;
";

/// Helper declarations available to every preset shader. The `tex2D`/`tex3D`
/// names mirror what preset authors write.
const SHARED_INCLUDE: &str = r"
// Uniform block shared by warp and composite stages.
layout(std140, set = 0, binding = 0) uniform MilkStageUniforms {
    vec4 rand_preset;  // 4 random values, held constant per preset
    vec4 rand_frame;   // 4 random values, refreshed per frame
    vec4 _c0;          // time, fps, frame, progress
    vec4 _c1;          // bass, mid, treb, vol
    vec4 _c2;          // bass_att, mid_att, treb_att, vol_att
    vec4 _c3;          // blur min/max scale+bias packing
    vec4 _c4;          // aspect.xy, 1/aspect.xy
    vec4 roam_cos;
    vec4 roam_sin;
    vec4 slow_roam_cos;
    vec4 slow_roam_sin;
} milk;

#define time     (milk._c0.x)
#define fps      (milk._c0.y)
#define frame    (milk._c0.z)
#define progress (milk._c0.w)
#define bass     (milk._c1.x)
#define mid      (milk._c1.y)
#define treb     (milk._c1.z)
#define vol      (milk._c1.w)
#define bass_att (milk._c2.x)
#define mid_att  (milk._c2.y)
#define treb_att (milk._c2.z)
#define vol_att  (milk._c2.w)
#define aspect   (milk._c4)

#define tex2D(s, p) texture(s, p)
#define tex3D(s, p) texture(s, p)
#define lerp(a, b, t) mix(a, b, t)
#define frac(v) fract(v)
#define saturate(v) clamp(v, 0.0, 1.0)
#define atan2(y, x) atan(y, x)

// Accumulator the preset body writes its final color into.
vec3 ret;
";

const STAGE_DEFINES_COMMON: &str = r"
#define uv (_milk_uv.xy)
#define uv_orig (_milk_uv.zw)
#define rad (_milk_rad_ang.x)
#define ang (_milk_rad_ang.y)
";

const STAGE_DEFINES_COMPOSITE: &str = r"
#define hue_shader (_milk_diffuse.xyz)
";

const FOOTER: &str = r"
void main() {
    milk_shader_body();
    _milk_out = vec4(ret, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r"shader_body
{
    ret = tex2D(sampler_main, uv).xyz; // feedback
}
";

    #[test]
    fn synthesizes_entry_and_accumulator() {
        let out = assemble(StageKind::Warp, BODY).expect("assemble");
        assert!(out.contains("void milk_shader_body()"));
        assert!(out.contains("ret = vec3(0.0);"));
        assert!(out.contains("_milk_out = vec4(ret, 1.0);"));
        assert!(!out.contains("shader_body\n"));
        assert!(!out.contains("// feedback"));
    }

    #[test]
    fn composite_gets_hue_alias_warp_does_not() {
        let warp = assemble(StageKind::Warp, BODY).expect("warp");
        let comp = assemble(StageKind::Composite, BODY).expect("comp");
        assert!(!warp.contains("hue_shader"));
        assert!(comp.contains("#define hue_shader"));
        for out in [&warp, &comp] {
            assert!(out.contains("#define uv "));
            assert!(out.contains("#define uv_orig"));
            assert!(out.contains("#define rad"));
            assert!(out.contains("#define ang"));
        }
    }

    #[test]
    fn missing_body_token_is_an_error() {
        assert!(matches!(
            assemble(StageKind::Warp, "void main() {}"),
            Err(CompileError::NoShaderBody)
        ));
    }

    #[test]
    fn body_token_must_stand_alone() {
        // "my_shader_body" is a different identifier.
        assert!(matches!(
            assemble(StageKind::Warp, "my_shader_body { }"),
            Err(CompileError::NoShaderBody)
        ));
    }

    #[test]
    fn helper_code_before_the_body_survives() {
        let body = r"
float bright(vec3 c) { return dot(c, vec3(0.3, 0.6, 0.1)); }
shader_body
{
    ret = vec3(bright(tex2D(sampler_main, uv).xyz));
}
";
        let out = assemble(StageKind::Warp, body).expect("assemble");
        let helper = out.find("float bright").expect("helper kept");
        let entry = out.find("void milk_shader_body").expect("entry");
        assert!(helper < entry);
    }

    #[test]
    fn samplers_are_declared_split_with_macros() {
        let body = r"shader_body
{
    ret = tex2D(sampler_main, uv).xyz + tex2D(sampler_blur1, uv).xyz * texsize_rand07.z;
}
";
        let out = assemble(StageKind::Warp, body).expect("assemble");
        assert!(out.contains("uniform texture2D _milk_tex0;"));
        assert!(out.contains("uniform sampler _milk_smp0;"));
        assert!(out.contains("#define sampler_main sampler2D(_milk_tex0, _milk_smp0)"));
        assert!(out.contains("#define sampler_blur1 sampler2D(_milk_tex1, _milk_smp1)"));
        assert!(out.contains("vec4 ts_rand07;"));
        assert!(out.contains("#define texsize_rand07 (_milk_ts.ts_rand07)"));
    }

    #[test]
    fn no_texsize_block_without_texsize_uses() {
        let out = assemble(StageKind::Warp, BODY).expect("assemble");
        assert!(!out.contains("MilkTexSizes"));
    }

    #[test]
    fn strip_comments_handles_both_styles() {
        let src = "a // line\nb/* block\nstill block */c";
        let stripped = strip_comments(src);
        // Block comments leave one space so adjacent tokens stay separate.
        assert_eq!(stripped, "a \nb\n c");
    }

    #[test]
    fn strip_comments_preserves_multibyte_text() {
        assert_eq!(
            strip_comments("ret = vec3(0.5); // größe\nx = 1; /* © */ y = 2;"),
            "ret = vec3(0.5); \nx = 1;   y = 2;"
        );
    }

    #[test]
    fn strip_comments_keeps_division() {
        assert_eq!(strip_comments("x = a / b;"), "x = a / b;");
    }

    #[test]
    fn shared_include_is_comment_free() {
        assert!(!shared_include().contains("//"));
    }
}
