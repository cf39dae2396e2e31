//! Shader compilation with model tiers and fallback.
//!
//! The actual GLSL frontend lives behind [`CompileBackend`] so the loader
//! state machine and these policies are testable without a GPU device. The
//! renderer supplies a backend that feeds `wgpu`'s naga GLSL path.

use crate::binding::{discover, ParamTable};
use crate::preprocess::{assemble, StageKind};

/// Pixel-shader capability tiers, lowest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShaderModel {
    Ps2,
    Ps3,
    Ps4,
}

impl ShaderModel {
    pub fn from_ps_version(version: u32) -> Self {
        match version {
            0..=2 => ShaderModel::Ps2,
            3 => ShaderModel::Ps3,
            _ => ShaderModel::Ps4,
        }
    }

    pub fn next_tier(self) -> Option<Self> {
        match self {
            ShaderModel::Ps2 => Some(ShaderModel::Ps3),
            ShaderModel::Ps3 => Some(ShaderModel::Ps4),
            ShaderModel::Ps4 => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ShaderModel::Ps2 => "ps_2_0",
            ShaderModel::Ps3 => "ps_3_0",
            ShaderModel::Ps4 => "ps_4_0",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("shader has no shader_body block")]
    NoShaderBody,
    #[error("{stage} shader failed to compile for {model}: {message}")]
    Backend {
        stage: &'static str,
        model: &'static str,
        message: String,
    },
}

/// The device-facing half of compilation. `compile` receives fully
/// preprocessed GLSL.
pub trait CompileBackend {
    type Shader;

    fn compile(
        &mut self,
        label: &str,
        source: &str,
        model: ShaderModel,
    ) -> Result<Self::Shader, String>;
}

/// A compiled preset shader plus the parameter table discovered from its
/// source.
#[derive(Debug)]
pub struct CompiledShader<S> {
    pub shader: S,
    pub params: ParamTable,
    pub model: ShaderModel,
}

/// Preprocesses and compiles one preset shader stage.
///
/// When the requested model is the lowest tier and compilation fails,
/// exactly one retry is made against the next tier before giving up.
pub fn compile_stage<B: CompileBackend>(
    backend: &mut B,
    stage: StageKind,
    body: &str,
    model: ShaderModel,
) -> Result<CompiledShader<B::Shader>, CompileError> {
    let source = assemble(stage, body)?;
    let params = discover(body);

    match backend.compile(stage.label(), &source, model) {
        Ok(shader) => Ok(CompiledShader {
            shader,
            params,
            model,
        }),
        Err(first_message) => {
            let retry = (model == ShaderModel::Ps2)
                .then(|| model.next_tier())
                .flatten();
            if let Some(higher) = retry {
                tracing::warn!(
                    stage = stage.label(),
                    model = model.label(),
                    error = %first_message,
                    "shader compile failed, retrying at higher tier"
                );
                if let Ok(shader) = backend.compile(stage.label(), &source, higher) {
                    return Ok(CompiledShader {
                        shader,
                        params,
                        model: higher,
                    });
                }
            }
            Err(CompileError::Backend {
                stage: stage.label(),
                model: model.label(),
                message: first_message,
            })
        }
    }
}

/// Compiles the statically-held fallback shader for a stage. Built once at
/// startup; substituted whenever a preset shader fails so every frame has
/// something renderable.
pub fn compile_fallback<B: CompileBackend>(
    backend: &mut B,
    stage: StageKind,
) -> Result<CompiledShader<B::Shader>, CompileError> {
    let body = match stage {
        StageKind::Warp => FALLBACK_WARP_BODY,
        StageKind::Composite => FALLBACK_COMP_BODY,
    };
    compile_stage(backend, stage, body, ShaderModel::Ps2)
}

pub const FALLBACK_WARP_BODY: &str = r"shader_body
{
    ret = tex2D(sampler_main, uv).xyz;
}
";

pub const FALLBACK_COMP_BODY: &str = r"shader_body
{
    ret = tex2D(sampler_main, uv).xyz * hue_shader;
}
";

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every (label, model) request; fails the first `fail_first`
    /// calls.
    struct StubBackend {
        calls: Vec<(String, ShaderModel)>,
        fail_first: usize,
    }

    impl StubBackend {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: Vec::new(),
                fail_first,
            }
        }
    }

    impl CompileBackend for StubBackend {
        type Shader = u32;

        fn compile(
            &mut self,
            label: &str,
            _source: &str,
            model: ShaderModel,
        ) -> Result<u32, String> {
            self.calls.push((label.to_string(), model));
            if self.calls.len() <= self.fail_first {
                Err("syntax error".to_string())
            } else {
                Ok(self.calls.len() as u32)
            }
        }
    }

    const BODY: &str = "shader_body { ret = tex2D(sampler_main, uv).xyz; }";

    #[test]
    fn success_compiles_once() {
        let mut backend = StubBackend::new(0);
        let out = compile_stage(&mut backend, StageKind::Warp, BODY, ShaderModel::Ps2)
            .expect("compile");
        assert_eq!(backend.calls.len(), 1);
        assert_eq!(out.model, ShaderModel::Ps2);
        assert_eq!(out.params.samplers.len(), 1);
    }

    #[test]
    fn lowest_tier_retries_exactly_once() {
        let mut backend = StubBackend::new(1);
        let out = compile_stage(&mut backend, StageKind::Warp, BODY, ShaderModel::Ps2)
            .expect("retry succeeds");
        assert_eq!(
            backend.calls,
            vec![
                ("warp".to_string(), ShaderModel::Ps2),
                ("warp".to_string(), ShaderModel::Ps3),
            ]
        );
        assert_eq!(out.model, ShaderModel::Ps3);
    }

    #[test]
    fn higher_tiers_do_not_retry() {
        let mut backend = StubBackend::new(10);
        let err = compile_stage(&mut backend, StageKind::Composite, BODY, ShaderModel::Ps3)
            .expect_err("should fail");
        assert_eq!(backend.calls.len(), 1);
        assert!(matches!(err, CompileError::Backend { stage: "composite", .. }));
    }

    #[test]
    fn retry_failure_reports_original_model() {
        let mut backend = StubBackend::new(10);
        let err = compile_stage(&mut backend, StageKind::Warp, BODY, ShaderModel::Ps2)
            .expect_err("both tiers fail");
        assert_eq!(backend.calls.len(), 2);
        match err {
            CompileError::Backend { model, .. } => assert_eq!(model, "ps_2_0"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn fallback_shaders_compile() {
        let mut backend = StubBackend::new(0);
        let warp = compile_fallback(&mut backend, StageKind::Warp).expect("warp");
        let comp = compile_fallback(&mut backend, StageKind::Composite).expect("comp");
        assert_eq!(warp.params.samplers.len(), 1);
        assert_eq!(comp.params.samplers.len(), 1);
    }

    #[test]
    fn model_tiers_order() {
        assert_eq!(ShaderModel::from_ps_version(2), ShaderModel::Ps2);
        assert_eq!(ShaderModel::from_ps_version(3), ShaderModel::Ps3);
        assert_eq!(ShaderModel::from_ps_version(4), ShaderModel::Ps4);
        assert!(ShaderModel::Ps2 < ShaderModel::Ps3);
        assert_eq!(ShaderModel::Ps4.next_tier(), None);
    }
}
