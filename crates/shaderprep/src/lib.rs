//! Preset shader pipeline: preprocessing, tiered compilation, parameter
//! discovery, and binding resolution against the texture cache.

mod binding;
mod compile;
mod preprocess;
mod resolve;

pub use binding::{
    discover, BindingKind, ParamTable, RandFrameCache, SamplerBinding, SamplerFilter, SamplerWrap,
};
pub use compile::{
    compile_fallback, compile_stage, CompileBackend, CompileError, CompiledShader, ShaderModel,
    FALLBACK_COMP_BODY, FALLBACK_WARP_BODY,
};
pub use preprocess::{assemble, strip_comments, StageKind};
pub use resolve::{resolve_bindings, StageTextures};
