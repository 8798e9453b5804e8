//! Runner settings: YAML schema, validation, and derived values.
//!
//! Settings arrive in three sections. `parallel_config` describes the
//! tensor-parallel split, `model_config` names the model family and
//! execution options, `data_config` sizes the run. [`resolve`] validates
//! the raw settings against `world_size` and derives the data-parallel
//! sizes and the mask capacity.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::RunnerError;
use crate::model::profile::ModelFamily;
use crate::model::quant::QuantMethod;

/// Graph-versus-eager execution switch. Cache compile is only honored
/// under graph execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    Eager,
    GeGraph,
}

impl Default for ExecMode {
    fn default() -> Self {
        ExecMode::Eager
    }
}

impl ExecMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecMode::Eager => "eager",
            ExecMode::GeGraph => "ge_graph",
        }
    }
}

fn default_tp() -> usize {
    1
}

fn default_batch_size() -> usize {
    1
}

fn default_input_max_len() -> usize {
    32
}

fn default_max_new_tokens() -> usize {
    32
}

fn default_seed() -> u64 {
    42
}

/// Tensor-parallel sizes per component.
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_tp")]
    pub attn_tp_size: usize,
    #[serde(default = "default_tp")]
    pub moe_tp_size: usize,
    #[serde(default = "default_tp")]
    pub embed_tp_size: usize,
    /// Defaults to `embed_tp_size` when absent.
    #[serde(default)]
    pub lmhead_tp_size: Option<usize>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            attn_tp_size: 1,
            moe_tp_size: 1,
            embed_tp_size: 1,
            lmhead_tp_size: None,
        }
    }
}

/// Model identity and execution options.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    #[serde(default)]
    pub exe_mode: ExecMode,
    /// Window width for sliding-attention layers. Required for families
    /// whose layout carries a sliding bias entry.
    #[serde(default)]
    pub sliding_window: Option<usize>,
    /// Quantization method name; absent means unquantized.
    #[serde(default)]
    pub quantize: Option<String>,
    #[serde(default)]
    pub enable_cache_compile: bool,
    #[serde(default)]
    pub enable_profiler: bool,
}

/// Run sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_input_max_len")]
    pub input_max_len: usize,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            batch_size: default_batch_size(),
            input_max_len: default_input_max_len(),
            max_new_tokens: default_max_new_tokens(),
            seed: default_seed(),
        }
    }
}

/// Raw settings as they appear in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerSettings {
    #[serde(default)]
    pub parallel_config: ParallelConfig,
    pub model_config: ModelConfig,
    #[serde(default)]
    pub data_config: DataConfig,
}

impl RunnerSettings {
    /// Parse settings from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, RunnerError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a settings file.
    pub fn from_path(path: &Path) -> Result<Self, RunnerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}

/// Settings after validation, with every derived value filled in.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub world_size: usize,
    pub family: ModelFamily,
    pub exe_mode: ExecMode,
    pub sliding_window: Option<usize>,
    pub quant: QuantMethod,
    pub enable_cache_compile: bool,
    pub enable_profiler: bool,
    pub seed: u64,

    pub attn_tp_size: usize,
    pub moe_tp_size: usize,
    pub embed_tp_size: usize,
    pub lmhead_tp_size: usize,
    pub attn_dp_size: usize,
    pub moe_dp_size: usize,
    pub moe_ep_size: usize,
    pub embed_dp_size: usize,

    pub batch_size: usize,
    pub batch_size_per_rank: usize,
    pub input_max_len: usize,
    pub max_new_tokens: usize,
    /// Mask capacity: `input_max_len + max_new_tokens`.
    pub max_position_embeddings: usize,
}

fn require_positive(field: &str, value: usize) -> Result<(), RunnerError> {
    if value == 0 {
        return Err(RunnerError::InvalidSettings(format!(
            "{} ({}) must be greater than 0",
            field, value
        )));
    }
    Ok(())
}

fn require_divisible(
    field: &'static str,
    value: usize,
    by: &'static str,
    divisor: usize,
) -> Result<(), RunnerError> {
    if value % divisor != 0 {
        return Err(RunnerError::NotDivisible {
            field,
            value,
            by,
            divisor,
        });
    }
    Ok(())
}

fn check_parallel_settings(world_size: usize, p: &ParallelConfig) -> Result<(), RunnerError> {
    require_positive("world_size", world_size)?;
    require_positive("attn_tp_size", p.attn_tp_size)?;
    require_positive("moe_tp_size", p.moe_tp_size)?;
    require_positive("embed_tp_size", p.embed_tp_size)?;
    let lmhead = p.lmhead_tp_size.unwrap_or(p.embed_tp_size);
    require_positive("lmhead_tp_size", lmhead)?;

    if p.embed_tp_size < p.attn_tp_size {
        return Err(RunnerError::InvalidSettings(format!(
            "embed_tp_size ({}) must not be smaller than attn_tp_size ({})",
            p.embed_tp_size, p.attn_tp_size
        )));
    }
    require_divisible("embed_tp_size", p.embed_tp_size, "attn_tp_size", p.attn_tp_size)?;

    if !(p.attn_tp_size == p.embed_tp_size && p.embed_tp_size == lmhead) {
        return Err(RunnerError::InvalidSettings(format!(
            "attn_tp_size ({}) must equal embed_tp_size ({}) and lmhead_tp_size ({})",
            p.attn_tp_size, p.embed_tp_size, lmhead
        )));
    }

    require_divisible("world_size", world_size, "attn_tp_size", p.attn_tp_size)?;
    require_divisible("world_size", world_size, "moe_tp_size", p.moe_tp_size)?;
    require_divisible("world_size", world_size, "embed_tp_size", p.embed_tp_size)?;
    require_divisible("world_size", world_size, "lmhead_tp_size", lmhead)?;
    Ok(())
}

fn check_model_settings(m: &ModelConfig) -> Result<ModelFamily, RunnerError> {
    let family = ModelFamily::from_name(&m.model_name)?;
    QuantMethod::from_name(m.quantize.as_deref())?;

    if let Some(window) = m.sliding_window {
        require_positive("sliding_window", window)?;
    }
    if family == ModelFamily::GptOss && m.sliding_window.is_none() {
        return Err(RunnerError::InvalidSettings(
            "model_config.sliding_window is required for gpt_oss".to_string(),
        ));
    }

    if m.exe_mode == ExecMode::Eager && m.enable_cache_compile {
        info!("eager mode does not support cache compile, the flag is ignored");
    }
    Ok(family)
}

fn check_data_settings(d: &DataConfig) -> Result<(), RunnerError> {
    require_positive("batch_size", d.batch_size)?;
    require_positive("input_max_len", d.input_max_len)?;
    // max_new_tokens of 0 is allowed; the loop exits before any step.
    Ok(())
}

/// Validate raw settings against the world size.
pub fn check(world_size: usize, settings: &RunnerSettings) -> Result<(), RunnerError> {
    check_parallel_settings(world_size, &settings.parallel_config)?;
    check_model_settings(&settings.model_config)?;
    check_data_settings(&settings.data_config)?;
    Ok(())
}

/// Validate and derive the full resolved settings.
pub fn resolve(world_size: usize, settings: &RunnerSettings) -> Result<ResolvedSettings, RunnerError> {
    check(world_size, settings)?;

    let p = &settings.parallel_config;
    let lmhead_tp_size = p.lmhead_tp_size.unwrap_or(p.embed_tp_size);
    let attn_dp_size = world_size / p.attn_tp_size;
    let moe_dp_size = world_size / p.moe_tp_size;
    let moe_ep_size = moe_dp_size;
    let embed_dp_size = world_size / p.embed_tp_size;

    let d = &settings.data_config;
    if d.batch_size % attn_dp_size != 0 {
        return Err(RunnerError::NotDivisible {
            field: "batch_size",
            value: d.batch_size,
            by: "attn_dp_size",
            divisor: attn_dp_size,
        });
    }
    let batch_size_per_rank = d.batch_size / attn_dp_size;
    let max_position_embeddings = d.input_max_len + d.max_new_tokens;

    let m = &settings.model_config;
    let resolved = ResolvedSettings {
        world_size,
        family: ModelFamily::from_name(&m.model_name)?,
        exe_mode: m.exe_mode,
        sliding_window: m.sliding_window,
        quant: QuantMethod::from_name(m.quantize.as_deref())?,
        enable_cache_compile: m.enable_cache_compile,
        enable_profiler: m.enable_profiler,
        seed: d.seed,
        attn_tp_size: p.attn_tp_size,
        moe_tp_size: p.moe_tp_size,
        embed_tp_size: p.embed_tp_size,
        lmhead_tp_size,
        attn_dp_size,
        moe_dp_size,
        moe_ep_size,
        embed_dp_size,
        batch_size: d.batch_size,
        batch_size_per_rank,
        input_max_len: d.input_max_len,
        max_new_tokens: d.max_new_tokens,
        max_position_embeddings,
    };

    info!(
        family = resolved.family.name(),
        exe_mode = resolved.exe_mode.name(),
        world_size = resolved.world_size,
        attn_tp_size = resolved.attn_tp_size,
        moe_tp_size = resolved.moe_tp_size,
        embed_tp_size = resolved.embed_tp_size,
        lmhead_tp_size = resolved.lmhead_tp_size,
        attn_dp_size = resolved.attn_dp_size,
        moe_dp_size = resolved.moe_dp_size,
        moe_ep_size = resolved.moe_ep_size,
        batch_size = resolved.batch_size,
        batch_size_per_rank = resolved.batch_size_per_rank,
        input_max_len = resolved.input_max_len,
        max_new_tokens = resolved.max_new_tokens,
        max_position_embeddings = resolved.max_position_embeddings,
        quant = resolved.quant.name(),
        "runner settings resolved"
    );
    Ok(resolved)
}
