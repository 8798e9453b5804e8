//! Per-family orchestration parameters.
//!
//! The runner drives every model through the same loop; what differs per
//! family is how attention visibility is communicated and how position
//! counters advance. A [`ModelProfile`] captures both.

use crate::error::RunnerError;

/// Model families this runner knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    GptOss,
    Qwen3Moe,
}

impl ModelFamily {
    /// Parse the `model_config.model_name` settings value.
    pub fn from_name(name: &str) -> Result<Self, RunnerError> {
        match name {
            "gpt_oss" => Ok(ModelFamily::GptOss),
            "qwen3_moe" => Ok(ModelFamily::Qwen3Moe),
            other => Err(RunnerError::InvalidSettings(format!(
                "unknown model_name '{}'. Options: gpt_oss, qwen3_moe",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelFamily::GptOss => "gpt_oss",
            ModelFamily::Qwen3Moe => "qwen3_moe",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How attention visibility reaches the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionLayout {
    /// Additive bias matrices on every step, keyed by attention kind.
    /// Layers with a window look up the sliding entry.
    DenseBias { sliding_window: Option<usize> },
    /// Boolean causal matrix on prefill, one visibility row per decode
    /// step.
    RowVisibility,
}

/// How per-row position counters advance after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionPolicy {
    /// Each row advances to one past the largest position index it was
    /// given this step.
    RowMax,
    /// Every row advances uniformly with the shared visibility cursor.
    Lockstep,
}

/// Orchestration profile derived from the model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelProfile {
    pub family: ModelFamily,
    pub attention: AttentionLayout,
    pub positions: PositionPolicy,
}

impl ModelProfile {
    pub fn new(family: ModelFamily, sliding_window: Option<usize>) -> Self {
        match family {
            ModelFamily::GptOss => ModelProfile {
                family,
                attention: AttentionLayout::DenseBias { sliding_window },
                positions: PositionPolicy::RowMax,
            },
            ModelFamily::Qwen3Moe => ModelProfile {
                family,
                attention: AttentionLayout::RowVisibility,
                positions: PositionPolicy::Lockstep,
            },
        }
    }

    /// Window for the sliding bias entry, when the layout carries one.
    pub fn bias_window(&self) -> Option<usize> {
        match self.attention {
            AttentionLayout::DenseBias { sliding_window } => sliding_window,
            AttentionLayout::RowVisibility => None,
        }
    }
}
