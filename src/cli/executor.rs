//! Step executor selection from the CLI --executor flag.

use crate::error::RunnerError;
use crate::model::host::HostModel;
use crate::model::profile::ModelProfile;
use crate::model::StepModel;
use crate::settings::ResolvedSettings;

/// Hidden width of the host reference executor. A multiple of the 4-bit
/// group size, so every quantize method is accepted.
pub const HOST_HIDDEN: usize = 64;

/// Resolve a step executor from the --executor CLI flag.
///
/// Accepted values: "host" (default).
pub fn resolve_executor(
    name: &str,
    settings: &ResolvedSettings,
    vocab_size: usize,
) -> Result<Box<dyn StepModel>, RunnerError> {
    match name {
        "host" => {
            let profile = ModelProfile::new(settings.family, settings.sliding_window);
            let model = HostModel::new(
                profile.attention,
                vocab_size,
                HOST_HIDDEN,
                settings.max_position_embeddings,
                settings.seed,
                settings.quant,
            )?;
            Ok(Box::new(model))
        }
        other => Err(RunnerError::Executor(format!(
            "Unknown executor '{}'. Options: host",
            other
        ))),
    }
}
