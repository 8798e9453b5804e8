//! Generation runner: prompts → completions via prefill + decode.
//!
//! [`ModelRunner`] owns the collaborators of one replica (resolved
//! settings, tokenizer, step executor) and drives the policy-checked
//! loop. One `generate` call is one pass; warm-up and measured passes
//! run the same loop and differ only in how the termination counters
//! advance.

use std::time::Instant;

use tracing::{debug, info};

use crate::error::RunnerError;
use crate::model::profile::ModelProfile;
use crate::model::StepModel;
use crate::settings::ResolvedSettings;
use crate::tokenizer::{encode_batch, pad_sequences, Tokenizer};

use super::policy::{PassKind, StopReason, TerminationPolicy};
use super::profiler;
use super::state::{GenerationState, TerminationCounters};
use super::step::{consume_output, prepare_input, CallMasks};

/// Output from one generation pass, including metadata.
#[derive(Debug, Clone)]
pub struct GenerationOutput {
    /// Decoded completion per batch row (not including the prompt).
    pub texts: Vec<String>,
    /// Generated token IDs per batch row (not including the prompt).
    pub token_ids: Vec<Vec<u32>>,
    /// Number of prompt tokens per row after padding.
    pub prompt_tokens: usize,
    /// Steps the loop executed, prefill included.
    pub steps: usize,
    /// Why the pass stopped.
    pub stop_reason: StopReason,
}

/// Drives batched autoregressive generation against a step executor.
pub struct ModelRunner {
    settings: ResolvedSettings,
    profile: ModelProfile,
    tokenizer: Box<dyn Tokenizer>,
    model: Box<dyn StepModel>,
}

impl ModelRunner {
    /// Build a runner from resolved settings and its collaborators.
    pub fn new(
        settings: ResolvedSettings,
        tokenizer: Box<dyn Tokenizer>,
        model: Box<dyn StepModel>,
    ) -> Self {
        let profile = ModelProfile::new(settings.family, settings.sliding_window);
        Self {
            settings,
            profile,
            tokenizer,
            model,
        }
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// Run one generation pass over a prompt batch.
    ///
    /// Steps:
    /// 1. Tokenize and pad the prompt batch
    /// 2. Validate batch shape against the resolved settings
    /// 3. Build the call masks at full mask capacity
    /// 4. Loop: check the termination policy, then prepare, forward,
    ///    consume; the policy check is the only exit
    /// 5. Decode the generated suffix of every row
    pub fn generate(
        &mut self,
        prompts: &[String],
        pass: PassKind,
    ) -> Result<GenerationOutput, RunnerError> {
        if prompts.len() != self.settings.batch_size {
            return Err(RunnerError::Generation(format!(
                "prompt batch ({}) does not match data_config.batch_size ({})",
                prompts.len(),
                self.settings.batch_size
            )));
        }

        let texts: Vec<&str> = prompts.iter().map(String::as_str).collect();
        let rows = encode_batch(self.tokenizer.as_ref(), &texts, true);
        let pad_id = self.tokenizer.pad_token_id().unwrap_or(0);
        let (padded, _attn_masks) = pad_sequences(&rows, pad_id);

        let mut state = GenerationState::new(padded)?;
        let prompt_len = state.prompt_len();
        if prompt_len > self.settings.input_max_len {
            return Err(RunnerError::Generation(format!(
                "prompt length ({}) exceeds data_config.input_max_len ({})",
                prompt_len, self.settings.input_max_len
            )));
        }

        info!(
            pass = %pass,
            batch = state.batch_size(),
            prompt_len,
            max_new_tokens = self.settings.max_new_tokens,
            "starting generation pass"
        );

        let masks = CallMasks::build(&self.profile, self.settings.max_position_embeddings);
        let policy = TerminationPolicy::new(self.settings.max_new_tokens);
        let mut counters = TerminationCounters::default();
        let mut prof = profiler::for_pass(self.settings.enable_profiler, pass);

        let stop_reason = loop {
            if let Some(reason) = policy.stop_reason(&counters, pass) {
                break reason;
            }

            let mut input = prepare_input(&mut state, &masks, &self.profile)?;
            let stage = if input.is_prefill { "prefill" } else { "decode" };
            let start = Instant::now();
            let output = self.model.forward(&mut input)?;
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            debug!(stage, elapsed_ms, "forward complete");
            consume_output(&mut state, &input, output, &self.profile)?;

            counters.record_step(pass);
            prof.step();
        };
        prof.finish();

        info!(
            pass = %pass,
            steps = counters.steps_so_far,
            new_tokens = counters.new_tokens_produced,
            stop_reason = %stop_reason,
            "generation pass finished"
        );

        // Executors may emit ids past the tokenizer range; clamp before decode.
        let vocab_limit = self.tokenizer.vocab_size().max(1) as u32;
        let token_ids: Vec<Vec<u32>> = state
            .generated_rows()
            .iter()
            .map(|row| {
                row[prompt_len..]
                    .iter()
                    .map(|&t| t.min(vocab_limit - 1))
                    .collect()
            })
            .collect();
        let completions = token_ids
            .iter()
            .map(|ids| self.tokenizer.decode(ids))
            .collect();

        Ok(GenerationOutput {
            texts: completions,
            token_ids,
            prompt_tokens: prompt_len,
            steps: counters.steps_so_far,
            stop_reason,
        })
    }
}
