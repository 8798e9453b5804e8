//! Step executor: builds forward inputs and folds outputs back into the
//! generation state.
//!
//! `prepare_input` and `consume_output` bracket the opaque forward call.
//! Both check their phase preconditions before touching anything, so a
//! cache-discipline violation surfaces as an error instead of a corrupt
//! step.

use tracing::debug;

use crate::error::RunnerError;
use crate::mask::{decode_row_mask, BiasTable, VisibilityMask};
use crate::model::profile::{AttentionLayout, ModelProfile};
use crate::model::{StepInput, StepMasks, StepOutput};
use crate::tensor::Tensor;

use super::state::GenerationState;

/// Masks prebuilt once per generation call, sized to the mask capacity.
#[derive(Debug, Clone)]
pub enum CallMasks {
    /// Dense-bias mapping, handed to every step.
    Bias(BiasTable),
    /// Boolean causal matrix for prefill; decode rows are cut per step.
    Visibility(VisibilityMask),
}

impl CallMasks {
    /// Build the call masks for a profile.
    pub fn build(profile: &ModelProfile, max_positions: usize) -> Self {
        match profile.attention {
            AttentionLayout::DenseBias { .. } => {
                CallMasks::Bias(BiasTable::build(max_positions, profile.bias_window()))
            }
            AttentionLayout::RowVisibility => {
                CallMasks::Visibility(VisibilityMask::causal(max_positions))
            }
        }
    }

    pub fn size(&self) -> usize {
        match self {
            CallMasks::Bias(table) => table.size(),
            CallMasks::Visibility(mask) => mask.size(),
        }
    }
}

/// Assemble the forward input for the next step.
///
/// Prefill sends the full prompt rows with positions `0..prompt_len`;
/// decode sends the last generated token per row at its stored position.
/// The cache handle moves out of the state and into the input.
pub fn prepare_input(
    state: &mut GenerationState,
    masks: &CallMasks,
    profile: &ModelProfile,
) -> Result<StepInput, RunnerError> {
    if state.is_prefill() {
        if state.has_cache() {
            return Err(RunnerError::Precondition(
                "prefill step must start without a cache handle".to_string(),
            ));
        }
        let tokens = state.prompt_rows().to_vec();
        let row_positions: Vec<u32> = (0..state.prompt_len() as u32).collect();
        let positions = vec![row_positions; state.batch_size()];
        let step_masks = match masks {
            CallMasks::Bias(table) => StepMasks::Bias(table.clone()),
            CallMasks::Visibility(mask) => StepMasks::Visibility(mask.clone()),
        };
        Ok(StepInput::new(tokens, positions, step_masks, true, None))
    } else {
        if !state.has_cache() {
            return Err(RunnerError::Precondition(
                "decode step requires the cache handle from the previous step".to_string(),
            ));
        }
        let tokens: Vec<Vec<u32>> = state.last_tokens().into_iter().map(|t| vec![t]).collect();
        let positions: Vec<Vec<u32>> = state.positions().iter().map(|&p| vec![p]).collect();
        let step_masks = match masks {
            CallMasks::Bias(table) => StepMasks::Bias(table.clone()),
            CallMasks::Visibility(mask) => {
                StepMasks::Row(decode_row_mask(mask.size(), state.cursor()))
            }
        };
        let cache = state.take_cache();
        Ok(StepInput::new(tokens, positions, step_masks, false, cache))
    }
}

/// Fold a forward result back into the state.
///
/// Selects one next token per row from the logits, appends it, installs
/// the replacement cache handle, and advances the position trackers per
/// the profile's policy.
pub fn consume_output(
    state: &mut GenerationState,
    input: &StepInput,
    output: StepOutput,
    profile: &ModelProfile,
) -> Result<(), RunnerError> {
    let next = select_next_tokens(&output.logits)?;
    if next.len() != state.batch_size() {
        return Err(RunnerError::Forward(format!(
            "forward returned logits for {} rows, expected {}",
            next.len(),
            state.batch_size()
        )));
    }
    state.push_next_tokens(&next);
    state.install_cache(output.cache);
    state.complete_step(profile.positions, &input.positions);
    debug!(
        step = state.steps_completed(),
        position_counter = state.position_counter(),
        "step consumed"
    );
    Ok(())
}

/// Greedy next-token selection: arg-max over the vocab axis of the final
/// position of each row. Ties resolve to the lowest index.
pub fn select_next_tokens(logits: &Tensor) -> Result<Vec<u32>, RunnerError> {
    let shape = logits.shape();
    if shape.len() != 3 || shape.iter().any(|&d| d == 0) {
        return Err(RunnerError::Forward(format!(
            "logits shape {:?} is not [batch, positions, vocab]",
            shape
        )));
    }
    let (batch, width, vocab) = (shape[0], shape[1], shape[2]);
    let data = logits.as_f32();

    let mut next = Vec::with_capacity(batch);
    for b in 0..batch {
        let base = (b * width + (width - 1)) * vocab;
        next.push(argmax_row(&data[base..base + vocab]));
    }
    Ok(next)
}

fn argmax_row(row: &[f32]) -> u32 {
    let mut best_idx = 0u32;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best_idx = i as u32;
        }
    }
    best_idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::profile::{ModelFamily, PositionPolicy};
    use crate::model::{KvCacheHandle, StepModel};

    const MAX_POS: usize = 12;

    fn gpt_profile() -> ModelProfile {
        ModelProfile::new(ModelFamily::GptOss, Some(4))
    }

    fn qwen_profile() -> ModelProfile {
        ModelProfile::new(ModelFamily::Qwen3Moe, None)
    }

    fn state_with_prompt(len: usize, batch: usize) -> GenerationState {
        GenerationState::new(vec![(0..len as u32).collect(); batch]).unwrap()
    }

    /// Executor stub whose cache records how many steps produced it.
    #[derive(Debug, PartialEq, Eq)]
    struct ProbeCache {
        step: usize,
    }

    struct ProbeModel {
        vocab: usize,
        calls: usize,
    }

    impl ProbeModel {
        fn new(vocab: usize) -> Self {
            Self { vocab, calls: 0 }
        }
    }

    impl StepModel for ProbeModel {
        fn forward(&mut self, input: &mut StepInput) -> Result<StepOutput, RunnerError> {
            let step = match input.take_cache() {
                Some(handle) => handle.downcast_ref::<ProbeCache>().unwrap().step + 1,
                None => 1,
            };
            self.calls += 1;
            let batch = input.batch_size();
            let width = input.step_width();
            // Favor token (calls + row) so selections are distinguishable.
            let mut logits = vec![0.0f32; batch * width * self.vocab];
            for b in 0..batch {
                let winner = (self.calls + b) % self.vocab;
                let base = (b * width + (width - 1)) * self.vocab;
                logits[base + winner] = 1.0;
            }
            Ok(StepOutput {
                logits: Tensor::new(vec![batch, width, self.vocab], logits),
                cache: KvCacheHandle::new(ProbeCache { step }),
            })
        }

        fn vocab_size(&self) -> usize {
            self.vocab
        }
    }

    #[test]
    fn test_prepare_prefill_input() {
        let mut state = state_with_prompt(4, 2);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let input = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();

        assert!(input.is_prefill);
        assert_eq!(input.tokens, vec![vec![0, 1, 2, 3]; 2]);
        assert_eq!(input.positions, vec![vec![0, 1, 2, 3]; 2]);
        assert!(!input.has_cache());
        assert!(matches!(input.masks, StepMasks::Bias(_)));
    }

    #[test]
    fn test_prefill_with_stale_cache_is_a_precondition_error() {
        let mut state = state_with_prompt(4, 1);
        state.install_cache(KvCacheHandle::new(ProbeCache { step: 9 }));
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let err = prepare_input(&mut state, &masks, &gpt_profile()).unwrap_err();
        assert!(matches!(err, RunnerError::Precondition(_)));
        assert!(err
            .to_string()
            .contains("prefill step must start without a cache handle"));
    }

    #[test]
    fn test_decode_without_cache_is_a_precondition_error() {
        let mut state = state_with_prompt(4, 1);
        // Complete a step without installing a cache.
        state.push_next_tokens(&[7]);
        state.complete_step(PositionPolicy::RowMax, &[vec![0, 1, 2, 3]]);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let err = prepare_input(&mut state, &masks, &gpt_profile()).unwrap_err();
        assert!(matches!(err, RunnerError::Precondition(_)));
    }

    #[test]
    fn test_decode_input_carries_last_tokens_and_positions() {
        let mut state = state_with_prompt(4, 2);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let mut model = ProbeModel::new(10);

        let mut input = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();
        let output = model.forward(&mut input).unwrap();
        consume_output(&mut state, &input, output, &gpt_profile()).unwrap();

        let decode = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();
        assert!(!decode.is_prefill);
        assert_eq!(decode.tokens, vec![vec![1], vec![2]]); // winners of step 1
        assert_eq!(decode.positions, vec![vec![4], vec![4]]);
        assert!(decode.has_cache());
    }

    #[test]
    fn test_qwen_decode_uses_row_mask_sized_by_cursor() {
        let mut state = state_with_prompt(5, 1);
        let masks = CallMasks::build(&qwen_profile(), MAX_POS);
        let mut model = ProbeModel::new(10);

        let mut input = prepare_input(&mut state, &masks, &qwen_profile()).unwrap();
        assert!(matches!(input.masks, StepMasks::Visibility(_)));
        let output = model.forward(&mut input).unwrap();
        consume_output(&mut state, &input, output, &qwen_profile()).unwrap();

        let decode = prepare_input(&mut state, &masks, &qwen_profile()).unwrap();
        match &decode.masks {
            StepMasks::Row(row) => {
                assert_eq!(row.len(), MAX_POS);
                // Prompt of 5 plus the first generated token.
                assert_eq!(row.visible_count(), 6);
            }
            other => panic!("expected a row mask, got {:?}", other),
        }
    }

    #[test]
    fn test_consume_appends_one_token_per_row() {
        let mut state = state_with_prompt(3, 2);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let mut model = ProbeModel::new(10);

        let mut input = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();
        let output = model.forward(&mut input).unwrap();
        consume_output(&mut state, &input, output, &gpt_profile()).unwrap();

        assert_eq!(state.generated_rows()[0].len(), 4);
        assert_eq!(state.generated_rows()[1].len(), 4);
        assert!(!state.is_prefill());
        assert!(state.has_cache());
        assert_eq!(state.steps_completed(), 1);
    }

    #[test]
    fn test_cache_handle_is_replaced_every_step() {
        let mut state = state_with_prompt(3, 1);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let mut model = ProbeModel::new(10);

        for expected_step in 1..=3usize {
            let mut input = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();
            let output = model.forward(&mut input).unwrap();
            consume_output(&mut state, &input, output, &gpt_profile()).unwrap();
            let cache = state.cache_ref().unwrap();
            assert_eq!(
                cache.downcast_ref::<ProbeCache>(),
                Some(&ProbeCache {
                    step: expected_step
                })
            );
        }
    }

    #[test]
    fn test_three_step_loop_invariants() {
        // Prompt of 8, three steps: the canonical progression.
        let mut state = state_with_prompt(8, 1);
        let masks = CallMasks::build(&gpt_profile(), MAX_POS);
        let mut model = ProbeModel::new(50);

        let mut counters_seen = Vec::new();
        for _ in 0..3 {
            let mut input = prepare_input(&mut state, &masks, &gpt_profile()).unwrap();
            let output = model.forward(&mut input).unwrap();
            consume_output(&mut state, &input, output, &gpt_profile()).unwrap();
            counters_seen.push(state.position_counter());
        }

        assert_eq!(counters_seen, vec![8, 9, 10]);
        assert_eq!(state.generated_rows()[0].len(), 11);
        assert_eq!(state.steps_completed(), 3);
    }

    #[test]
    fn test_batch_mismatch_is_rejected() {
        let mut state = state_with_prompt(3, 2);
        let input = StepInput::new(
            vec![vec![1, 2, 3]; 2],
            vec![vec![0, 1, 2]; 2],
            StepMasks::Bias(BiasTable::build(MAX_POS, Some(4))),
            true,
            None,
        );
        // One logits row for a two-row batch.
        let output = StepOutput {
            logits: Tensor::new(vec![1, 3, 4], vec![0.0; 12]),
            cache: KvCacheHandle::new(ProbeCache { step: 1 }),
        };
        let err = consume_output(&mut state, &input, output, &gpt_profile()).unwrap_err();
        assert!(err.to_string().contains("logits for 1 rows, expected 2"));
    }

    #[test]
    fn test_select_next_tokens_uses_last_position() {
        // Position 0 favors token 3, position 1 favors token 1.
        let logits = Tensor::new(
            vec![1, 2, 4],
            vec![0.0, 0.0, 0.0, 9.0, 0.0, 5.0, 0.0, 0.0],
        );
        assert_eq!(select_next_tokens(&logits).unwrap(), vec![1]);
    }

    #[test]
    fn test_select_next_tokens_tie_breaks_low() {
        let logits = Tensor::new(vec![1, 1, 4], vec![2.0, 7.0, 7.0, 1.0]);
        assert_eq!(select_next_tokens(&logits).unwrap(), vec![1]);
    }

    #[test]
    fn test_select_next_tokens_rejects_bad_rank() {
        let logits = Tensor::new(vec![2, 4], vec![0.0; 8]);
        let err = select_next_tokens(&logits).unwrap_err();
        assert!(err.to_string().contains("is not [batch, positions, vocab]"));
    }

    #[test]
    fn test_argmax_row() {
        assert_eq!(argmax_row(&[0.1, 0.9, 0.3]), 1);
        assert_eq!(argmax_row(&[-5.0, -2.0, -9.0]), 1);
        assert_eq!(argmax_row(&[1.0]), 0);
    }
}
