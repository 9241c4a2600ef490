//! Greedy and beam-search decoding over an abstract next-token scorer.

use anyhow::Result;
use serde::{Deserialize, Serialize};

const INITIAL_BEAM_SCORE: f32 = -1e9;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Upper bound on the decoder sequence, start token included.
    pub max_length: usize,
    pub num_beams: usize,
    pub length_penalty: f64,
    pub early_stopping: bool,
    pub decoder_start_token_id: u32,
    pub eos_token_id: u32,
    pub forced_eos_token_id: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_length: 200,
            num_beams: 5,
            length_penalty: 1.0,
            early_stopping: true,
            decoder_start_token_id: 2,
            eos_token_id: 2,
            forced_eos_token_id: Some(2),
        }
    }
}

/// Produces next-token log-probabilities for a batch of decoder sequences.
pub trait StepScorer {
    /// `sequences[i]` extends row `origins[i]` of the previous call; the
    /// first call gets the identity mapping.
    fn next_log_probs(&mut self, sequences: &[Vec<u32>], origins: &[usize]) -> Result<Vec<Vec<f32>>>;
}

/// Runs greedy search for `num_beams <= 1`, beam search otherwise.
/// Returns finished sequences best first, each starting with the decoder start token.
pub fn generate(
    scorer: &mut dyn StepScorer,
    config: &GenerationConfig,
    forced_bos_token_id: Option<u32>,
) -> Result<Vec<Vec<u32>>> {
    if config.max_length < 2 {
        anyhow::bail!("max_length must be at least 2, got {}", config.max_length);
    }
    if config.num_beams <= 1 {
        greedy_search(scorer, config, forced_bos_token_id).map(|seq| vec![seq])
    } else {
        beam_search(scorer, config, forced_bos_token_id)
    }
}

fn greedy_search(
    scorer: &mut dyn StepScorer,
    config: &GenerationConfig,
    forced_bos_token_id: Option<u32>,
) -> Result<Vec<u32>> {
    let mut sequence = vec![config.decoder_start_token_id];

    while sequence.len() < config.max_length {
        let mut rows = scorer.next_log_probs(std::slice::from_ref(&sequence), &[0])?;
        let row = rows
            .first_mut()
            .ok_or_else(|| anyhow::anyhow!("Scorer returned no rows"))?;
        process_log_probs(row, sequence.len(), config, forced_bos_token_id);

        let next = argmax(row);
        sequence.push(next);
        if next == config.eos_token_id {
            break;
        }
    }

    Ok(sequence)
}

fn beam_search(
    scorer: &mut dyn StepScorer,
    config: &GenerationConfig,
    forced_bos_token_id: Option<u32>,
) -> Result<Vec<Vec<u32>>> {
    let num_beams = config.num_beams;
    let mut beams: Vec<Vec<u32>> = vec![vec![config.decoder_start_token_id]; num_beams];
    // only the first beam is live at step 0, otherwise every beam picks the same tokens
    let mut beam_scores: Vec<f32> = (0..num_beams)
        .map(|i| if i == 0 { 0.0 } else { INITIAL_BEAM_SCORE })
        .collect();
    let mut origins: Vec<usize> = (0..num_beams).collect();
    let mut hypotheses = BeamHypotheses::new(num_beams, config.length_penalty, config.early_stopping);

    loop {
        let cur_len = beams[0].len();
        let mut rows = scorer.next_log_probs(&beams, &origins)?;
        if rows.len() != num_beams {
            anyhow::bail!("Scorer returned {} rows for {} beams", rows.len(), num_beams);
        }

        let mut candidates: Vec<(f32, usize, u32)> = Vec::with_capacity(2 * num_beams * num_beams);
        for (beam, row) in rows.iter_mut().enumerate() {
            process_log_probs(row, cur_len, config, forced_bos_token_id);
            for (token, log_prob) in top_k(row, 2 * num_beams) {
                candidates.push((beam_scores[beam] + log_prob, beam, token));
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));
        candidates.truncate(2 * num_beams);

        let mut next_beams = Vec::with_capacity(num_beams);
        let mut next_scores = Vec::with_capacity(num_beams);
        let mut next_origins = Vec::with_capacity(num_beams);
        for (rank, &(score, beam, token)) in candidates.iter().enumerate() {
            if token == config.eos_token_id {
                if rank < num_beams {
                    hypotheses.add(beams[beam].clone(), score);
                }
            } else {
                let mut sequence = beams[beam].clone();
                sequence.push(token);
                next_beams.push(sequence);
                next_scores.push(score);
                next_origins.push(beam);
            }
            if next_beams.len() == num_beams {
                break;
            }
        }
        if next_beams.len() < num_beams {
            anyhow::bail!("Beam search ran out of candidates at length {}", cur_len);
        }

        let best_running = next_scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        beams = next_beams;
        beam_scores = next_scores;
        origins = next_origins;

        if hypotheses.is_done(best_running, cur_len + 1) || cur_len + 1 >= config.max_length {
            break;
        }
    }

    if !hypotheses.is_done(f32::NEG_INFINITY, beams[0].len()) {
        for (sequence, score) in beams.into_iter().zip(beam_scores) {
            hypotheses.add(sequence, score);
        }
    }

    Ok(hypotheses
        .into_sorted()
        .into_iter()
        .map(|mut sequence| {
            if sequence.len() < config.max_length && sequence.last() != Some(&config.eos_token_id) {
                sequence.push(config.eos_token_id);
            }
            sequence
        })
        .collect())
}

/// Forces the target language right after the start token and EOS at the last slot.
fn process_log_probs(
    row: &mut [f32],
    cur_len: usize,
    config: &GenerationConfig,
    forced_bos_token_id: Option<u32>,
) {
    if cur_len == 1 {
        if let Some(token) = forced_bos_token_id {
            force_token(row, token);
        }
    }
    if cur_len == config.max_length - 1 {
        if let Some(token) = config.forced_eos_token_id {
            force_token(row, token);
        }
    }
}

fn force_token(row: &mut [f32], token: u32) {
    row.iter_mut().for_each(|v| *v = f32::NEG_INFINITY);
    if let Some(v) = row.get_mut(token as usize) {
        *v = 0.0;
    }
}

fn argmax(row: &[f32]) -> u32 {
    row.iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0 as u32
}

/// The `k` highest entries of `row`, best first.
fn top_k(row: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = row.iter().enumerate().map(|(i, &v)| (i as u32, v)).collect();
    let k = k.min(indexed.len());
    if k == 0 {
        return Vec::new();
    }
    if k < indexed.len() {
        indexed.select_nth_unstable_by(k - 1, |a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
    }
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed
}

/// Finished hypotheses, scored by `sum_logprobs / len^length_penalty`.
struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f64,
    early_stopping: bool,
    beams: Vec<(f32, Vec<u32>)>,
    worst_score: f32,
}

impl BeamHypotheses {
    fn new(num_beams: usize, length_penalty: f64, early_stopping: bool) -> Self {
        Self {
            num_beams,
            length_penalty,
            early_stopping,
            beams: Vec::with_capacity(num_beams + 1),
            worst_score: f32::INFINITY,
        }
    }

    fn normalized(&self, sum_logprobs: f32, len: usize) -> f32 {
        (sum_logprobs as f64 / (len as f64).powf(self.length_penalty)) as f32
    }

    fn add(&mut self, sequence: Vec<u32>, sum_logprobs: f32) {
        let score = self.normalized(sum_logprobs, sequence.len());
        if self.beams.len() < self.num_beams || score > self.worst_score {
            self.beams.push((score, sequence));
            if self.beams.len() > self.num_beams {
                if let Some((worst_idx, _)) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1 .0.total_cmp(&b.1 .0))
                {
                    self.beams.remove(worst_idx);
                }
            }
            self.worst_score = self
                .beams
                .iter()
                .map(|(s, _)| *s)
                .fold(f32::INFINITY, f32::min);
        }
    }

    fn is_done(&self, best_running_sum: f32, cur_len: usize) -> bool {
        if self.beams.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.normalized(best_running_sum, cur_len) <= self.worst_score
    }

    fn into_sorted(mut self) -> Vec<Vec<u32>> {
        self.beams.sort_by(|a, b| b.0.total_cmp(&a.0));
        self.beams.into_iter().map(|(_, sequence)| sequence).collect()
    }
}
