//! mBART encoder-decoder (pre-norm transformer, learned positions).

use anyhow::Context;
use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{Embedding, LayerNorm, Linear, Module, VarBuilder};
use std::path::Path;
use std::time::Instant;

use super::config::MBartConfig;
use crate::translate::generation::{self, GenerationConfig, StepScorer};
use crate::translate::Seq2SeqModel;

const LAYER_NORM_EPS: f64 = 1e-5;
// mBART reserves the first two rows of the position table
const POSITION_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Activation {
    Gelu,
    GeluTanh,
    Relu,
    Silu,
}

impl Activation {
    fn from_name(name: &str) -> anyhow::Result<Self> {
        match name {
            "gelu" => Ok(Activation::Gelu),
            "gelu_new" | "gelu_pytorch_tanh" => Ok(Activation::GeluTanh),
            "relu" => Ok(Activation::Relu),
            "silu" | "swish" => Ok(Activation::Silu),
            other => Err(anyhow::anyhow!("Unsupported activation function: {}", other)),
        }
    }

    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Activation::Gelu => xs.gelu_erf(),
            Activation::GeluTanh => xs.gelu(),
            Activation::Relu => xs.relu(),
            Activation::Silu => xs.silu(),
        }
    }
}

fn scaled_dot_product_attention(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    mask: Option<&Tensor>,
    scale: f64,
) -> Result<Tensor> {
    let attn_weights = (q.matmul(&k.transpose(2, 3)?)? * scale)?;
    let attn_weights = match mask {
        Some(m) => attn_weights.broadcast_add(m)?,
        None => attn_weights,
    };

    // softmax in F32 for numerical stability
    let input_dtype = attn_weights.dtype();
    let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights.to_dtype(DType::F32)?)?;
    attn_weights.to_dtype(input_dtype)?.matmul(v)
}

/// Additive mask of shape (1, 1, q_len, kv_len): query i sees keys up to
/// `kv_len - q_len + i`.
fn causal_mask(q_len: usize, kv_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let past = kv_len - q_len;
    let mask: Vec<f32> = (0..q_len)
        .flat_map(|i| (0..kv_len).map(move |j| if j > past + i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (1, 1, q_len, kv_len), device)?.to_dtype(dtype)
}

#[derive(Debug)]
struct LearnedPositionalEmbedding {
    embedding: Embedding,
}

impl LearnedPositionalEmbedding {
    fn load(num_positions: usize, embed_dim: usize, vb: VarBuilder) -> Result<Self> {
        let embedding = candle_nn::embedding(num_positions + POSITION_OFFSET, embed_dim, vb)?;
        Ok(Self { embedding })
    }

    /// Position embeddings for `seq_len` tokens following `past_len` cached ones.
    fn forward(&self, past_len: usize, seq_len: usize, device: &Device) -> Result<Tensor> {
        let start = (past_len + POSITION_OFFSET) as u32;
        let ids = Tensor::arange(start, start + seq_len as u32, device)?;
        self.embedding.forward(&ids)
    }
}

#[derive(Debug)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn load(embed_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = embed_dim / num_heads;
        Ok(Self {
            q_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("q_proj"))?,
            k_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("k_proj"))?,
            v_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("v_proj"))?,
            out_proj: candle_nn::linear(embed_dim, embed_dim, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scale: (head_dim as f64).powf(-0.5),
        })
    }

    // (B, L, D) -> (B, H, L, D/H)
    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        xs.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn key_value(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let key = self.split_heads(&self.k_proj.forward(xs)?)?;
        let value = self.split_heads(&self.v_proj.forward(xs)?)?;
        Ok((key, value))
    }

    fn attend(&self, xs: &Tensor, key: &Tensor, value: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (batch_size, seq_len, _) = xs.dims3()?;
        let query = self.split_heads(&self.q_proj.forward(xs)?)?;
        let attn_output = scaled_dot_product_attention(&query, key, value, mask, self.scale)?;
        let attn_output = attn_output.transpose(1, 2)?.contiguous()?.reshape((
            batch_size,
            seq_len,
            self.num_heads * self.head_dim,
        ))?;
        self.out_proj.forward(&attn_output)
    }
}

#[derive(Debug)]
struct FeedForward {
    fc1: Linear,
    fc2: Linear,
    activation: Activation,
}

impl FeedForward {
    fn load(embed_dim: usize, ffn_dim: usize, activation: Activation, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: candle_nn::linear(embed_dim, ffn_dim, vb.pp("fc1"))?,
            fc2: candle_nn::linear(ffn_dim, embed_dim, vb.pp("fc2"))?,
            activation,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.activation.apply(&self.fc1.forward(xs)?)?;
        self.fc2.forward(&xs)
    }
}

#[derive(Debug)]
struct EncoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    ffn: FeedForward,
    final_layer_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(cfg: &MBartConfig, activation: Activation, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(cfg.d_model, cfg.encoder_attention_heads, vb.pp("self_attn"))?,
            self_attn_layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("self_attn_layer_norm"))?,
            ffn: FeedForward::load(cfg.d_model, cfg.encoder_ffn_dim, activation, &vb)?,
            final_layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.self_attn_layer_norm.forward(xs)?;
        let (key, value) = self.self_attn.key_value(&hidden)?;
        let hidden = self.self_attn.attend(&hidden, &key, &value, None)?;
        let xs = (xs + hidden)?;

        let hidden = self.ffn.forward(&self.final_layer_norm.forward(&xs)?)?;
        xs + hidden
    }
}

/// Per-layer decoder state for one generation.
#[derive(Debug)]
struct LayerCache {
    self_kv: Option<(Tensor, Tensor)>,
    cross_kv: (Tensor, Tensor),
}

#[derive(Debug)]
pub(crate) struct DecoderCache {
    layers: Vec<LayerCache>,
    past_len: usize,
}

impl DecoderCache {
    /// Reorders cached self-attention rows so row `i` continues row `index[i]`.
    fn reorder(&mut self, index: &Tensor) -> Result<()> {
        for layer in self.layers.iter_mut() {
            if let Some((key, value)) = layer.self_kv.take() {
                layer.self_kv = Some((key.index_select(index, 0)?, value.index_select(index, 0)?));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct DecoderLayer {
    self_attn: Attention,
    self_attn_layer_norm: LayerNorm,
    encoder_attn: Attention,
    encoder_attn_layer_norm: LayerNorm,
    ffn: FeedForward,
    final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    fn load(cfg: &MBartConfig, activation: Activation, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(cfg.d_model, cfg.decoder_attention_heads, vb.pp("self_attn"))?,
            self_attn_layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("self_attn_layer_norm"))?,
            encoder_attn: Attention::load(cfg.d_model, cfg.decoder_attention_heads, vb.pp("encoder_attn"))?,
            encoder_attn_layer_norm: candle_nn::layer_norm(
                cfg.d_model,
                LAYER_NORM_EPS,
                vb.pp("encoder_attn_layer_norm"),
            )?,
            ffn: FeedForward::load(cfg.d_model, cfg.decoder_ffn_dim, activation, &vb)?,
            final_layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&self, xs: &Tensor, cache: &mut LayerCache, mask: Option<&Tensor>) -> Result<Tensor> {
        // Self attention over cached + new positions
        let hidden = self.self_attn_layer_norm.forward(xs)?;
        let (key, value) = self.self_attn.key_value(&hidden)?;
        let (key, value) = match cache.self_kv.take() {
            Some((past_key, past_value)) => (
                Tensor::cat(&[&past_key, &key], 2)?,
                Tensor::cat(&[&past_value, &value], 2)?,
            ),
            None => (key, value),
        };
        let hidden = self.self_attn.attend(&hidden, &key, &value, mask)?;
        cache.self_kv = Some((key, value));
        let xs = (xs + hidden)?;

        // Cross attention
        let hidden = self.encoder_attn_layer_norm.forward(&xs)?;
        let (cross_key, cross_value) = &cache.cross_kv;
        let hidden = self.encoder_attn.attend(&hidden, cross_key, cross_value, None)?;
        let xs = (xs + hidden)?;

        // FFN
        let hidden = self.ffn.forward(&self.final_layer_norm.forward(&xs)?)?;
        xs + hidden
    }
}

#[derive(Debug)]
struct MBartEncoder {
    embed_positions: LearnedPositionalEmbedding,
    layernorm_embedding: LayerNorm,
    layers: Vec<EncoderLayer>,
    layer_norm: LayerNorm,
    embed_scale: f64,
}

impl MBartEncoder {
    fn load(cfg: &MBartConfig, activation: Activation, vb: VarBuilder) -> Result<Self> {
        let layers = (0..cfg.encoder_layers)
            .map(|i| EncoderLayer::load(cfg, activation, vb.pp(format!("layers.{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embed_positions: LearnedPositionalEmbedding::load(
                cfg.max_position_embeddings,
                cfg.d_model,
                vb.pp("embed_positions"),
            )?,
            layernorm_embedding: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("layernorm_embedding"))?,
            layers,
            layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("layer_norm"))?,
            embed_scale: embed_scale(cfg),
        })
    }

    fn forward(&self, input_ids: &Tensor, embed_tokens: &Embedding) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let inputs_embeds = (embed_tokens.forward(input_ids)? * self.embed_scale)?;
        let positions = self.embed_positions.forward(0, seq_len, input_ids.device())?;
        let mut xs = self
            .layernorm_embedding
            .forward(&inputs_embeds.broadcast_add(&positions)?)?;
        for layer in &self.layers {
            xs = layer.forward(&xs)?;
        }
        self.layer_norm.forward(&xs)
    }
}

#[derive(Debug)]
struct MBartDecoder {
    embed_positions: LearnedPositionalEmbedding,
    layernorm_embedding: LayerNorm,
    layers: Vec<DecoderLayer>,
    layer_norm: LayerNorm,
    embed_scale: f64,
}

impl MBartDecoder {
    fn load(cfg: &MBartConfig, activation: Activation, vb: VarBuilder) -> Result<Self> {
        let layers = (0..cfg.decoder_layers)
            .map(|i| DecoderLayer::load(cfg, activation, vb.pp(format!("layers.{}", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embed_positions: LearnedPositionalEmbedding::load(
                cfg.max_position_embeddings,
                cfg.d_model,
                vb.pp("embed_positions"),
            )?,
            layernorm_embedding: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("layernorm_embedding"))?,
            layers,
            layer_norm: candle_nn::layer_norm(cfg.d_model, LAYER_NORM_EPS, vb.pp("layer_norm"))?,
            embed_scale: embed_scale(cfg),
        })
    }

    /// Cross-attention keys/values are computed once per generation.
    fn init_cache(&self, encoder_hidden_states: &Tensor) -> Result<DecoderCache> {
        let layers = self
            .layers
            .iter()
            .map(|layer| {
                Ok(LayerCache {
                    self_kv: None,
                    cross_kv: layer.encoder_attn.key_value(encoder_hidden_states)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(DecoderCache { layers, past_len: 0 })
    }

    fn forward(&self, input_ids: &Tensor, embed_tokens: &Embedding, cache: &mut DecoderCache) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let device = input_ids.device();

        let inputs_embeds = (embed_tokens.forward(input_ids)? * self.embed_scale)?;
        let positions = self.embed_positions.forward(cache.past_len, seq_len, device)?;
        let mut xs = self
            .layernorm_embedding
            .forward(&inputs_embeds.broadcast_add(&positions)?)?;

        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, cache.past_len + seq_len, xs.dtype(), device)?)
        } else {
            None
        };

        for (layer, layer_cache) in self.layers.iter().zip(cache.layers.iter_mut()) {
            xs = layer.forward(&xs, layer_cache, mask.as_ref())?;
        }
        cache.past_len += seq_len;

        self.layer_norm.forward(&xs)
    }
}

fn embed_scale(cfg: &MBartConfig) -> f64 {
    if cfg.scale_embedding {
        (cfg.d_model as f64).sqrt()
    } else {
        1.0
    }
}

/// mBART for conditional generation: shared embeddings, encoder, decoder and a
/// tied LM head with `final_logits_bias`.
#[derive(Debug)]
pub struct MBartModel {
    shared: Embedding,
    encoder: MBartEncoder,
    decoder: MBartDecoder,
    lm_head: Linear,
    final_logits_bias: Tensor,
    max_position_embeddings: usize,
    generation: GenerationConfig,
    device: Device,
}

impl MBartModel {
    /// Loads weights from `model.safetensors`, falling back to `pytorch_model.bin`.
    pub fn load(
        model_dir: impl AsRef<Path>,
        cfg: &MBartConfig,
        generation: GenerationConfig,
        device: Device,
    ) -> anyhow::Result<Self> {
        let model_dir = model_dir.as_ref();
        let dtype = if device.is_cpu() {
            DType::F32
        } else {
            device.bf16_default_to_f32()
        };

        let safetensors = model_dir.join("model.safetensors");
        let pytorch_bin = model_dir.join("pytorch_model.bin");
        let vb = if safetensors.exists() {
            // SAFETY: the weights file is not modified while mapped.
            unsafe { VarBuilder::from_mmaped_safetensors(&[&safetensors], dtype, &device) }
                .with_context(|| format!("Failed to map {}", safetensors.display()))?
        } else if pytorch_bin.exists() {
            log::warn!("No model.safetensors in {}, reading pytorch_model.bin", model_dir.display());
            VarBuilder::from_pth(&pytorch_bin, dtype, &device)
                .with_context(|| format!("Failed to read {}", pytorch_bin.display()))?
        } else {
            anyhow::bail!(
                "No model.safetensors or pytorch_model.bin in {}",
                model_dir.display()
            );
        };

        Self::from_var_builder(cfg, generation, vb)
    }

    pub fn from_var_builder(cfg: &MBartConfig, generation: GenerationConfig, vb: VarBuilder) -> anyhow::Result<Self> {
        let activation = Activation::from_name(&cfg.activation_function)?;

        let shared_prefix = if vb.contains_tensor("model.shared.weight") {
            "model.shared"
        } else {
            "model.encoder.embed_tokens"
        };
        let shared = candle_nn::embedding(cfg.vocab_size, cfg.d_model, vb.pp(shared_prefix))
            .context("Failed to load shared embeddings")?;
        let encoder = MBartEncoder::load(cfg, activation, vb.pp("model.encoder"))
            .context("Failed to load encoder")?;
        let decoder = MBartDecoder::load(cfg, activation, vb.pp("model.decoder"))
            .context("Failed to load decoder")?;

        let lm_head = Linear::new(shared.embeddings().clone(), None);
        let final_logits_bias = if vb.contains_tensor("final_logits_bias") {
            vb.get((1, cfg.vocab_size), "final_logits_bias")
                .context("Failed to load final_logits_bias")?
        } else {
            Tensor::zeros((1, cfg.vocab_size), vb.dtype(), vb.device())?
        };

        Ok(Self {
            shared,
            encoder,
            decoder,
            lm_head,
            final_logits_bias,
            max_position_embeddings: cfg.max_position_embeddings,
            generation,
            device: vb.device().clone(),
        })
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    fn encode(&self, input_ids: &[u32]) -> Result<Tensor> {
        let input = Tensor::new(input_ids, &self.device)?.unsqueeze(0)?;
        self.encoder.forward(&input, &self.shared)
    }

    fn decode_step(&self, input_ids: &Tensor, cache: &mut DecoderCache) -> Result<Tensor> {
        let hidden_states = self.decoder.forward(input_ids, &self.shared, cache)?;
        let (_, seq_len, _) = hidden_states.dims3()?;
        let last_hidden = hidden_states.i((.., seq_len - 1, ..))?.contiguous()?;
        self.lm_head
            .forward(&last_hidden)?
            .broadcast_add(&self.final_logits_bias)
    }
}

impl Seq2SeqModel for MBartModel {
    fn generate(&self, input_ids: &[u32], forced_bos_token_id: u32) -> anyhow::Result<Vec<Vec<u32>>> {
        if input_ids.is_empty() {
            anyhow::bail!("Cannot translate an empty token sequence");
        }
        if self.generation.max_length > self.max_position_embeddings {
            anyhow::bail!(
                "max_length {} exceeds the model's {} position embeddings",
                self.generation.max_length,
                self.max_position_embeddings
            );
        }
        if input_ids.len() > self.max_position_embeddings {
            anyhow::bail!(
                "Input has {} tokens, the model accepts at most {}",
                input_ids.len(),
                self.max_position_embeddings
            );
        }

        let start = Instant::now();
        let encoder_hidden_states = self.encode(input_ids).context("Encoder forward failed")?;
        let mut scorer = MBartScorer {
            model: self,
            encoder_hidden_states,
            cache: None,
        };
        let sequences = generation::generate(&mut scorer, &self.generation, Some(forced_bos_token_id))?;
        log::debug!(
            "Generated {} candidate(s) from {} input tokens in {:?}",
            sequences.len(),
            input_ids.len(),
            start.elapsed()
        );
        Ok(sequences)
    }
}

/// Feeds decoder steps through the KV cache for [`generation::generate`].
struct MBartScorer<'a> {
    model: &'a MBartModel,
    encoder_hidden_states: Tensor,
    cache: Option<DecoderCache>,
}

impl StepScorer for MBartScorer<'_> {
    fn next_log_probs(&mut self, sequences: &[Vec<u32>], origins: &[usize]) -> anyhow::Result<Vec<Vec<f32>>> {
        let batch_size = sequences.len();
        let device = &self.model.device;

        let (input_ids, mut cache) = match self.cache.take() {
            None => {
                let (_, src_len, d_model) = self.encoder_hidden_states.dims3()?;
                let encoder_hidden_states = self
                    .encoder_hidden_states
                    .broadcast_as((batch_size, src_len, d_model))?
                    .contiguous()?;
                let cache = self.model.decoder.init_cache(&encoder_hidden_states)?;
                let seq_len = sequences.first().map(Vec::len).unwrap_or(0);
                let flat: Vec<u32> = sequences.iter().flatten().copied().collect();
                (Tensor::from_vec(flat, (batch_size, seq_len), device)?, cache)
            }
            Some(mut cache) => {
                if origins.iter().enumerate().any(|(i, &origin)| i != origin) {
                    let index: Vec<u32> = origins.iter().map(|&origin| origin as u32).collect();
                    cache.reorder(&Tensor::from_vec(index, batch_size, device)?)?;
                }
                let last_tokens = sequences
                    .iter()
                    .map(|sequence| {
                        sequence
                            .last()
                            .copied()
                            .ok_or_else(|| anyhow::anyhow!("Empty decoder sequence"))
                    })
                    .collect::<anyhow::Result<Vec<u32>>>()?;
                (Tensor::from_vec(last_tokens, (batch_size, 1), device)?, cache)
            }
        };

        let logits = self.model.decode_step(&input_ids, &mut cache)?;
        self.cache = Some(cache);

        let log_probs = candle_nn::ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
        Ok(log_probs.to_vec2::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn tiny_config() -> MBartConfig {
        MBartConfig {
            vocab_size: 16,
            d_model: 8,
            encoder_layers: 2,
            decoder_layers: 2,
            encoder_attention_heads: 2,
            decoder_attention_heads: 2,
            encoder_ffn_dim: 16,
            decoder_ffn_dim: 16,
            max_position_embeddings: 32,
            max_length: 8,
            num_beams: 1,
            ..Default::default()
        }
    }

    fn tiny_model(num_beams: usize) -> MBartModel {
        let cfg = tiny_config();
        let generation = GenerationConfig {
            num_beams,
            ..cfg.generation_config()
        };
        model_with(&cfg, generation)
    }

    fn model_with(cfg: &MBartConfig, generation: GenerationConfig) -> MBartModel {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        MBartModel::from_var_builder(cfg, generation, vb).unwrap()
    }

    #[test]
    fn test_causal_mask_with_past() {
        let mask = causal_mask(2, 4, DType::F32, &Device::Cpu).unwrap();
        let rows: Vec<Vec<f32>> = mask.squeeze(0).unwrap().squeeze(0).unwrap().to_vec2().unwrap();
        assert_eq!(&rows[0][..3], &[0.0f32; 3]);
        assert!(rows[0][3].is_infinite());
        assert_eq!(rows[1], vec![0.0; 4]);
    }

    #[test]
    fn test_unknown_activation_is_rejected() {
        assert!(Activation::from_name("gelu").is_ok());
        assert!(Activation::from_name("mish").is_err());
    }

    #[test]
    fn test_cached_decoding_matches_full_prefix() {
        let model = tiny_model(1);
        let encoder_hidden_states = model.encode(&[5, 9, 2]).unwrap();
        let prefix = [2u32, 7, 4];

        let mut full_cache = model.decoder.init_cache(&encoder_hidden_states).unwrap();
        let full_input = Tensor::new(&prefix[..], &Device::Cpu).unwrap().unsqueeze(0).unwrap();
        let full: Vec<f32> = model
            .decode_step(&full_input, &mut full_cache)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();

        let mut step_cache = model.decoder.init_cache(&encoder_hidden_states).unwrap();
        let mut stepped = Vec::new();
        for token in prefix {
            let input = Tensor::new(&[token], &Device::Cpu).unwrap().unsqueeze(0).unwrap();
            stepped = model
                .decode_step(&input, &mut step_cache)
                .unwrap()
                .flatten_all()
                .unwrap()
                .to_vec1::<f32>()
                .unwrap();
        }

        assert_eq!(step_cache.past_len, 3);
        for (a, b) in full.iter().zip(stepped.iter()) {
            assert!((a - b).abs() < 1e-4, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_greedy_generation_shape() {
        let model = tiny_model(1);
        let sequences = model.generate(&[5, 9, 10, 2], 7).unwrap();

        assert_eq!(sequences.len(), 1);
        let sequence = &sequences[0];
        assert_eq!(sequence[0], 2);
        assert_eq!(sequence[1], 7);
        assert!(sequence.len() <= 8);
        assert_eq!(sequence.last(), Some(&2));
    }

    #[test]
    fn test_beam_generation_shape() {
        let model = tiny_model(3);
        let sequences = model.generate(&[5, 9, 10, 2], 11).unwrap();

        assert!(!sequences.is_empty() && sequences.len() <= 3);
        for sequence in &sequences {
            assert_eq!(&sequence[..2], &[2, 11]);
            assert!(sequence.len() <= 8);
        }
    }

    #[test]
    fn test_rejects_overlong_input() {
        let model = tiny_model(1);
        let input: Vec<u32> = vec![4; 33];
        assert!(model.generate(&input, 7).is_err());
        assert!(model.generate(&[], 7).is_err());
    }

    #[test]
    fn test_max_length_beyond_positions_fails_before_decoding() {
        let cfg = MBartConfig {
            max_position_embeddings: 4,
            ..tiny_config()
        };
        let generation = GenerationConfig {
            max_length: 50,
            num_beams: 1,
            ..cfg.generation_config()
        };
        let model = model_with(&cfg, generation);

        let err = model.generate(&[5, 2], 7).unwrap_err();
        assert!(err.to_string().contains("max_length 50"), "{}", err);
    }
}
