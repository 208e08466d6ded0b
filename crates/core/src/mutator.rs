//! Graph mutation: write caller parameters into resolved roles.
//!
//! Only inputs that already exist on a resolved node are overwritten. A
//! resolved node missing its expected field means the template does not
//! match what the mutator was written against, and is reported as
//! [`CoreError::MutationTargetMissing`]. Roles that did not resolve are
//! skipped silently.

use rand::Rng;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::graph::JobGraph;
use crate::roles::{
    NodeRoleMap, Role, CHECKPOINT_LOADER_CLASS, KSAMPLER_ADVANCED_CLASS,
};

// ---------------------------------------------------------------------------
// Seed range
// ---------------------------------------------------------------------------

/// Smallest seed handed out for the random policy.
pub const SEED_MIN: u64 = 1;

/// Largest seed accepted by the server (`u32::MAX`).
pub const SEED_MAX: u64 = 4_294_967_295;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// How sampler seeds are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedPolicy {
    /// Draw an independent uniform seed for every sampler.
    #[default]
    Random,
    /// Use the same seed on every sampler.
    Fixed(u64),
}

/// Which samplers receive the full sampler settings.
///
/// Two-sampler templates are a generate-then-refine pipeline whose second
/// pass keeps its own template settings and only gets a fresh seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerPolicy {
    #[default]
    PrimaryOnly,
    AllSamplers,
}

/// LoRA name and model strength.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleAdapter {
    pub name: String,
    pub strength: f64,
}

/// KSampler settings written to the primary sampler.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    pub steps: u32,
    pub cfg: f64,
    pub sampler_name: String,
    pub scheduler: String,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            steps: 9,
            cfg: 1.0,
            sampler_name: "euler".to_string(),
            scheduler: "simple".to_string(),
        }
    }
}

/// Everything the mutator writes into a graph.
///
/// `None` for an optional loader name keeps the template value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationParams {
    pub prompt: String,
    /// `None` clears the negative prompt node to an empty string.
    pub negative_prompt: Option<String>,
    pub model_name: Option<String>,
    pub text_encoder_name: Option<String>,
    pub decoder_name: Option<String>,
    pub style_adapter: Option<StyleAdapter>,
    pub upscaler_name: Option<String>,
    pub sampler: SamplerSettings,
    pub seed: SeedPolicy,
    pub sampler_policy: SamplerPolicy,
}

/// Seeds written by one [`apply`] call, in sampler order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationSummary {
    pub seeds: Vec<(String, u64)>,
}

impl MutationSummary {
    pub fn seed_for(&self, node_id: &str) -> Option<u64> {
        self.seeds
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, seed)| *seed)
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// Write `params` into `graph` at the nodes named by `roles`.
pub fn apply(
    graph: &mut JobGraph,
    roles: &NodeRoleMap,
    params: &GenerationParams,
) -> Result<MutationSummary, CoreError> {
    set_input(graph, roles.positive_prompt(), "text", json!(params.prompt))?;

    if let Some(id) = roles.get(Role::NegativePrompt) {
        let text = params.negative_prompt.as_deref().unwrap_or("");
        set_input(graph, id, "text", json!(text))?;
    }

    if let (Some(id), Some(name)) = (roles.get(Role::ModelLoader), &params.model_name) {
        let field = if class_of(graph, id) == Some(CHECKPOINT_LOADER_CLASS) {
            "ckpt_name"
        } else {
            "unet_name"
        };
        set_input(graph, id, field, json!(name))?;
    }

    if let (Some(id), Some(name)) = (roles.get(Role::TextEncoder), &params.text_encoder_name) {
        set_input(graph, id, "clip_name", json!(name))?;
    }

    if let (Some(id), Some(name)) = (roles.get(Role::Decoder), &params.decoder_name) {
        set_input(graph, id, "vae_name", json!(name))?;
    }

    if let (Some(id), Some(adapter)) = (roles.style_adapters().first(), &params.style_adapter) {
        set_input(graph, id, "lora_name", json!(adapter.name))?;
        set_input(graph, id, "strength_model", json!(adapter.strength))?;
        if has_input(graph, id, "strength_clip") {
            set_input(graph, id, "strength_clip", json!(adapter.strength))?;
        }
    }

    if let (Some(id), Some(name)) = (roles.get(Role::Upscaler), &params.upscaler_name) {
        set_input(graph, id, "model_name", json!(name))?;
    }

    let seeds = draw_seeds(params.seed, roles.samplers().len());
    let mut summary = MutationSummary { seeds: Vec::new() };

    for (index, (id, seed)) in roles.samplers().iter().zip(seeds).enumerate() {
        let seed_field = if class_of(graph, id) == Some(KSAMPLER_ADVANCED_CLASS) {
            "noise_seed"
        } else {
            "seed"
        };
        set_input(graph, id, seed_field, json!(seed))?;

        let full_bundle = index == 0 || params.sampler_policy == SamplerPolicy::AllSamplers;
        if full_bundle {
            write_sampler_settings(graph, id, &params.sampler)?;
        }
        summary.seeds.push((id.clone(), seed));
    }

    tracing::debug!(
        primary_sampler = roles.primary_sampler(),
        seeds = ?summary.seeds,
        steps = params.sampler.steps,
        cfg = params.sampler.cfg,
        sampler = %params.sampler.sampler_name,
        scheduler = %params.sampler.scheduler,
        "Applied generation parameters",
    );

    Ok(summary)
}

fn write_sampler_settings(
    graph: &mut JobGraph,
    id: &str,
    settings: &SamplerSettings,
) -> Result<(), CoreError> {
    set_input(graph, id, "steps", json!(settings.steps))?;
    set_input(graph, id, "cfg", json!(settings.cfg))?;
    set_input(graph, id, "sampler_name", json!(settings.sampler_name))?;
    set_input(graph, id, "scheduler", json!(settings.scheduler))
}

/// One seed per sampler. Random seeds are redrawn on collision so no two
/// samplers of a job share noise.
fn draw_seeds(policy: SeedPolicy, count: usize) -> Vec<u64> {
    match policy {
        SeedPolicy::Fixed(seed) => vec![seed; count],
        SeedPolicy::Random => {
            let mut rng = rand::rng();
            let mut seeds: Vec<u64> = Vec::with_capacity(count);
            while seeds.len() < count {
                let seed = rng.random_range(SEED_MIN..=SEED_MAX);
                if !seeds.contains(&seed) {
                    seeds.push(seed);
                }
            }
            seeds
        }
    }
}

fn class_of<'a>(graph: &'a JobGraph, id: &str) -> Option<&'a str> {
    graph.get(id).map(|node| node.class_type.as_str())
}

fn has_input(graph: &JobGraph, id: &str, field: &str) -> bool {
    graph.get(id).is_some_and(|node| node.has_input(field))
}

fn set_input(
    graph: &mut JobGraph,
    node_id: &str,
    field: &'static str,
    value: Value,
) -> Result<(), CoreError> {
    let slot = graph
        .get_mut(node_id)
        .and_then(|node| node.inputs.get_mut(field))
        .ok_or_else(|| CoreError::MutationTargetMissing {
            node_id: node_id.to_string(),
            field,
        })?;
    *slot = value;
    Ok(())
}
