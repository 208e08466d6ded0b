//! Node role resolution.
//!
//! The mutator never addresses nodes by hard-coded id. Instead a
//! [`NodeRoleMap`] is built once per submission: every abstract role
//! (positive prompt, model loader, samplers, ...) is mapped to concrete
//! node ids of the graph at hand.
//!
//! Resolution runs in two phases:
//!
//! 1. **Fixed-id probe** -- the conventional ids of the bundled templates
//!    (`3` sampler, `6`/`7` prompts, `16`-`18` loaders) are checked for a
//!    matching class type and claimed. The negative prompt id `7` is only
//!    trusted when `6` matched too; in a graph renumbered by one, `7` is
//!    the positive prompt.
//! 2. **Scan** -- every role still unresolved takes the first node, in
//!    document order, whose class type matches and that no other role has
//!    claimed.
//!
//! Multi-instance roles (samplers, style adapters) collect every match.

use std::collections::HashSet;
use std::fmt;

use crate::error::CoreError;
use crate::graph::JobGraph;

// ---------------------------------------------------------------------------
// ComfyUI class types
// ---------------------------------------------------------------------------

pub const CLIP_TEXT_ENCODE_CLASS: &str = "CLIPTextEncode";
pub const UNET_LOADER_CLASS: &str = "UNETLoader";
pub const CHECKPOINT_LOADER_CLASS: &str = "CheckpointLoaderSimple";
pub const CLIP_LOADER_CLASS: &str = "CLIPLoader";
pub const VAE_LOADER_CLASS: &str = "VAELoader";
pub const LORA_LOADER_CLASS: &str = "LoraLoader";
pub const LORA_LOADER_MODEL_ONLY_CLASS: &str = "LoraLoaderModelOnly";
pub const UPSCALE_MODEL_LOADER_CLASS: &str = "UpscaleModelLoader";
pub const KSAMPLER_CLASS: &str = "KSampler";
pub const KSAMPLER_ADVANCED_CLASS: &str = "KSamplerAdvanced";

const SAMPLER_CLASSES: &[&str] = &[KSAMPLER_CLASS, KSAMPLER_ADVANCED_CLASS];
const STYLE_ADAPTER_CLASSES: &[&str] = &[LORA_LOADER_CLASS, LORA_LOADER_MODEL_ONLY_CLASS];

/// Conventional id of the primary sampler in the bundled templates.
const PRIMARY_SAMPLER_ID: &str = "3";

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Single-instance roles a graph node can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    PositivePrompt,
    NegativePrompt,
    ModelLoader,
    TextEncoder,
    Decoder,
    Upscaler,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::PositivePrompt => "positive_prompt",
            Role::NegativePrompt => "negative_prompt",
            Role::ModelLoader => "model_loader",
            Role::TextEncoder => "text_encoder",
            Role::Decoder => "decoder",
            Role::Upscaler => "upscaler",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single-instance role is located.
struct RoleRule {
    role: Role,
    fixed_id: Option<&'static str>,
    /// The fixed id is only used when this role was also resolved by its
    /// fixed id.
    fixed_with: Option<Role>,
    class_types: &'static [&'static str],
}

/// Resolution order matters: positive is claimed before negative so the
/// scan gives the first prompt node to the positive role.
const ROLE_RULES: &[RoleRule] = &[
    RoleRule {
        role: Role::PositivePrompt,
        fixed_id: Some("6"),
        fixed_with: None,
        class_types: &[CLIP_TEXT_ENCODE_CLASS],
    },
    RoleRule {
        role: Role::NegativePrompt,
        fixed_id: Some("7"),
        fixed_with: Some(Role::PositivePrompt),
        class_types: &[CLIP_TEXT_ENCODE_CLASS],
    },
    RoleRule {
        role: Role::ModelLoader,
        fixed_id: Some("16"),
        fixed_with: None,
        class_types: &[UNET_LOADER_CLASS, CHECKPOINT_LOADER_CLASS],
    },
    RoleRule {
        role: Role::Decoder,
        fixed_id: Some("17"),
        fixed_with: None,
        class_types: &[VAE_LOADER_CLASS],
    },
    RoleRule {
        role: Role::TextEncoder,
        fixed_id: Some("18"),
        fixed_with: None,
        class_types: &[CLIP_LOADER_CLASS],
    },
    RoleRule {
        role: Role::Upscaler,
        fixed_id: None,
        fixed_with: None,
        class_types: &[UPSCALE_MODEL_LOADER_CLASS],
    },
];

// ---------------------------------------------------------------------------
// NodeRoleMap
// ---------------------------------------------------------------------------

/// Resolved mapping from roles to node ids of one specific graph.
///
/// Every id stored here exists in the graph the map was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRoleMap {
    positive_prompt: String,
    negative_prompt: Option<String>,
    model_loader: Option<String>,
    text_encoder: Option<String>,
    decoder: Option<String>,
    upscaler: Option<String>,
    /// Non-empty; the first entry is the primary sampler.
    samplers: Vec<String>,
    style_adapters: Vec<String>,
}

impl NodeRoleMap {
    pub fn get(&self, role: Role) -> Option<&str> {
        match role {
            Role::PositivePrompt => Some(self.positive_prompt.as_str()),
            Role::NegativePrompt => self.negative_prompt.as_deref(),
            Role::ModelLoader => self.model_loader.as_deref(),
            Role::TextEncoder => self.text_encoder.as_deref(),
            Role::Decoder => self.decoder.as_deref(),
            Role::Upscaler => self.upscaler.as_deref(),
        }
    }

    pub fn positive_prompt(&self) -> &str {
        &self.positive_prompt
    }

    pub fn primary_sampler(&self) -> &str {
        &self.samplers[0]
    }

    pub fn secondary_samplers(&self) -> &[String] {
        &self.samplers[1..]
    }

    pub fn samplers(&self) -> &[String] {
        &self.samplers
    }

    pub fn style_adapters(&self) -> &[String] {
        &self.style_adapters
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve every role of `graph`.
///
/// Fails with [`CoreError::RoleResolutionFailed`] when the graph has no
/// positive prompt node or no sampler. Other roles are optional.
pub fn resolve_roles(graph: &JobGraph) -> Result<NodeRoleMap, CoreError> {
    let mut claimed: HashSet<&str> = HashSet::new();
    let mut resolved: Vec<(Role, String)> = Vec::with_capacity(ROLE_RULES.len());

    // Phase 1: conventional ids.
    for rule in ROLE_RULES {
        let Some(id) = rule.fixed_id else { continue };
        if let Some(partner) = rule.fixed_with {
            if !resolved.iter().any(|(role, _)| *role == partner) {
                continue;
            }
        }
        if let Some(node) = graph.get(id) {
            if rule.class_types.contains(&node.class_type.as_str()) && claimed.insert(id) {
                resolved.push((rule.role, id.to_string()));
            }
        }
    }

    // Phase 2: type-tag scan for whatever is left.
    for rule in ROLE_RULES {
        if resolved.iter().any(|(role, _)| *role == rule.role) {
            continue;
        }
        let found = graph.iter().find(|(id, node)| {
            rule.class_types.contains(&node.class_type.as_str()) && !claimed.contains(id)
        });
        if let Some((id, node)) = found {
            if rule.fixed_id.is_some() {
                tracing::warn!(
                    role = %rule.role,
                    node_id = id,
                    class_type = %node.class_type,
                    "Conventional node id not usable, resolved role by class type scan",
                );
            }
            claimed.insert(id);
            resolved.push((rule.role, id.to_string()));
        }
    }

    let take = |role: Role| {
        resolved
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, id)| id.clone())
    };

    let positive_prompt = take(Role::PositivePrompt).ok_or_else(|| {
        CoreError::RoleResolutionFailed(format!(
            "no {CLIP_TEXT_ENCODE_CLASS} node available for the positive prompt"
        ))
    })?;

    let samplers = collect_samplers(graph);
    if samplers.is_empty() {
        return Err(CoreError::RoleResolutionFailed(format!(
            "no sampler node ({}) found",
            SAMPLER_CLASSES.join(" / ")
        )));
    }

    let style_adapters = collect_by_class(graph, STYLE_ADAPTER_CLASSES);

    Ok(NodeRoleMap {
        positive_prompt,
        negative_prompt: take(Role::NegativePrompt),
        model_loader: take(Role::ModelLoader),
        text_encoder: take(Role::TextEncoder),
        decoder: take(Role::Decoder),
        upscaler: take(Role::Upscaler),
        samplers,
        style_adapters,
    })
}

/// Samplers in first-seen order, with the conventional primary id first
/// when it is a sampler.
fn collect_samplers(graph: &JobGraph) -> Vec<String> {
    let mut samplers = Vec::new();
    let primary_is_sampler = graph
        .get(PRIMARY_SAMPLER_ID)
        .is_some_and(|node| SAMPLER_CLASSES.contains(&node.class_type.as_str()));

    if primary_is_sampler {
        samplers.push(PRIMARY_SAMPLER_ID.to_string());
    }
    for id in collect_by_class(graph, SAMPLER_CLASSES) {
        if !samplers.contains(&id) {
            samplers.push(id);
        }
    }
    samplers
}

fn collect_by_class(graph: &JobGraph, class_types: &[&str]) -> Vec<String> {
    graph
        .iter()
        .filter(|(_, node)| class_types.contains(&node.class_type.as_str()))
        .map(|(id, _)| id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeSpec;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn canonical() -> JobGraph {
        serde_json::from_value(json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 1, "steps": 9, "cfg": 1.0,
                  "sampler_name": "euler", "scheduler": "simple"}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
            "7": {"class_type": "CLIPTextEncode", "inputs": {"text": ""}},
            "9": {"class_type": "SaveImage", "inputs": {}},
            "16": {"class_type": "UNETLoader", "inputs": {"unet_name": ""}},
            "17": {"class_type": "VAELoader", "inputs": {"vae_name": ""}},
            "18": {"class_type": "CLIPLoader", "inputs": {"clip_name": ""}}
        }))
        .unwrap()
    }

    #[test]
    fn canonical_graph_uses_fixed_ids() {
        let roles = resolve_roles(&canonical()).unwrap();
        assert_eq!(roles.positive_prompt(), "6");
        assert_eq!(roles.get(Role::NegativePrompt), Some("7"));
        assert_eq!(roles.get(Role::ModelLoader), Some("16"));
        assert_eq!(roles.get(Role::Decoder), Some("17"));
        assert_eq!(roles.get(Role::TextEncoder), Some("18"));
        assert_eq!(roles.get(Role::Upscaler), None);
        assert_eq!(roles.samplers(), ["3"]);
        assert!(roles.style_adapters().is_empty());
    }

    #[test]
    fn fixed_id_with_wrong_class_falls_back_to_scan() {
        let mut graph = JobGraph::new();
        graph.insert("6", NodeSpec::new("EmptyLatentImage"));
        graph.insert("3", NodeSpec::new("KSampler"));
        graph.insert("21", NodeSpec::new("CLIPTextEncode"));

        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.positive_prompt(), "21");
        assert_eq!(roles.get(Role::NegativePrompt), None);
    }

    #[test]
    fn scan_skips_ids_claimed_by_fixed_ids() {
        // "6" is claimed by the positive role; the negative scan must not
        // take it even though it comes first in document order.
        let mut graph = JobGraph::new();
        graph.insert("6", NodeSpec::new("CLIPTextEncode"));
        graph.insert("42", NodeSpec::new("CLIPTextEncode"));
        graph.insert("3", NodeSpec::new("KSampler"));

        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.positive_prompt(), "6");
        assert_eq!(roles.get(Role::NegativePrompt), Some("42"));
    }

    #[test]
    fn negative_fixed_id_needs_positive_fixed_id() {
        let mut graph = JobGraph::new();
        graph.insert("4", NodeSpec::new("KSampler"));
        graph.insert("7", NodeSpec::new("CLIPTextEncode"));
        graph.insert("8", NodeSpec::new("CLIPTextEncode"));

        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.positive_prompt(), "7");
        assert_eq!(roles.get(Role::NegativePrompt), Some("8"));
    }

    #[test]
    fn checkpoint_loader_fills_model_role() {
        let mut graph = canonical();
        graph.insert("16", NodeSpec::new("CheckpointLoaderSimple"));
        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.get(Role::ModelLoader), Some("16"));
    }

    #[test]
    fn multiple_samplers_keep_conventional_primary_first() {
        let mut graph = JobGraph::new();
        graph.insert("30", NodeSpec::new("KSamplerAdvanced"));
        graph.insert("6", NodeSpec::new("CLIPTextEncode"));
        graph.insert("3", NodeSpec::new("KSampler"));

        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.primary_sampler(), "3");
        assert_eq!(roles.secondary_samplers(), ["30"]);
    }

    #[test]
    fn style_adapters_collected_in_document_order() {
        let mut graph = canonical();
        graph.insert("40", NodeSpec::new("LoraLoaderModelOnly"));
        graph.insert("20", NodeSpec::new("LoraLoader"));
        graph.insert("50", NodeSpec::new("UpscaleModelLoader"));

        let roles = resolve_roles(&graph).unwrap();
        assert_eq!(roles.style_adapters(), ["40", "20"]);
        assert_eq!(roles.get(Role::Upscaler), Some("50"));
    }

    #[test]
    fn missing_positive_prompt_fails() {
        let mut graph = JobGraph::new();
        graph.insert("3", NodeSpec::new("KSampler"));
        assert_matches!(resolve_roles(&graph), Err(CoreError::RoleResolutionFailed(_)));
    }

    #[test]
    fn missing_sampler_fails() {
        let mut graph = JobGraph::new();
        graph.insert("6", NodeSpec::new("CLIPTextEncode"));
        assert_matches!(resolve_roles(&graph), Err(CoreError::RoleResolutionFailed(_)));
    }

    #[test]
    fn every_resolved_id_exists_in_graph() {
        let graph = canonical();
        let roles = resolve_roles(&graph).unwrap();
        let single = [
            Role::PositivePrompt,
            Role::NegativePrompt,
            Role::ModelLoader,
            Role::TextEncoder,
            Role::Decoder,
            Role::Upscaler,
        ];
        for role in single {
            if let Some(id) = roles.get(role) {
                assert!(graph.contains(id), "{role} -> {id} dangling");
            }
        }
        for id in roles.samplers().iter().chain(roles.style_adapters()) {
            assert!(graph.contains(id));
        }
    }
}
