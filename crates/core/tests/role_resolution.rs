//! Integration tests for role resolution and mutation on realistic
//! templates.
//!
//! Verifies that the type-tag scan finds the same roles on a renumbered
//! graph as the fixed-id probe finds on the bundled template shape.

use serde_json::json;
use zeniji_core::graph::{JobGraph, NodeSpec};
use zeniji_core::mutator::{self, GenerationParams, SeedPolicy};
use zeniji_core::roles::{resolve_roles, Role};

/// Node layout of the bundled photoreal template.
fn canonical_nodes() -> Vec<(&'static str, NodeSpec)> {
    vec![
        (
            "3",
            NodeSpec::new("KSampler")
                .with_input("seed", json!(0))
                .with_input("steps", json!(9))
                .with_input("cfg", json!(1.0))
                .with_input("sampler_name", json!("euler"))
                .with_input("scheduler", json!("simple"))
                .with_input("model", json!(["16", 0]))
                .with_input("positive", json!(["6", 0]))
                .with_input("negative", json!(["7", 0])),
        ),
        ("6", NodeSpec::new("CLIPTextEncode").with_input("text", json!(""))),
        ("7", NodeSpec::new("CLIPTextEncode").with_input("text", json!(""))),
        ("8", NodeSpec::new("VAEDecode")),
        ("9", NodeSpec::new("SaveImage")),
        ("16", NodeSpec::new("UNETLoader").with_input("unet_name", json!(""))),
        ("17", NodeSpec::new("VAELoader").with_input("vae_name", json!(""))),
        ("18", NodeSpec::new("CLIPLoader").with_input("clip_name", json!(""))),
    ]
}

fn build(offset: u32) -> JobGraph {
    canonical_nodes()
        .into_iter()
        .map(|(id, node)| {
            let id: u32 = id.parse().unwrap();
            ((id + offset).to_string(), node)
        })
        .collect()
}

fn renumbered(id: &str, offset: u32) -> String {
    (id.parse::<u32>().unwrap() + offset).to_string()
}

// ---------------------------------------------------------------------------
// Test: scan fallback matches fixed-id fast path
// ---------------------------------------------------------------------------

#[test]
fn renumbered_graph_resolves_same_roles_as_canonical() {
    let canonical = resolve_roles(&build(0)).unwrap();

    for offset in [1, 100, 1000, 37] {
        let shifted = resolve_roles(&build(offset)).unwrap();

        for role in [
            Role::PositivePrompt,
            Role::NegativePrompt,
            Role::ModelLoader,
            Role::TextEncoder,
            Role::Decoder,
            Role::Upscaler,
        ] {
            let expected = canonical.get(role).map(|id| renumbered(id, offset));
            assert_eq!(
                shifted.get(role).map(str::to_string),
                expected,
                "role {role} differs at offset {offset}"
            );
        }
        assert_eq!(
            shifted.samplers(),
            [renumbered(canonical.primary_sampler(), offset)]
        );
    }
}

// ---------------------------------------------------------------------------
// Test: positive prompt at a non-conventional id
// ---------------------------------------------------------------------------

#[test]
fn prompt_written_into_non_conventional_node() {
    let mut graph = JobGraph::new();
    graph.insert(
        "3",
        NodeSpec::new("KSampler")
            .with_input("seed", json!(0))
            .with_input("steps", json!(20))
            .with_input("cfg", json!(7.0))
            .with_input("sampler_name", json!("euler"))
            .with_input("scheduler", json!("normal")),
    );
    graph.insert("42", NodeSpec::new("CLIPTextEncode").with_input("text", json!("")));
    graph.insert("9", NodeSpec::new("SaveImage"));

    let roles = resolve_roles(&graph).unwrap();
    assert_eq!(roles.positive_prompt(), "42");

    let params = GenerationParams {
        prompt: "a castle at dusk".to_string(),
        seed: SeedPolicy::Fixed(7),
        ..Default::default()
    };
    mutator::apply(&mut graph, &roles, &params).unwrap();

    assert_eq!(graph.input("42", "text"), Some(&json!("a castle at dusk")));
    assert_eq!(graph.input("3", "seed"), Some(&json!(7)));
}

// ---------------------------------------------------------------------------
// Test: graph shifted by one keeps the prompt out of the negative node
// ---------------------------------------------------------------------------

#[test]
fn prompt_lands_in_positive_node_after_shift_by_one() {
    let mut graph = build(1);
    let roles = resolve_roles(&graph).unwrap();
    assert_eq!(roles.positive_prompt(), "7");
    assert_eq!(roles.get(Role::NegativePrompt), Some("8"));

    let params = GenerationParams {
        prompt: "a lighthouse in fog".to_string(),
        seed: SeedPolicy::Fixed(11),
        ..Default::default()
    };
    mutator::apply(&mut graph, &roles, &params).unwrap();

    assert_eq!(graph.input("7", "text"), Some(&json!("a lighthouse in fog")));
    assert_eq!(graph.input("8", "text"), Some(&json!("")));
}
