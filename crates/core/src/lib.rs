//! Domain logic for portrait generation jobs.
//!
//! Everything here is synchronous and free of network I/O: job graph
//! documents, the template store, node role resolution, graph mutation,
//! rendering styles and prompt assembly. The network client lives in
//! `zeniji-comfyui`.

pub mod error;
pub mod graph;
pub mod mutator;
pub mod prompt;
pub mod roles;
pub mod style;
pub mod template;
pub mod types;
