//! Shared types, error model, and configuration for Grove.
//!
//! This crate is the foundation depended on by the other Grove crates.
//! It provides:
//! - [`GroveError`], the unified error type
//! - The knowledge model ([`KnowledgeNode`], [`NodeType`], [`PageRecord`], [`PageType`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeConfig, CacheKey, ClassificationConfig, DEFAULT_MAX_PAGE_CHARS,
    DEFAULT_RELEVANCE_THRESHOLD, PathsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{GroveError, Result};
pub use types::{
    ClockDomain, KnowledgeNode, MAX_RELEVANCE_SCORE, NodeType, PageRecord, PageType,
    SideChannelFacts, TreeAudit,
};
