//! Build and navigation logic for datasheet knowledge trees.
//!
//! Phase 1 classifies corpus pages into a manifest, phase 2 organizes the
//! manifest into a knowledge tree, and the navigator and query tools answer
//! questions about a persisted tree.

pub mod bridge;
pub mod classify;
pub mod construct;
pub mod corpus;
pub mod navigator;
pub mod pipeline;
pub mod store;
pub mod tools;

pub use bridge::ServiceBridge;
pub use classify::PageClassifier;
pub use construct::TreeConstructor;
pub use corpus::{Corpus, PageDocument};
pub use navigator::{ConfigurationEntry, NodeContext, TreeNavigator};
pub use pipeline::{
    BuildConfig, BuildProgress, BuildReport, ManifestSource, SilentProgress, TreeOutcome,
    build_knowledge_tree,
};
pub use tools::{DatasheetTools, ToolDefinition, tool_definitions};
