//! Read-only navigation over a persisted knowledge tree.

use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use grove_shared::{GroveError, KnowledgeNode, NodeType, Result};

use crate::store;

/// One selectable configuration (a `sub_mode` node).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationEntry {
    pub id: String,
    /// Breadcrumb of enclosing groups, e.g. `Serial > 3wire_busy`.
    pub name: String,
    pub description: String,
    pub condition: String,
}

/// Everything needed to answer a question about one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeContext {
    pub config_id: String,
    pub config_name: String,
    pub apply_condition: String,
    /// Deduplicated, sorted page ids.
    pub relevant_pages: Vec<String>,
}

/// A loaded knowledge tree.
#[derive(Debug, Clone)]
pub struct TreeNavigator {
    root: KnowledgeNode,
}

impl TreeNavigator {
    /// Load and validate the tree at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let root = store::load_tree(path)?;
        debug!(path = %path.display(), nodes = root.node_count(), "knowledge tree loaded");
        Self::from_root(root)
    }

    /// Wrap an already-parsed tree. The top node must be `root`.
    pub fn from_root(root: KnowledgeNode) -> Result<Self> {
        if root.node_type != NodeType::Root {
            return Err(GroveError::schema_at(
                &root.id,
                format!("top-level node has type '{}', expected 'root'", root.node_type),
            ));
        }

        let audit = root.audit();
        if !audit.duplicate_ids.is_empty() {
            warn!(ids = ?audit.duplicate_ids, "duplicate node ids, lookups use the first match");
        }
        if !audit.nested_roots.is_empty() {
            warn!(ids = ?audit.nested_roots, "root nodes below the top of the tree");
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &KnowledgeNode {
        &self.root
    }

    /// All `sub_mode` nodes in pre-order, named by their breadcrumb.
    pub fn list_configurations(&self) -> Vec<ConfigurationEntry> {
        let mut entries = Vec::new();
        collect_configurations(&self.root, "", &mut entries);
        entries
    }

    /// Context for the first node with `target_id`, including global pages.
    pub fn get_node_context(&self, target_id: &str) -> Result<NodeContext> {
        let target = self
            .root
            .find(target_id)
            .ok_or_else(|| GroveError::not_found(format!("node {target_id}")))?;

        let mut pages = BTreeSet::new();
        target.collect_content_refs(&mut pages);

        for child in &self.root.children {
            if child.node_type == NodeType::LeafFact {
                pages.extend(child.content_refs.iter().cloned());
            }
            if child.is_global() {
                child.collect_content_refs(&mut pages);
            }
        }

        Ok(NodeContext {
            config_id: target.id.clone(),
            config_name: target.title.clone(),
            apply_condition: target.apply_condition.clone(),
            relevant_pages: pages.into_iter().collect(),
        })
    }
}

fn collect_configurations(node: &KnowledgeNode, path: &str, out: &mut Vec<ConfigurationEntry>) {
    let breadcrumb = if path.is_empty() {
        node.title.clone()
    } else {
        format!("{path} > {}", node.title)
    };

    if node.node_type == NodeType::SubMode {
        out.push(ConfigurationEntry {
            id: node.id.clone(),
            name: breadcrumb.clone(),
            description: node.description.clone(),
            condition: node.apply_condition.clone(),
        });
    }

    // The root's title never appears in a breadcrumb.
    let child_path = if node.node_type == NodeType::Root {
        ""
    } else {
        breadcrumb.as_str()
    };

    for child in &node.children {
        if matches!(child.node_type, NodeType::ModeGroup | NodeType::SubMode) {
            collect_configurations(child, child_path, out);
        }
    }
}
