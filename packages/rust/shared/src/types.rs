//! Core domain types: per-page classification records and the knowledge tree.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GroveError, Result};

/// Highest valid `relevance_score`.
pub const MAX_RELEVANCE_SCORE: u8 = 10;

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// What kind of content a datasheet page carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    TimingSpec,
    Pinout,
    Protocol,
    RegisterMap,
    BlockDiagram,
    Electrical,
    Mechanical,
    Marketing,
    Irrelevant,
}

/// Classification of a single source page. One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    /// Stable page name (e.g. `page_006`).
    pub page_id: String,
    pub page_type: PageType,
    /// Utility of the page to the downstream consumer, 0-10.
    pub relevance_score: u8,
    pub summary: String,
    /// Signals in extraction order; not deduplicated. Required, may be empty.
    pub key_signals: Vec<String>,
}

impl PageRecord {
    /// Record substituted for a page whose classification failed.
    pub fn failed(page_id: impl Into<String>, reason: &str) -> Self {
        Self {
            page_id: page_id.into(),
            page_type: PageType::Irrelevant,
            relevance_score: 0,
            summary: format!("Classification failed: {reason}"),
            key_signals: Vec::new(),
        }
    }

    /// Reject records carrying an out-of-range score.
    pub fn validate(&self) -> Result<()> {
        if self.relevance_score > MAX_RELEVANCE_SCORE {
            return Err(GroveError::schema(format!(
                "page '{}': relevance_score {} exceeds {MAX_RELEVANCE_SCORE}",
                self.page_id, self.relevance_score
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Side-channel facts
// ---------------------------------------------------------------------------

/// Clock or trigger descriptor extracted from a timing diagram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockDomain {
    #[serde(default)]
    pub signal: Option<String>,
    #[serde(default)]
    pub active_edge: Option<String>,
}

/// Structured facts extracted from a page image by an out-of-core process.
///
/// Only the fields the builder reads are typed; everything else is kept in
/// `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideChannelFacts {
    #[serde(default)]
    pub operating_mode: Option<String>,
    #[serde(default)]
    pub clock_domain: Option<ClockDomain>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// NodeType
// ---------------------------------------------------------------------------

/// Role of a node in the knowledge tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    #[serde(alias = "device_root")]
    Root,
    ModeGroup,
    SubMode,
    LeafFact,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::ModeGroup => "mode_group",
            Self::SubMode => "sub_mode",
            Self::LeafFact => "leaf_fact",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" | "device_root" => Ok(Self::Root),
            "mode_group" => Ok(Self::ModeGroup),
            "sub_mode" => Ok(Self::SubMode),
            "leaf_fact" => Ok(Self::LeafFact),
            other => Err(format!(
                "unknown node type '{other}' (expected root, mode_group, sub_mode or leaf_fact)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// KnowledgeNode
// ---------------------------------------------------------------------------

/// A node in the knowledge tree. The root owns the whole tree.
///
/// Deserialization goes through [`KnowledgeNode::from_value`], so every
/// load path validates the full structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct KnowledgeNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub title: String,
    pub description: String,
    /// When this node's content is relevant.
    pub apply_condition: String,
    /// Page ids this node contributes directly.
    pub content_refs: Vec<String>,
    /// Ordered children; order defines traversal and breadcrumb order.
    pub children: Vec<KnowledgeNode>,
}

/// Findings of [`KnowledgeNode::audit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeAudit {
    /// Ids seen more than once, in pre-order of their repeat occurrence.
    pub duplicate_ids: Vec<String>,
    /// Ids of `root` nodes found below the top node.
    pub nested_roots: Vec<String>,
    /// Ids of nodes whose `apply_condition` is empty.
    pub empty_conditions: Vec<String>,
}

impl TreeAudit {
    /// No structural invariant is violated. Empty conditions are tolerated.
    pub fn is_sound(&self) -> bool {
        self.duplicate_ids.is_empty() && self.nested_roots.is_empty()
    }
}

impl KnowledgeNode {
    /// Parse and validate a tree from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| GroveError::schema(format!("invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    /// Validate a generic JSON value as a node, recursively.
    pub fn from_value(value: &Value) -> Result<Self> {
        Self::parse_node(value, None)
    }

    fn parse_node(value: &Value, parent: Option<(&str, usize)>) -> Result<Self> {
        let located = |msg: &str| match parent {
            Some((parent_id, index)) => {
                GroveError::schema_at(parent_id, format!("child {index}: {msg}"))
            }
            None => GroveError::schema(format!("top-level node: {msg}")),
        };

        let obj = value
            .as_object()
            .ok_or_else(|| located("expected an object"))?;

        let id = match obj.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(located("field `id` must be a string")),
            None => return Err(located("missing field `id`")),
        };

        let node_type = match obj.get("type") {
            Some(Value::String(raw)) => raw
                .parse::<NodeType>()
                .map_err(|e| GroveError::schema_at(&id, e))?,
            Some(_) => return Err(GroveError::schema_at(&id, "field `type` must be a string")),
            None => return Err(GroveError::schema_at(&id, "missing field `type`")),
        };

        let title = required_str(obj, "title", &id)?;
        let description = required_str(obj, "description", &id)?;
        let apply_condition = required_str(obj, "apply_condition", &id)?;

        let content_refs = match obj.get("content_refs") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_owned).ok_or_else(|| {
                        GroveError::schema_at(&id, "`content_refs` must contain only strings")
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(GroveError::schema_at(&id, "field `content_refs` must be an array"));
            }
        };

        let children = match obj.get("children") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, child)| Self::parse_node(child, Some((id.as_str(), index))))
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(GroveError::schema_at(&id, "field `children` must be an array")),
        };

        Ok(Self {
            id,
            node_type,
            title,
            description,
            apply_condition,
            content_refs,
            children,
        })
    }

    /// First node in pre-order whose id equals `id`.
    pub fn find(&self, id: &str) -> Option<&KnowledgeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Add this node's refs and those of every descendant to `refs`.
    pub fn collect_content_refs(&self, refs: &mut BTreeSet<String>) {
        refs.extend(self.content_refs.iter().cloned());
        for child in &self.children {
            child.collect_content_refs(refs);
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(KnowledgeNode::node_count).sum::<usize>()
    }

    /// Whether `title` case-insensitively starts with "global".
    pub fn is_global(&self) -> bool {
        self.title.to_lowercase().starts_with("global")
    }

    /// Check the tree-wide invariants the type system cannot express.
    pub fn audit(&self) -> TreeAudit {
        let mut audit = TreeAudit::default();
        let mut seen = HashSet::new();
        self.audit_into(true, &mut seen, &mut audit);
        audit
    }

    fn audit_into<'a>(&'a self, top: bool, seen: &mut HashSet<&'a str>, audit: &mut TreeAudit) {
        if !seen.insert(self.id.as_str()) {
            audit.duplicate_ids.push(self.id.clone());
        }
        if !top && self.node_type == NodeType::Root {
            audit.nested_roots.push(self.id.clone());
        }
        if self.apply_condition.trim().is_empty() {
            audit.empty_conditions.push(self.id.clone());
        }
        for child in &self.children {
            child.audit_into(false, seen, audit);
        }
    }
}

impl TryFrom<Value> for KnowledgeNode {
    type Error = GroveError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}

fn required_str(obj: &Map<String, Value>, field: &str, id: &str) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(GroveError::schema_at(
            id,
            format!("field `{field}` must be a string"),
        )),
        None => Err(GroveError::schema_at(id, format!("missing field `{field}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, node_type: NodeType, refs: &[&str], children: Vec<KnowledgeNode>) -> KnowledgeNode {
        KnowledgeNode {
            id: id.into(),
            node_type,
            title: id.into(),
            description: String::new(),
            apply_condition: "always".into(),
            content_refs: refs.iter().map(|r| (*r).to_string()).collect(),
            children,
        }
    }

    #[test]
    fn page_record_serialization_uses_snake_case() {
        let record = PageRecord {
            page_id: "page_006".into(),
            page_type: PageType::TimingSpec,
            relevance_score: 9,
            summary: "Conversion timing".into(),
            key_signals: vec!["CNV".into(), "SDO".into(), "CNV".into()],
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains(r#""page_type":"timing_spec""#));

        let parsed: PageRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, record);
    }

    #[test]
    fn page_record_rejects_unknown_page_type() {
        let json = r#"{"page_id":"p","page_type":"poetry","relevance_score":1,"summary":"","key_signals":[]}"#;
        assert!(serde_json::from_str::<PageRecord>(json).is_err());
    }

    #[test]
    fn page_record_requires_key_signals() {
        let json = r#"{"page_id":"p","page_type":"pinout","relevance_score":5,"summary":"pins"}"#;
        let err = serde_json::from_str::<PageRecord>(json).unwrap_err();
        assert!(err.to_string().contains("key_signals"));
    }

    #[test]
    fn page_record_validate_score_range() {
        let mut record = PageRecord::failed("page_001", "boom");
        assert!(record.validate().is_ok());
        record.relevance_score = 11;
        assert!(record.validate().is_err());
    }

    #[test]
    fn failed_record_is_irrelevant() {
        let record = PageRecord::failed("page_002", "timeout");
        assert_eq!(record.page_type, PageType::Irrelevant);
        assert_eq!(record.relevance_score, 0);
        assert!(record.summary.contains("timeout"));
        assert!(record.key_signals.is_empty());
    }

    #[test]
    fn side_channel_facts_keep_extra_fields() {
        let json = r#"{"operating_mode":"3-Wire CS","clock_domain":{"signal":"SCK","active_edge":"Falling"},"notes":"see footnote"}"#;
        let facts: SideChannelFacts = serde_json::from_str(json).expect("parse");
        assert_eq!(facts.operating_mode.as_deref(), Some("3-Wire CS"));
        assert_eq!(
            facts.clock_domain.as_ref().and_then(|c| c.signal.as_deref()),
            Some("SCK")
        );
        assert_eq!(facts.extra["notes"], "see footnote");
    }

    #[test]
    fn node_type_accepts_legacy_root_spelling() {
        assert_eq!("device_root".parse::<NodeType>(), Ok(NodeType::Root));
        assert_eq!("root".parse::<NodeType>(), Ok(NodeType::Root));
        assert!("branch".parse::<NodeType>().is_err());
    }

    #[test]
    fn node_serializes_children_even_when_empty() {
        let leaf = node("leaf", NodeType::LeafFact, &[], vec![]);
        let value = serde_json::to_value(&leaf).expect("serialize");
        assert_eq!(value["type"], "leaf_fact");
        assert_eq!(value["children"], json!([]));
        assert_eq!(value["content_refs"], json!([]));
    }

    #[test]
    fn node_roundtrip_preserves_child_order() {
        let tree = node(
            "dev",
            NodeType::Root,
            &[],
            vec![
                node("b", NodeType::ModeGroup, &[], vec![]),
                node("a", NodeType::ModeGroup, &[], vec![]),
            ],
        );
        let json = serde_json::to_string(&tree).expect("serialize");
        let parsed: KnowledgeNode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, tree);
        assert_eq!(parsed.children[0].id, "b");
    }

    #[test]
    fn node_defaults_optional_sequences() {
        let value = json!({
            "id": "dev",
            "type": "root",
            "title": "Device",
            "description": "",
            "apply_condition": "always"
        });
        let parsed = KnowledgeNode::from_value(&value).expect("parse");
        assert!(parsed.children.is_empty());
        assert!(parsed.content_refs.is_empty());
    }

    #[test]
    fn node_rejects_unknown_type() {
        let value = json!({
            "id": "dev", "type": "branch", "title": "", "description": "", "apply_condition": ""
        });
        let err = KnowledgeNode::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("unknown node type 'branch'"));
    }

    #[test]
    fn node_rejects_missing_id() {
        let value = json!({ "type": "root", "title": "", "description": "", "apply_condition": "" });
        let err = KnowledgeNode::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("missing field `id`"));
    }

    #[test]
    fn node_rejects_non_sequence_children() {
        let value = json!({
            "id": "dev", "type": "root", "title": "", "description": "", "apply_condition": "",
            "children": {"id": "x"}
        });
        let err = KnowledgeNode::from_value(&value).unwrap_err();
        assert!(err.to_string().contains("`children` must be an array"));
    }

    #[test]
    fn nested_failure_reports_offending_node() {
        let value = json!({
            "id": "dev", "type": "root", "title": "", "description": "", "apply_condition": "",
            "children": [{
                "id": "serial", "type": "mode_group", "title": "Serial", "description": "",
                "apply_condition": "",
                "children": [{
                    "id": "3wire", "type": "sub_mode", "description": "", "apply_condition": ""
                }]
            }]
        });
        match KnowledgeNode::from_value(&value).unwrap_err() {
            GroveError::Schema { node_id, message } => {
                assert_eq!(node_id.as_deref(), Some("3wire"));
                assert!(message.contains("missing field `title`"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn nested_child_without_id_reports_parent() {
        let value = json!({
            "id": "dev", "type": "root", "title": "", "description": "", "apply_condition": "",
            "children": [{ "type": "leaf_fact" }]
        });
        match KnowledgeNode::from_value(&value).unwrap_err() {
            GroveError::Schema { node_id, message } => {
                assert_eq!(node_id.as_deref(), Some("dev"));
                assert!(message.contains("child 0"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn find_returns_first_preorder_match() {
        let mut first = node("dup", NodeType::SubMode, &["page_001"], vec![]);
        first.title = "first".into();
        let mut second = node("dup", NodeType::SubMode, &["page_002"], vec![]);
        second.title = "second".into();
        let tree = node(
            "dev",
            NodeType::Root,
            &[],
            vec![node("g", NodeType::ModeGroup, &[], vec![first]), second],
        );
        assert_eq!(tree.find("dup").map(|n| n.title.as_str()), Some("first"));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn collect_content_refs_covers_subtree() {
        let tree = node(
            "g",
            NodeType::ModeGroup,
            &["page_003"],
            vec![node(
                "m",
                NodeType::SubMode,
                &["page_001"],
                vec![node("f", NodeType::LeafFact, &["page_002", "page_001"], vec![])],
            )],
        );
        let mut refs = BTreeSet::new();
        tree.collect_content_refs(&mut refs);
        assert_eq!(
            refs.into_iter().collect::<Vec<_>>(),
            vec!["page_001", "page_002", "page_003"]
        );
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn audit_flags_duplicates_and_nested_roots() {
        let mut quiet = node("quiet", NodeType::LeafFact, &[], vec![]);
        quiet.apply_condition = "  ".into();
        let tree = node(
            "dev",
            NodeType::Root,
            &[],
            vec![
                node("a", NodeType::ModeGroup, &[], vec![node("a", NodeType::SubMode, &[], vec![])]),
                node("inner", NodeType::Root, &[], vec![]),
                quiet,
            ],
        );
        let audit = tree.audit();
        assert_eq!(audit.duplicate_ids, vec!["a"]);
        assert_eq!(audit.nested_roots, vec!["inner"]);
        assert_eq!(audit.empty_conditions, vec!["quiet"]);
        assert!(!audit.is_sound());
    }

    #[test]
    fn is_global_is_case_insensitive_prefix() {
        let mut n = node("g", NodeType::ModeGroup, &[], vec![]);
        n.title = "GLOBAL Electrical Ratings".into();
        assert!(n.is_global());
        n.title = "Non-global".into();
        assert!(!n.is_global());
    }

    #[test]
    fn tree_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/knowledge_tree.fixture.json")
            .expect("read fixture");
        let tree = KnowledgeNode::from_json_str(&fixture).expect("parse fixture tree");
        assert_eq!(tree.node_type, NodeType::Root);
        assert_eq!(tree.title, "AD7980");
        assert!(tree.audit().is_sound());
    }

    #[test]
    fn manifest_fixture_validates() {
        let fixture = std::fs::read_to_string("../../../fixtures/json/manifest.fixture.json")
            .expect("read fixture");
        let records: Vec<PageRecord> = serde_json::from_str(&fixture).expect("parse manifest");
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.relevance_score >= 4));
    }
}
