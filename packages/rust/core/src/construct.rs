//! Phase 2: tree construction from the manifest.
//!
//! The tree-construction service is trusted to run but not to be right:
//! its raw response is unfenced, parsed, and validated before a tree is
//! accepted.

use tracing::{info, instrument, warn};

use grove_shared::{GroveError, KnowledgeNode, NodeType, PageRecord, Result};

/// The generative tree-construction service.
///
/// Receives the manifest as pretty JSON and returns its raw response text.
pub trait TreeConstructor {
    fn construct(&mut self, manifest_json: &str) -> Result<String>;
}

/// Remove the Markdown code fence a model may wrap its JSON in.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut content = raw.trim();
    if let Some(rest) = content.strip_prefix("```json") {
        content = rest;
    } else if let Some(rest) = content.strip_prefix("```") {
        content = rest;
    }
    if let Some(rest) = content.strip_suffix("```") {
        content = rest;
    }
    content.trim()
}

/// Parse a service response into a validated, root-typed tree.
pub fn parse_tree_response(raw: &str) -> Result<KnowledgeNode> {
    let tree = KnowledgeNode::from_json_str(strip_code_fences(raw))?;

    if tree.node_type != NodeType::Root {
        return Err(GroveError::schema_at(
            &tree.id,
            format!("top-level node has type '{}', expected 'root'", tree.node_type),
        ));
    }

    let audit = tree.audit();
    if let Some(id) = audit.duplicate_ids.first() {
        return Err(GroveError::schema_at(
            id,
            format!("duplicate node id ({} duplicates in total)", audit.duplicate_ids.len()),
        ));
    }
    if let Some(id) = audit.nested_roots.first() {
        return Err(GroveError::schema_at(id, "root node below the top of the tree"));
    }
    if !audit.empty_conditions.is_empty() {
        warn!(
            nodes = ?audit.empty_conditions,
            "nodes without an apply_condition"
        );
    }

    Ok(tree)
}

/// Build a tree from a manifest with a single service call.
///
/// Returns `Ok(None)` when the manifest is empty: there is nothing to
/// organize and the service is not called.
#[instrument(skip_all, fields(pages = manifest.len()))]
pub fn construct_tree(
    constructor: &mut dyn TreeConstructor,
    manifest: &[PageRecord],
) -> Result<Option<KnowledgeNode>> {
    if manifest.is_empty() {
        warn!("manifest is empty, skipping tree construction");
        return Ok(None);
    }

    let manifest_json = serde_json::to_string_pretty(manifest)
        .map_err(|e| GroveError::validation(format!("manifest serialization failed: {e}")))?;

    let raw = constructor.construct(&manifest_json)?;
    let tree = parse_tree_response(&raw)?;

    info!(
        root = %tree.id,
        nodes = tree.node_count(),
        "knowledge tree constructed"
    );
    Ok(Some(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_shared::PageType;

    struct CannedConstructor {
        response: Result<String>,
        calls: usize,
        last_payload: String,
    }

    impl CannedConstructor {
        fn new(response: Result<String>) -> Self {
            Self {
                response,
                calls: 0,
                last_payload: String::new(),
            }
        }
    }

    impl TreeConstructor for CannedConstructor {
        fn construct(&mut self, manifest_json: &str) -> Result<String> {
            self.calls += 1;
            self.last_payload = manifest_json.to_string();
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(GroveError::service("tree-construction", e.to_string())),
            }
        }
    }

    const TREE: &str = r#"{
        "id": "ad7980", "type": "device_root", "title": "AD7980", "description": "",
        "apply_condition": "Always",
        "children": [
            {"id": "serial", "type": "mode_group", "title": "Serial", "description": "",
             "apply_condition": "IF serial",
             "children": [
                {"id": "3wire_busy", "type": "sub_mode", "title": "3wire_busy",
                 "description": "", "apply_condition": "IF SDI high", "content_refs": ["page_010"]}
             ]}
        ]
    }"#;

    fn manifest() -> Vec<PageRecord> {
        vec![PageRecord {
            page_id: "page_010".into(),
            page_type: PageType::Protocol,
            relevance_score: 8,
            summary: "3-wire".into(),
            key_signals: vec!["SDI".into()],
        }]
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```  "), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {} "), "{}");
        assert_eq!(strip_code_fences("```json{}"), "{}");
    }

    #[test]
    fn parses_fenced_response() {
        let raw = format!("```json\n{TREE}\n```");
        let tree = parse_tree_response(&raw).expect("parse");
        assert_eq!(tree.node_type, NodeType::Root);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn rejects_non_root_top_node() {
        let raw = r#"{"id":"serial","type":"mode_group","title":"","description":"","apply_condition":""}"#;
        let err = parse_tree_response(raw).unwrap_err();
        assert!(err.to_string().contains("expected 'root'"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let raw = r#"{"id":"dev","type":"root","title":"","description":"","apply_condition":"",
            "children":[
              {"id":"m","type":"sub_mode","title":"","description":"","apply_condition":""},
              {"id":"m","type":"sub_mode","title":"","description":"","apply_condition":""}
            ]}"#;
        match parse_tree_response(raw).unwrap_err() {
            GroveError::Schema { node_id, message } => {
                assert_eq!(node_id.as_deref(), Some("m"));
                assert!(message.contains("duplicate"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_nested_root() {
        let raw = r#"{"id":"dev","type":"root","title":"","description":"","apply_condition":"",
            "children":[{"id":"again","type":"root","title":"","description":"","apply_condition":""}]}"#;
        assert!(parse_tree_response(raw).is_err());
    }

    #[test]
    fn rejects_prose() {
        let err = parse_tree_response("Here is your tree!").unwrap_err();
        assert!(matches!(err, GroveError::Schema { .. }));
    }

    #[test]
    fn empty_manifest_skips_service() {
        let mut constructor = CannedConstructor::new(Ok(TREE.into()));
        let tree = construct_tree(&mut constructor, &[]).expect("no error");
        assert!(tree.is_none());
        assert_eq!(constructor.calls, 0);
    }

    #[test]
    fn construct_sends_manifest_once() {
        let mut constructor = CannedConstructor::new(Ok(TREE.into()));
        let tree = construct_tree(&mut constructor, &manifest())
            .expect("construct")
            .expect("tree");
        assert_eq!(constructor.calls, 1);
        assert!(constructor.last_payload.contains("\"page_id\": \"page_010\""));
        assert_eq!(tree.id, "ad7980");
    }

    #[test]
    fn service_failure_propagates() {
        let mut constructor =
            CannedConstructor::new(Err(GroveError::validation("quota exhausted")));
        let err = construct_tree(&mut constructor, &manifest()).unwrap_err();
        assert!(matches!(err, GroveError::Service { .. }));
    }
}
