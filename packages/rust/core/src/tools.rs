//! Text-returning query tools over the knowledge tree and page corpus.
//!
//! Each call opens a fresh [`TreeNavigator`], so a rebuilt tree is picked up
//! without restarting the caller.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use grove_shared::{GroveError, Result};

use crate::corpus::Corpus;
use crate::navigator::{ConfigurationEntry, TreeNavigator};

pub const LIST_CONFIGURATIONS: &str = "list_datasheet_configurations";
pub const READ_TECHNICAL_SPECS: &str = "read_technical_specs";

const SECTION_END: &str = "---------------------------------";

/// Descriptor of one callable tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the argument object.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Descriptors for every tool served by [`DatasheetTools::call`].
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            LIST_CONFIGURATIONS,
            "Lists all available hardware operating modes and configurations found in the datasheet tree.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Optional search term to filter configurations (e.g. '3-wire')."
                    }
                },
                "additionalProperties": false
            }),
        ),
        ToolDefinition::new(
            READ_TECHNICAL_SPECS,
            "Retrieves the timing constraints, pinouts and logic diagrams for a specific configuration ID.",
            json!({
                "type": "object",
                "properties": {
                    "config_id": {
                        "type": "string",
                        "description": "The ID of the configuration to retrieve (e.g. '3wire_busy')."
                    }
                },
                "required": ["config_id"],
                "additionalProperties": false
            }),
        ),
    ]
}

/// Query tools bound to a tree file and a corpus directory.
#[derive(Debug, Clone)]
pub struct DatasheetTools {
    tree_path: PathBuf,
    corpus: Corpus,
}

impl DatasheetTools {
    pub fn new(tree_path: impl Into<PathBuf>, corpus_dir: impl Into<PathBuf>) -> Self {
        Self {
            tree_path: tree_path.into(),
            corpus: Corpus::new(corpus_dir),
        }
    }

    /// List configurations, filtered by `query` with fallback to all.
    #[instrument(skip(self))]
    pub fn list_datasheet_configurations(&self, query: &str) -> Result<String> {
        let navigator = TreeNavigator::open(&self.tree_path)?;
        let all = navigator.list_configurations();

        let needle = query.to_lowercase();
        let matches_device = needle.is_empty()
            || navigator.root().title.to_lowercase().contains(&needle);

        let (entries, fell_back) = if matches_device {
            (all, false)
        } else {
            let filtered: Vec<_> = all
                .iter()
                .filter(|c| {
                    c.name.to_lowercase().contains(&needle) || c.id.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect();
            if filtered.is_empty() {
                (all, true)
            } else {
                (filtered, false)
            }
        };

        debug!(matched = entries.len(), fell_back, "configurations listed");

        let mut output = String::new();
        if fell_back {
            output.push_str(&format!(
                "No exact match found for '{query}'. Showing all configurations.\n"
            ));
        }
        output.push_str(&render_configurations(&entries));
        Ok(output)
    }

    /// Context bundle for one configuration: facts and text of every
    /// relevant page, in sorted page order.
    #[instrument(skip(self))]
    pub fn read_technical_specs(&self, config_id: &str) -> Result<String> {
        let navigator = TreeNavigator::open(&self.tree_path)?;
        let context = match navigator.get_node_context(config_id) {
            Ok(context) => context,
            Err(e) if e.is_not_found() => return Ok(format!("Error: Node {config_id} not found")),
            Err(e) => return Err(e),
        };

        let mut output = format!(
            "--- CONTEXT FOR CONFIGURATION: {} ---\nApply Condition: {}\n\n",
            context.config_name, context.apply_condition
        );

        for page in &context.relevant_pages {
            if let Some(facts) = self.corpus.read_facts_raw(page)? {
                push_section(&mut output, &format!("LOGIC/TIMING ({page})"), &facts);
            }
            if let Some(text) = self.corpus.read_text(page)? {
                push_section(&mut output, &format!("TEXT DOCS ({page})"), &text);
            }
        }

        debug!(pages = context.relevant_pages.len(), bytes = output.len(), "specs assembled");
        Ok(output)
    }

    /// Dispatch a tool call by name with a JSON argument object.
    pub fn call(&self, name: &str, args: &Value) -> Result<String> {
        match name {
            LIST_CONFIGURATIONS => {
                let query = optional_str(args, "query")?.unwrap_or_default();
                self.list_datasheet_configurations(query)
            }
            READ_TECHNICAL_SPECS => {
                let config_id = optional_str(args, "config_id")?.ok_or_else(|| {
                    GroveError::validation(format!("{READ_TECHNICAL_SPECS} requires 'config_id'"))
                })?;
                self.read_technical_specs(config_id)
            }
            other => Err(GroveError::validation(format!("unknown tool '{other}'"))),
        }
    }
}

fn render_configurations(entries: &[ConfigurationEntry]) -> String {
    let mut output = String::from("Available Configurations:\n");
    if entries.is_empty() {
        output.push_str("(no configurations found)\n");
    }
    for entry in entries {
        output.push_str(&format!(
            "- Name: {}\n  ID: {}\n  Logic: {}\n  Condition: {}\n\n",
            entry.name, entry.id, entry.description, entry.condition
        ));
    }
    output
}

fn push_section(output: &mut String, title: &str, body: &str) {
    output.push_str(&format!("\n--- {title} ---\n{body}\n{SECTION_END}\n"));
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(GroveError::validation(format!("argument '{key}' must be a string"))),
    }
}
