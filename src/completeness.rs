//! Deciding whether a structured block is ready for its structural parse.
//!
//! While a block is trailing, a cheap bracket check runs first and parse
//! failures mean "wait for more input". Once the fence has closed, the parse
//! always runs and a failure is a real error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// Trimmed content does not start and end with a matching bracket pair.
    Unbracketed,
    /// Open and close bracket counts differ.
    Unbalanced,
    /// Brackets balance but the structural parse still fails.
    ParseFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuralOutcome {
    Pending(WaitReason),
    Parsed(StructuralPayload),
    Invalid(StructuralError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructuralError {
    #[error("invalid {kind} block at line {line}, column {column}: {message}")]
    Syntax {
        kind: String,
        line: usize,
        column: usize,
        message: String,
    },
    #[error("invalid {kind} block: {message}")]
    Shape { kind: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "format", content = "value", rename_all = "snake_case")]
pub enum StructuralPayload {
    Json(Value),
    Chart(ChartSpec),
    Flow(FlowGraph),
    Workflow(WorkflowDefinition),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type", alias = "chartType", default)]
    pub chart_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub node_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub step_type: Option<String>,
    #[serde(rename = "dependsOn", alias = "depends_on", default)]
    pub depends_on: Vec<String>,
}

/// True when the structural parse should be attempted on this pass.
pub fn is_likely_complete(kind: Option<&str>, raw_content: &str, is_trailing: bool) -> bool {
    if !is_trailing {
        return true;
    }
    matches!(
        assess(kind, raw_content, is_trailing),
        StructuralOutcome::Parsed(_)
    )
}

/// Run the completeness policy and, when it allows, the structural parse.
pub fn assess(kind: Option<&str>, raw_content: &str, is_trailing: bool) -> StructuralOutcome {
    if is_trailing {
        if let Some(reason) = bracket_wait_reason(raw_content) {
            return StructuralOutcome::Pending(reason);
        }
    }

    match parse_payload(kind, raw_content) {
        Ok(payload) => StructuralOutcome::Parsed(payload),
        Err(_) if is_trailing => StructuralOutcome::Pending(WaitReason::ParseFailed),
        Err(err) => StructuralOutcome::Invalid(err),
    }
}

/// Parse `raw_content` into the payload type for `kind`. Unknown kinds parse
/// as plain JSON.
pub fn parse_payload(kind: Option<&str>, raw_content: &str) -> Result<StructuralPayload, StructuralError> {
    let label = kind.unwrap_or("json").to_ascii_lowercase();
    match label.as_str() {
        "chart" => from_json::<ChartSpec>(&label, raw_content).map(StructuralPayload::Chart),
        "flow" => {
            let graph = from_json::<FlowGraph>(&label, raw_content)?;
            validate_flow(&label, &graph)?;
            Ok(StructuralPayload::Flow(graph))
        }
        "workflow" => {
            let workflow = from_json::<WorkflowDefinition>(&label, raw_content)?;
            validate_workflow(&label, &workflow)?;
            Ok(StructuralPayload::Workflow(workflow))
        }
        _ => from_json::<Value>(&label, raw_content).map(StructuralPayload::Json),
    }
}

fn bracket_wait_reason(raw_content: &str) -> Option<WaitReason> {
    let trimmed = raw_content.trim();
    let bracketed = matches!(
        (trimmed.chars().next(), trimmed.chars().last()),
        (Some('{'), Some('}')) | (Some('['), Some(']'))
    );
    if !bracketed || trimmed.len() < 2 {
        return Some(WaitReason::Unbracketed);
    }
    if !brackets_balanced(trimmed) {
        return Some(WaitReason::Unbalanced);
    }
    None
}

/// Compare open/close counts of braces and brackets, ignoring any that
/// appear inside JSON string literals.
fn brackets_balanced(text: &str) -> bool {
    let (mut braces, mut brackets) = (0i64, 0i64);
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => braces += 1,
            '}' => braces -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            _ => {}
        }
    }

    braces == 0 && brackets == 0
}

fn from_json<T: for<'de> Deserialize<'de>>(kind: &str, raw_content: &str) -> Result<T, StructuralError> {
    serde_json::from_str::<T>(raw_content).map_err(|err| {
        if err.is_data() {
            StructuralError::Shape {
                kind: kind.to_string(),
                message: err.to_string(),
            }
        } else {
            StructuralError::Syntax {
                kind: kind.to_string(),
                line: err.line(),
                column: err.column(),
                message: err.to_string(),
            }
        }
    })
}

fn validate_flow(kind: &str, graph: &FlowGraph) -> Result<(), StructuralError> {
    let ids: HashSet<&str> = graph.nodes.iter().map(|node| node.id.as_str()).collect();
    if ids.len() != graph.nodes.len() {
        return Err(shape_error(kind, "duplicate node id"));
    }
    for edge in &graph.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !ids.contains(endpoint.as_str()) {
                return Err(shape_error(kind, &format!("edge references unknown node '{endpoint}'")));
            }
        }
    }
    Ok(())
}

fn validate_workflow(kind: &str, workflow: &WorkflowDefinition) -> Result<(), StructuralError> {
    if workflow.steps.is_empty() {
        return Err(shape_error(kind, "workflow has no steps"));
    }
    let ids: HashSet<&str> = workflow.steps.iter().map(|step| step.id.as_str()).collect();
    if ids.len() != workflow.steps.len() {
        return Err(shape_error(kind, "duplicate step id"));
    }
    for step in &workflow.steps {
        if let Some(missing) = step.depends_on.iter().find(|dep| !ids.contains(dep.as_str())) {
            return Err(shape_error(
                kind,
                &format!("step '{}' depends on unknown step '{missing}'", step.id),
            ));
        }
    }
    Ok(())
}

fn shape_error(kind: &str, message: &str) -> StructuralError {
    StructuralError::Shape {
        kind: kind.to_string(),
        message: message.to_string(),
    }
}
