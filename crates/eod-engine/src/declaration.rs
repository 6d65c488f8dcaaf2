//! Declarative workflow source parser.
//!
//! Parses YAML workflow files into [`WorkflowSource`] structs. Process order
//! is preserved, since it fixes task order and resolution order.
//!
//! # Example YAML
//!
//! ```yaml
//! name: test_suite_wf
//!
//! inputs:
//!   - input <- /home/jdoe/input.txt
//!   - reads <- agave://data.iplantcollaborative.org/jdoe/reads.fq
//!
//! processes:
//!   add_5:
//!     image: jstubbs/add_n
//!     description: Adds 5 to every number in the input.
//!     command: python add_n.py -i 5
//!     inputs:
//!       - inputs.input -> /data/input.txt
//!     outputs:
//!       - /data/output.txt -> output
//!
//!   align:
//!     execution: agave_app
//!     app_id: bwa-0.7.10
//!     inputs:
//!       query:
//!         - inputs.reads
//!         - add_5.output
//!     parameters:
//!       threads: 4
//!     outputs:
//!       - results/aligned.bam -> bam
//! ```

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::DeclarationError;

/// A whole workflow file.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowSource {
    #[serde(default)]
    pub name: Option<String>,

    /// Global inputs, each `"<label> <- <source>"`.
    #[serde(default)]
    pub inputs: Option<Vec<String>>,

    /// Processes in declaration order.
    #[serde(default)]
    pub processes: Option<IndexMap<String, TaskDeclaration>>,
}

/// One entry under `processes`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskDeclaration {
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// `docker` (default), `agave` or `agave_app`.
    #[serde(default)]
    pub execution: Option<String>,

    #[serde(default)]
    pub inputs: Option<InputDeclarations>,

    /// Each `"<source> -> <label>"`.
    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Remote application id, for `agave_app` processes.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Remote application parameters, passed through verbatim.
    #[serde(default)]
    pub parameters: Option<IndexMap<String, serde_json::Value>>,
}

/// Process inputs: a list of `"<ref> -> <dest>"` for container processes, or
/// a mapping of application input id to references for remote applications.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InputDeclarations {
    List(Vec<String>),
    ByAppInput(IndexMap<String, Vec<String>>),
}

impl InputDeclarations {
    pub fn kind(&self) -> &'static str {
        match self {
            InputDeclarations::List(_) => "list",
            InputDeclarations::ByAppInput(_) => "mapping",
        }
    }
}

impl WorkflowSource {
    pub fn from_yaml(text: &str) -> Result<Self, DeclarationError> {
        serde_yaml::from_str(text).map_err(|e| DeclarationError::Parse(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, DeclarationError> {
        let text = std::fs::read_to_string(path).map_err(|e| DeclarationError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&text)
    }

    pub fn global_inputs(&self) -> &[String] {
        self.inputs.as_deref().unwrap_or_default()
    }

    pub fn processes(&self) -> impl Iterator<Item = (&String, &TaskDeclaration)> {
        self.processes.iter().flat_map(|p| p.iter())
    }
}

impl TaskDeclaration {
    pub fn outputs(&self) -> &[String] {
        self.outputs.as_deref().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Arrow parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Split `"<left> -> <right>"`.
pub fn parse_forward(text: &str, kind: &'static str) -> Result<(String, String), DeclarationError> {
    split_pair(text, "->", kind, "<source> -> <destination>")
}

/// Split `"<label> <- <source>"`.
pub fn parse_backward(
    text: &str,
    kind: &'static str,
) -> Result<(String, String), DeclarationError> {
    split_pair(text, "<-", kind, "<label> <- <source>")
}

fn split_pair(
    text: &str,
    arrow: &str,
    kind: &'static str,
    expected: &'static str,
) -> Result<(String, String), DeclarationError> {
    let malformed = || DeclarationError::Malformed {
        kind,
        text: text.to_string(),
        expected,
    };
    let mut parts = text.split(arrow);
    let (Some(left), Some(right), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(malformed());
    };
    let (left, right) = (left.trim(), right.trim());
    if left.is_empty() || right.is_empty() {
        return Err(malformed());
    }
    Ok((left.to_string(), right.to_string()))
}
