//! Model graph rendering and the per-writer graph identity cache.

use crate::backend::lock;
use crate::event_file::proto::{GraphDef, NodeDef};
use prost::Message;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph rendering io error: {0}")]
    Io(#[from] io::Error),
    #[error("{program} exited with {status}: {stderr}")]
    RendererFailed {
        program: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("invalid GraphDef: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
}

/// Operation graph handed to `add_graph`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelGraph {
    nodes: Vec<GraphNode>,
}

impl ModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node<I, S>(mut self, name: &str, op: &str, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.push(GraphNode {
            name: name.to_string(),
            op: op.to_string(),
            inputs: inputs.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn from_graph_def(graph: &GraphDef) -> Self {
        Self {
            nodes: graph
                .node
                .iter()
                .map(|node| GraphNode {
                    name: node.name.clone(),
                    op: node.op.clone(),
                    inputs: node.input.clone(),
                })
                .collect(),
        }
    }

    pub fn decode(graph_def: &[u8]) -> Result<Self, GraphError> {
        Ok(Self::from_graph_def(&GraphDef::decode(graph_def)?))
    }

    pub fn to_graph_def(&self) -> GraphDef {
        GraphDef {
            node: self
                .nodes
                .iter()
                .map(|node| NodeDef {
                    name: node.name.clone(),
                    op: node.op.clone(),
                    input: node.inputs.clone(),
                })
                .collect(),
        }
    }

    /// Graphviz source with one box per node and one edge per input.
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph model {\n  node [shape=box];\n");
        for node in &self.nodes {
            let _ = writeln!(
                dot,
                "  \"{}\" [label=\"{}\\n{}\"];",
                escape(&node.name),
                escape(&node.name),
                escape(&node.op)
            );
        }
        for node in &self.nodes {
            for input in &node.inputs {
                // `^name` marks a control dependency and `name:1` an output index.
                let source = input.trim_start_matches('^');
                let source = source.split(':').next().unwrap_or(source);
                let _ = writeln!(dot, "  \"{}\" -> \"{}\";", escape(source), escape(&node.name));
            }
        }
        dot.push_str("}\n");
        dot
    }
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Turns DOT source into PNG bytes.
pub trait GraphRenderer: Send + Sync {
    fn render_png(&self, dot: &str) -> Result<Vec<u8>, GraphError>;
}

/// Renders through the Graphviz `dot` executable.
#[derive(Debug, Clone)]
pub struct GraphvizRenderer {
    program: PathBuf,
}

impl GraphvizRenderer {
    /// Locates `dot` on `PATH`.
    pub fn detect() -> Option<Self> {
        which::which("dot").ok().map(Self::with_program)
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl GraphRenderer for GraphvizRenderer {
    fn render_png(&self, dot: &str) -> Result<Vec<u8>, GraphError> {
        let mut source = tempfile::Builder::new().suffix(".dot").tempfile()?;
        source.write_all(dot.as_bytes())?;
        source.flush()?;
        let rendered = tempfile::Builder::new().suffix(".png").tempfile()?;
        let output = Command::new(&self.program)
            .arg("-Tpng")
            .arg(source.path())
            .arg("-o")
            .arg(rendered.path())
            .output()?;
        if !output.status.success() {
            return Err(GraphError::RendererFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(fs::read(rendered.path())?)
    }
}

/// Writes `png` to a temporary file removed when the handle drops.
pub(crate) fn png_tempfile(png: &[u8]) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("graph-")
        .suffix(".png")
        .tempfile()?;
    file.write_all(png)?;
    file.flush()?;
    Ok(file)
}

/// Writer identity to graph identifier.
#[derive(Debug, Default)]
pub struct GraphCache {
    ids: Mutex<HashMap<String, Uuid>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier for `writer`, and whether it was assigned now.
    pub fn identify(&self, writer: &str) -> (Uuid, bool) {
        let mut ids = lock(&self.ids);
        if let Some(id) = ids.get(writer) {
            return (*id, false);
        }
        let id = Uuid::new_v4();
        ids.insert(writer.to_string(), id);
        (id, true)
    }

    pub fn get(&self, writer: &str) -> Option<Uuid> {
        lock(&self.ids).get(writer).copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
