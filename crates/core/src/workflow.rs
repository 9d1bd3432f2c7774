//! Workflow template handling and named patch points.
//!
//! A ComfyUI workflow is kept as untyped JSON: a map from node address
//! to `{class_type, inputs}`. The worker only ever overwrites a handful
//! of leaf input values at configured [`PatchPoint`]s and forwards the
//! rest untouched.

use std::fmt;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Negative prompt used when the job does not supply one.
pub const DEFAULT_NEGATIVE_PROMPT: &str = "low quality, blurry";

/// Upper bound (inclusive) for randomly chosen seeds.
pub const MAX_RANDOM_SEED: u64 = 999_999_999_999_999;

/// Positive prompt text encoder node in the bundled template.
const PROMPT_NODE: &str = "6";

/// Negative prompt text encoder node in the bundled template.
const NEGATIVE_PROMPT_NODE: &str = "7";

/// Sampler node carrying `noise_seed` in the bundled template.
const SEED_NODE: &str = "57";

/// `LoadImage` nodes in slot order.
const IMAGE_NODES: &[&str] = &["122", "125", "126"];

// ---------------------------------------------------------------------------
// Patch points
// ---------------------------------------------------------------------------

/// Address of a single overwritable leaf: `workflow[node].inputs[input]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchPoint {
    pub node: String,
    pub input: String,
}

impl PatchPoint {
    pub fn new(node: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: input.into(),
        }
    }
}

impl fmt::Display for PatchPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.inputs.{}", self.node, self.input)
    }
}

/// The full set of addresses a job is allowed to patch in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPoints {
    pub prompt: PatchPoint,
    pub negative_prompt: PatchPoint,
    pub seed: PatchPoint,
    /// Image filename slots, in the order images are assigned.
    pub images: Vec<PatchPoint>,
}

impl Default for PatchPoints {
    fn default() -> Self {
        Self {
            prompt: PatchPoint::new(PROMPT_NODE, "text"),
            negative_prompt: PatchPoint::new(NEGATIVE_PROMPT_NODE, "text"),
            seed: PatchPoint::new(SEED_NODE, "noise_seed"),
            images: IMAGE_NODES
                .iter()
                .map(|node| PatchPoint::new(*node, "image"))
                .collect(),
        }
    }
}

/// Values written into a template for one job.
#[derive(Debug, Clone, Copy)]
pub struct PatchValues<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub seed: u64,
    /// Uploaded image names, in the order the caller supplied them.
    pub image_names: &'a [String],
}

impl PatchPoints {
    /// Write `values` into `workflow` at the configured addresses.
    ///
    /// When fewer images than slots are supplied, each remaining slot
    /// repeats the last image.
    pub fn apply(&self, workflow: &mut Value, values: &PatchValues<'_>) -> Result<(), CoreError> {
        set_input(workflow, &self.prompt, Value::from(values.prompt))?;
        set_input(
            workflow,
            &self.negative_prompt,
            Value::from(values.negative_prompt),
        )?;
        set_input(workflow, &self.seed, Value::from(values.seed))?;

        if self.images.is_empty() {
            return Ok(());
        }
        let last = values
            .image_names
            .len()
            .checked_sub(1)
            .ok_or_else(|| CoreError::Validation("At least one image name is required".into()))?;

        for (slot, point) in self.images.iter().enumerate() {
            let name = &values.image_names[slot.min(last)];
            set_input(workflow, point, Value::from(name.as_str()))?;
        }
        Ok(())
    }
}

/// Overwrite an existing leaf input value.
///
/// The node, its `inputs` object and the input key must already exist;
/// patching never adds keys to the graph.
pub fn set_input(workflow: &mut Value, point: &PatchPoint, value: Value) -> Result<(), CoreError> {
    let slot = workflow
        .get_mut(point.node.as_str())
        .and_then(|node| node.get_mut("inputs"))
        .and_then(|inputs| inputs.get_mut(point.input.as_str()))
        .ok_or_else(|| CoreError::Validation(format!("Workflow has no input at {point}")))?;
    *slot = value;
    Ok(())
}

/// Pick a seed for jobs that do not supply one.
pub fn random_seed() -> u64 {
    rand::rng().random_range(1..=MAX_RANDOM_SEED)
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Read-only workflow graph loaded once per process.
///
/// Share it behind an `Arc` and call [`instantiate`](Self::instantiate)
/// for each job; the stored graph itself is never patched.
#[derive(Debug)]
pub struct WorkflowTemplate {
    graph: Value,
}

impl WorkflowTemplate {
    pub fn from_value(graph: Value) -> Result<Self, CoreError> {
        if !graph.is_object() {
            return Err(CoreError::Validation(
                "Workflow template must be a JSON object".into(),
            ));
        }
        Ok(Self { graph })
    }

    /// Load a template from a JSON file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Cannot read workflow template {}: {e}", path.display()))
        })?;
        let graph = serde_json::from_str(&text).map_err(|e| {
            CoreError::Validation(format!("Invalid workflow template {}: {e}", path.display()))
        })?;
        Self::from_value(graph)
    }

    /// A deep copy of the template graph, safe to patch.
    pub fn instantiate(&self) -> Value {
        self.graph.clone()
    }

    pub fn node_count(&self) -> usize {
        self.graph.as_object().map_or(0, |nodes| nodes.len())
    }
}
