//! Node count estimation and input sharding.
//!
//! Pure functions that decide how many parallel worker nodes a
//! quantification needs and how its inputs are split between them. The
//! model is empirical, calibrated against cluster runs on 8-core nodes.

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Divisor of the per-spectrum runtime model: `(elements + 3) / 3` seconds.
const SEC_PER_SPECTRUM_DIVISOR: u64 = 3;

/// Element offset of the per-spectrum runtime model.
const SEC_PER_SPECTRUM_ELEMENT_OFFSET: u64 = 3;

/// Suffix of the per-node input shard files.
pub const SHARD_FILE_EXTENSION: &str = ".pmcs";

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Problem size and cluster shape fed to [`estimate_node_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EstimatorInputs {
    pub spectra_count: u32,
    pub element_count: u32,
    pub desired_runtime_sec: u32,
    pub cores_per_node: u32,
    pub max_nodes: u32,
}

impl EstimatorInputs {
    /// Run [`estimate_node_count`] on these inputs.
    pub fn estimate(&self) -> u32 {
        estimate_node_count(
            self.spectra_count,
            self.element_count,
            self.desired_runtime_sec,
            self.cores_per_node,
            self.max_nodes,
        )
    }
}

// ---------------------------------------------------------------------------
// Estimation
// ---------------------------------------------------------------------------

/// Estimate how many nodes are needed to process `spectra_count` spectra
/// within `desired_runtime_sec`.
///
/// Each spectrum costs `(element_count + 3) / 3` seconds of one core, so
///
/// ```text
/// nodes = ceil(spectra * (elements + 3) / (3 * runtime * cores))
/// ```
///
/// The result is clamped to `1..=max_nodes`. A zero runtime or core count
/// means the demand cannot be met by any finite node count, so `max_nodes`
/// is returned.
pub fn estimate_node_count(
    spectra_count: u32,
    element_count: u32,
    desired_runtime_sec: u32,
    cores_per_node: u32,
    max_nodes: u32,
) -> u32 {
    let max_nodes = max_nodes.max(1);

    let denominator =
        SEC_PER_SPECTRUM_DIVISOR * desired_runtime_sec as u64 * cores_per_node as u64;
    if denominator == 0 {
        return max_nodes;
    }

    let numerator =
        spectra_count as u64 * (element_count as u64 + SEC_PER_SPECTRUM_ELEMENT_OFFSET);
    let nodes = numerator.div_ceil(denominator);

    nodes.clamp(1, max_nodes as u64) as u32
}

/// Number of input files (or items) each of `node_count` nodes receives.
///
/// A `node_count` of zero is treated as a single node.
pub fn files_per_node(total: u32, node_count: u32) -> u32 {
    total.div_ceil(node_count.max(1))
}

/// Decide the final node count for a request.
///
/// A configured `override_count` greater than zero always wins. Requests
/// that are not parallelisable (`parallel == false`) run on a single node.
pub fn plan_node_count(inputs: &EstimatorInputs, override_count: u32, parallel: bool) -> u32 {
    if override_count > 0 {
        tracing::info!(override_count, "Using node count override");
        return override_count;
    }
    if !parallel {
        return 1;
    }
    inputs.estimate()
}

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

/// Split `items` into ordered chunks of at most `per_node` items.
///
/// Every item appears in exactly one chunk and the concatenation of all
/// chunks equals the input. A `per_node` of zero is treated as one.
pub fn shard_items<T: Clone>(items: &[T], per_node: usize) -> Vec<Vec<T>> {
    items
        .chunks(per_node.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Shard name (without extension) for the node with the given zero-based
/// ordinal, e.g. `node00001` for index 0.
pub fn shard_name(node_index: u32) -> String {
    format!("node{:05}", node_index as u64 + 1)
}

/// Shard file name for the node with the given zero-based ordinal, e.g.
/// `node00042.pmcs` for index 41.
pub fn shard_file_name(node_index: u32) -> String {
    format!("{}{SHARD_FILE_EXTENSION}", shard_name(node_index))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
