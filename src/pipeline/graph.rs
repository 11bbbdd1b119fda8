// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 magflow contributors

//! Stage graph construction and validation
//!
//! Dependencies are implied by artifact wiring: a stage that consumes
//! `assembly` depends on whichever stage produces `assembly`. Construction
//! validates the whole graph up front, so a [`PipelineGraph`] value is
//! always acyclic with every input satisfied.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::{MagflowError, MagflowResult};
use crate::pipeline::stage::{Cardinality, StageSpec};
use crate::pipeline::ArtifactKind;

/// Which read of the pair a source artifact carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    Read1,
    Read2,
}

/// A caller-provided artifact seeded per sample before any stage runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDecl {
    pub id: String,
    pub kind: ArtifactKind,
    pub role: SourceRole,
}

impl SourceDecl {
    pub fn read1(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ArtifactKind::File,
            role: SourceRole::Read1,
        }
    }

    pub fn read2(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ArtifactKind::File,
            role: SourceRole::Read2,
        }
    }
}

/// Where one declared input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Index into the graph's source declarations
    Source(usize),
    /// Index into the graph's stage list
    Stage(usize),
}

/// A validated pipeline: sources, stages, and their dependency structure
#[derive(Debug)]
pub struct PipelineGraph {
    name: String,
    sources: Vec<SourceDecl>,
    stages: Vec<StageSpec>,
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    index_to_name: HashMap<NodeIndex, String>,
    /// Per stage, one entry per declared input, in declaration order
    wiring: Vec<Vec<InputSource>>,
}

impl PipelineGraph {
    /// Build and validate a pipeline graph
    ///
    /// Fails fast on duplicate stages, output collisions, unsatisfied or
    /// kind-mismatched inputs, per-sample stages reading aggregate
    /// outputs, and cycles.
    pub fn build(
        name: impl Into<String>,
        sources: Vec<SourceDecl>,
        stages: Vec<StageSpec>,
    ) -> MagflowResult<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();
        let mut index_to_name = HashMap::new();

        // Add all stages as nodes, in declaration order
        for (idx, stage) in stages.iter().enumerate() {
            if name_to_index.contains_key(&stage.name) {
                return Err(MagflowError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
            let node = graph.add_node(idx);
            name_to_index.insert(stage.name.clone(), node);
            index_to_name.insert(node, stage.name.clone());
        }

        // Map every artifact id to its unique producer
        let mut producers: HashMap<&str, InputSource> = HashMap::new();
        for (idx, source) in sources.iter().enumerate() {
            if producers.insert(&source.id, InputSource::Source(idx)).is_some() {
                return Err(MagflowError::OutputCollision {
                    id: source.id.clone(),
                    first: "sources".into(),
                    second: "sources".into(),
                });
            }
        }
        for (idx, stage) in stages.iter().enumerate() {
            for slot in &stage.outputs {
                if let Some(existing) = producers.insert(&slot.id, InputSource::Stage(idx)) {
                    let first = match existing {
                        InputSource::Source(_) => "sources".to_string(),
                        InputSource::Stage(i) => stages[i].name.clone(),
                    };
                    return Err(MagflowError::OutputCollision {
                        id: slot.id.clone(),
                        first,
                        second: stage.name.clone(),
                    });
                }
            }
        }

        // Wire inputs to producers and add dependency edges
        let mut wiring = Vec::with_capacity(stages.len());
        for (idx, stage) in stages.iter().enumerate() {
            let stage_node = name_to_index[&stage.name];
            let mut stage_wiring = Vec::with_capacity(stage.inputs.len());

            for slot in &stage.inputs {
                let producer = *producers.get(slot.id.as_str()).ok_or_else(|| {
                    MagflowError::UnsatisfiedInput {
                        stage: stage.name.clone(),
                        input: slot.id.clone(),
                    }
                })?;

                let (producer_name, produced_kind) = match producer {
                    InputSource::Source(i) => ("sources".to_string(), sources[i].kind),
                    InputSource::Stage(i) => (stages[i].name.clone(), stages[i].outputs
                        .iter()
                        .find(|o| o.id == slot.id)
                        .map(|o| o.kind)
                        .unwrap_or(slot.kind)),
                };

                if produced_kind != slot.kind {
                    return Err(MagflowError::InputKindMismatch {
                        stage: stage.name.clone(),
                        input: slot.id.clone(),
                        producer: producer_name,
                        expected: slot.kind.to_string(),
                        actual: produced_kind.to_string(),
                    });
                }

                if let InputSource::Stage(i) = producer {
                    if stage.cardinality == Cardinality::PerSample
                        && stages[i].cardinality == Cardinality::Aggregate
                    {
                        return Err(MagflowError::CardinalityViolation {
                            stage: stage.name.clone(),
                            input: slot.id.clone(),
                            producer: stages[i].name.clone(),
                        });
                    }
                    if i == idx {
                        return Err(MagflowError::CircularDependency {
                            stages: vec![stage.name.clone()],
                        });
                    }
                    let dep_node = name_to_index[&stages[i].name];
                    // Only add if not already present
                    if !graph.contains_edge(dep_node, stage_node) {
                        graph.add_edge(dep_node, stage_node, ());
                    }
                }

                stage_wiring.push(producer);
            }

            wiring.push(stage_wiring);
        }

        let built = Self {
            name: name.into(),
            sources,
            stages,
            graph,
            name_to_index,
            index_to_name,
            wiring,
        };
        built.validate_acyclic()?;
        Ok(built)
    }

    /// Validate that the graph is acyclic
    fn validate_acyclic(&self) -> MagflowResult<()> {
        match toposort(&self.graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let stages = self.find_cycle_members(cycle.node_id());
                Err(MagflowError::CircularDependency { stages })
            }
        }
    }

    /// Find all stages involved in a cycle
    fn find_cycle_members(&self, start: NodeIndex) -> Vec<String> {
        use petgraph::visit::{depth_first_search, DfsEvent};

        let mut in_cycle = Vec::new();

        depth_first_search(&self.graph, Some(start), |event| {
            if let DfsEvent::Discover(node, _) = event {
                in_cycle.push(self.index_to_name[&node].clone());
            }
            petgraph::visit::Control::<()>::Continue
        });

        in_cycle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sources(&self) -> &[SourceDecl] {
        &self.sources
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.name_to_index
            .get(name)
            .map(|node| &self.stages[self.graph[*node]])
    }

    /// Wiring for one stage, parallel to its declared inputs
    pub fn input_sources(&self, stage_idx: usize) -> &[InputSource] {
        &self.wiring[stage_idx]
    }

    /// Topologically sorted stage indices, deterministic: ties break by
    /// declaration order
    pub fn topological_order(&self) -> Vec<usize> {
        let mut indegree = vec![0usize; self.stages.len()];
        for edge in self.graph.edge_indices() {
            if let Some((_, to)) = self.graph.edge_endpoints(edge) {
                indegree[to.index()] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.stages.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for next in self
                .graph
                .neighbors_directed(NodeIndex::new(idx), petgraph::Direction::Outgoing)
            {
                indegree[next.index()] -= 1;
                if indegree[next.index()] == 0 {
                    ready.push(Reverse(next.index()));
                }
            }
        }
        order
    }

    /// Topologically sorted stage names
    pub fn topological_order_names(&self) -> Vec<String> {
        self.topological_order()
            .into_iter()
            .map(|idx| self.stages[idx].name.clone())
            .collect()
    }

    /// Stages that must run before the named stage
    pub fn dependencies(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Incoming)
            .map(|n| self.index_to_name[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Stages that consume the named stage's outputs
    pub fn dependents(&self, stage_name: &str) -> Option<Vec<String>> {
        let node = self.name_to_index.get(stage_name)?;
        let mut deps: Vec<String> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| self.index_to_name[&n].clone())
            .collect();
        deps.sort();
        Some(deps)
    }

    /// Direct dependency stage indices of one stage
    pub fn dependency_indices(&self, stage_idx: usize) -> Vec<usize> {
        let mut deps: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(stage_idx), petgraph::Direction::Incoming)
            .map(|n| n.index())
            .collect();
        deps.sort_unstable();
        deps
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(stage_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(stage_b) else {
            return false;
        };
        petgraph::algo::has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Stages whose outputs nothing consumes; the run bundle is keyed by
    /// these
    pub fn terminal_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(idx, _)| {
                self.graph
                    .neighbors_directed(NodeIndex::new(*idx), petgraph::Direction::Outgoing)
                    .count()
                    == 0
            })
            .map(|(_, stage)| stage.name.as_str())
            .collect()
    }

    /// Distinct external tools the whole pipeline needs, sorted
    pub fn required_tools(&self) -> Vec<String> {
        let mut tools: Vec<String> = self
            .stages
            .iter()
            .flat_map(|stage| stage.tools.iter().cloned())
            .collect();
        tools.sort();
        tools.dedup();
        tools
    }

    /// Generate text representation of execution order
    pub fn execution_plan(&self) -> String {
        let mut out = String::new();
        for (i, idx) in self.topological_order().iter().enumerate() {
            let stage = &self.stages[*idx];
            let deps = self.dependencies(&stage.name).unwrap_or_default();

            out.push_str(&format!(
                "{}. {} ({}: {})",
                i + 1,
                stage.name,
                stage.cardinality,
                stage.tools.join(", "),
            ));
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }
            out.push('\n');
        }
        out
    }

    /// Generate Mermaid diagram of the stage graph
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for stage in &self.stages {
            out.push_str(&format!("    {}[{}]\n", stage.name, stage.name));
        }
        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                let from_name = &self.index_to_name[&from];
                let to_name = &self.index_to_name[&to];
                out.push_str(&format!("    {} --> {}\n", from_name, to_name));
            }
        }

        out
    }

    /// Generate DOT diagram of the stage graph
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                let from_name = &self.index_to_name[&from];
                let to_name = &self.index_to_name[&to];
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", from_name, to_name));
            }
        }
        for (name, node) in &self.name_to_index {
            if self.graph.neighbors_undirected(*node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }
}
