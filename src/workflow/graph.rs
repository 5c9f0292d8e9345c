/// Petgraph-backed view of a workflow
///
/// Builds a directed graph from units and edges, validates its structure and
/// answers the adjacency questions both execution modes ask.

use crate::error::{EngineError, EngineResult};
use crate::workflow::types::{Edge, WorkUnit};
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Internal representation of a workflow as a petgraph DiGraph
#[derive(Debug)]
pub struct WorkflowGraph {
    /// Graph of unit ids; edge weights are indices into `edges`
    graph: DiGraph<String, usize>,
    /// Mapping from unit ID to graph node index
    node_id_to_index: HashMap<String, NodeIndex>,
    /// Units keyed by id
    units: HashMap<String, WorkUnit>,
    /// Edges in authoring order
    edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Build a graph from units and edges
    ///
    /// Fails on duplicate unit ids and on edges that reference unknown units.
    /// Cycles are accepted here; call `ensure_acyclic` to reject them.
    pub fn build(units: &[WorkUnit], edges: &[Edge]) -> EngineResult<Self> {
        tracing::debug!("🏗️ Building workflow graph with {} units and {} edges", units.len(), edges.len());

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();
        let mut by_id = HashMap::new();

        // Add all units to the graph
        for unit in units {
            if by_id.contains_key(&unit.id) {
                return Err(EngineError::DuplicateUnit { unit_id: unit.id.clone() });
            }
            let index = graph.add_node(unit.id.clone());
            node_id_to_index.insert(unit.id.clone(), index);
            by_id.insert(unit.id.clone(), unit.clone());
        }

        // Add all edges to the graph
        for (position, edge) in edges.iter().enumerate() {
            let from = node_id_to_index
                .get(&edge.source)
                .ok_or_else(|| EngineError::UnknownUnit { unit_id: edge.source.clone() })?;
            let to = node_id_to_index
                .get(&edge.target)
                .ok_or_else(|| EngineError::UnknownUnit { unit_id: edge.target.clone() })?;
            graph.add_edge(*from, *to, position);
            tracing::debug!("  🔗 Added edge: '{}' → '{}'", edge.source, edge.target);
        }

        Ok(Self {
            graph,
            node_id_to_index,
            units: by_id,
            edges: edges.to_vec(),
        })
    }

    /// Reject graphs that contain a cycle
    ///
    /// The error lists every unit that sits on a cycle, sorted by id.
    pub fn ensure_acyclic(&self) -> EngineResult<()> {
        if toposort(&self.graph, None).is_ok() {
            tracing::debug!("✅ DAG validation successful - no cycles detected");
            return Ok(());
        }

        let mut units: Vec<String> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self.graph.contains_edge(component[0], component[0])
            })
            .flatten()
            .map(|index| self.graph[index].clone())
            .collect();
        units.sort();

        tracing::error!("❌ Workflow contains cycles - must be a DAG ({:?})", units);
        Err(EngineError::CycleDetected { units })
    }

    /// Look up a unit by id
    pub fn unit(&self, unit_id: &str) -> Option<&WorkUnit> {
        self.units.get(unit_id)
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.units.contains_key(unit_id)
    }

    /// Outgoing edges of a unit in authoring order
    pub fn outgoing(&self, unit_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.source == unit_id).collect()
    }

    /// Incoming edges of a unit in authoring order
    pub fn incoming(&self, unit_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|edge| edge.target == unit_id).collect()
    }

    /// Distinct sources of every incoming edge
    pub fn dependencies(&self, unit_id: &str) -> BTreeSet<String> {
        self.incoming(unit_id).into_iter().map(|edge| edge.source.clone()).collect()
    }

    /// Start units: the explicit one, or every unit without incoming edges
    ///
    /// Returned in authoring order of `units`.
    pub fn start_units(&self, units: &[WorkUnit], explicit: Option<&str>) -> EngineResult<Vec<String>> {
        if let Some(start) = explicit {
            if !self.contains(start) {
                return Err(EngineError::UnknownUnit { unit_id: start.to_string() });
            }
            return Ok(vec![start.to_string()]);
        }

        let targets: HashSet<&str> = self.edges.iter().map(|edge| edge.target.as_str()).collect();
        let starts: Vec<String> = units
            .iter()
            .filter(|unit| !targets.contains(unit.id.as_str()))
            .map(|unit| unit.id.clone())
            .collect();

        if starts.is_empty() {
            return Err(EngineError::NoStartUnit);
        }
        Ok(starts)
    }

    /// Find all units reachable from the start unit using BFS
    pub fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut reachable = HashSet::new();
        let Some(&start_index) = self.node_id_to_index.get(start) else {
            return reachable;
        };

        let mut queue = VecDeque::new();
        let mut seen = HashSet::new();
        queue.push_back(start_index);
        seen.insert(start_index);

        while let Some(current) = queue.pop_front() {
            reachable.insert(self.graph[current].clone());
            // Add all neighbors (units this one points to)
            for target in self.graph.neighbors(current) {
                if seen.insert(target) {
                    queue.push_back(target);
                }
            }
        }

        reachable
    }
}
