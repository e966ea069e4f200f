//! Bubble graph analysis
//!
//! Pure functions over [`BubbleGraph`]. Every list returned here follows
//! node declaration order, and successors follow edge declaration order.

use crate::models::{BubbleGraph, BubbleType};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Upper bound on enumerated paths
pub const MAX_VALID_PATHS: usize = 1000;

/// Upper bound on edges walked while enumerating paths. Dense cyclic graphs
/// have factorially many simple paths and may never reach a dead end.
pub const MAX_PATH_STEPS: usize = 100_000;

/// Minutes a student is expected to spend per bubble
const MINUTES_PER_NODE: usize = 5;

/// Structural check of a graph
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GraphValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub has_cycles: bool,
    pub unreachable_nodes: Vec<String>,
}

/// Size and shape figures of a graph
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GraphMetrics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub start_node: String,
    pub has_cycles: bool,
    pub unreachable_nodes: usize,
    pub dead_ends: usize,
    pub node_types: BTreeMap<String, usize>,
    pub avg_branching_factor: f64,
    pub estimated_completion_minutes: usize,
}

/// Everything the authoring view shows about a graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphAnalysis {
    pub validation: GraphValidation,
    pub metrics: GraphMetrics,
    pub suggestions: Vec<String>,
    pub paths: Vec<Vec<String>>,
}

/// Successor lists keyed by source node
fn adjacency(graph: &BubbleGraph) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &graph.edges {
        adj.entry(edge.from_node.as_str())
            .or_default()
            .push(edge.to_node.as_str());
    }
    adj
}

/// Validate a graph
pub fn validate_graph(graph: &BubbleGraph) -> GraphValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if graph.nodes.is_empty() {
        errors.push("Graph must have at least one node".to_string());
        return GraphValidation {
            is_valid: false,
            errors,
            warnings,
            node_count: 0,
            edge_count: graph.edges.len(),
            has_cycles: false,
            unreachable_nodes: Vec::new(),
        };
    }

    let mut node_ids = HashSet::new();
    for node in &graph.nodes {
        if !node_ids.insert(node.id.as_str()) {
            errors.push(format!("Duplicate node id: {}", node.id));
        }
    }

    if !node_ids.contains(graph.start_node.as_str()) {
        errors.push(format!(
            "Start node '{}' not found in graph nodes",
            graph.start_node
        ));
    }

    for edge in &graph.edges {
        if !node_ids.contains(edge.from_node.as_str()) {
            errors.push(format!("Edge references unknown from_node: {}", edge.from_node));
        }
        if !node_ids.contains(edge.to_node.as_str()) {
            errors.push(format!("Edge references unknown to_node: {}", edge.to_node));
        }
        if edge.from_node == edge.to_node {
            errors.push(format!(
                "Self-loop detected: {} -> {}",
                edge.from_node, edge.to_node
            ));
        }
    }

    let cyclic = has_cycles(graph);
    if cyclic {
        warnings.push("Graph contains cycles - students may get stuck in loops".to_string());
    }

    let unreachable = unreachable_nodes(graph);
    if !unreachable.is_empty() {
        warnings.push(format!("Unreachable nodes found: {}", unreachable.join(", ")));
    }

    let ends = dead_ends(graph);
    if ends.len() > 1 {
        warnings.push(format!("Multiple dead ends found: {}", ends.join(", ")));
    }

    warnings.extend(content_warnings(graph));

    GraphValidation {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        node_count: graph.nodes.len(),
        edge_count: graph.edges.len(),
        has_cycles: cyclic,
        unreachable_nodes: unreachable,
    }
}

fn content_warnings(graph: &BubbleGraph) -> Vec<String> {
    let mut warnings: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.title.trim().is_empty())
        .map(|n| format!("Node '{}' has empty title", n.id))
        .collect();

    let count = |t: BubbleType| graph.nodes.iter().filter(|n| n.node_type == t).count();

    if count(BubbleType::Concept) == 0 {
        warnings.push("No concept bubbles found - consider adding explanatory content".to_string());
    }
    if count(BubbleType::Task) == 0 && count(BubbleType::Quiz) == 0 {
        warnings.push("No interactive bubbles found - consider adding tasks or quizzes".to_string());
    }
    warnings
}

/// Whether any cycle exists, self-loops included
pub fn has_cycles(graph: &BubbleGraph) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let adj = adjacency(graph);
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for root in graph.nodes.iter().map(|n| n.id.as_str()) {
        if marks.contains_key(root) {
            continue;
        }

        // Iterative DFS; each frame is a node and the index of its next successor
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::InProgress);

        while let Some((node, next)) = stack.last_mut() {
            let successors = adj.get(*node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&succ) = successors.get(*next) {
                *next += 1;
                match marks.get(succ) {
                    Some(Mark::InProgress) => return true,
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(succ, Mark::InProgress);
                        stack.push((succ, 0));
                    }
                }
            } else {
                marks.insert(*node, Mark::Done);
                stack.pop();
            }
        }
    }
    false
}

/// Nodes that cannot be reached from the start node
pub fn unreachable_nodes(graph: &BubbleGraph) -> Vec<String> {
    let adj = adjacency(graph);
    let mut visited: HashSet<&str> = HashSet::from([graph.start_node.as_str()]);
    let mut queue = VecDeque::from([graph.start_node.as_str()]);

    while let Some(current) = queue.pop_front() {
        for &next in adj.get(current).into_iter().flatten() {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    graph
        .nodes
        .iter()
        .filter(|n| !visited.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Nodes without outgoing edges
pub fn dead_ends(graph: &BubbleGraph) -> Vec<String> {
    let sources: HashSet<&str> = graph.edges.iter().map(|e| e.from_node.as_str()).collect();
    graph
        .nodes
        .iter()
        .filter(|n| !sources.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Successors of `current` in edge declaration order
pub fn next_nodes(graph: &BubbleGraph, current: &str) -> Vec<String> {
    graph
        .edges
        .iter()
        .filter(|e| e.from_node == current)
        .map(|e| e.to_node.clone())
        .collect()
}

/// Every simple path from the start node to a node without successors.
///
/// Enumeration stops after [`MAX_VALID_PATHS`] paths or [`MAX_PATH_STEPS`]
/// edge traversals, whichever comes first.
pub fn valid_paths(graph: &BubbleGraph) -> Vec<Vec<String>> {
    let adj = adjacency(graph);
    let start = graph.start_node.as_str();
    let mut out = Vec::new();

    // Iterative DFS; each frame is a node on the current path and the index
    // of its next successor
    let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
    let mut on_path: HashSet<&str> = HashSet::from([start]);
    let mut steps = 0usize;

    while let Some(&(current, next)) = stack.last() {
        if out.len() >= MAX_VALID_PATHS || steps >= MAX_PATH_STEPS {
            break;
        }

        let successors = adj.get(current).map(Vec::as_slice).unwrap_or(&[]);
        if successors.is_empty() {
            out.push(stack.iter().map(|(id, _)| id.to_string()).collect());
        }

        match successors.get(next) {
            Some(&succ) => {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                steps += 1;
                if on_path.insert(succ) {
                    stack.push((succ, 0));
                }
            }
            None => {
                on_path.remove(current);
                stack.pop();
            }
        }
    }
    out
}

pub fn metrics(graph: &BubbleGraph) -> GraphMetrics {
    let mut node_types = BTreeMap::new();
    for node in &graph.nodes {
        *node_types.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
    }

    let sources: HashSet<&str> = graph.edges.iter().map(|e| e.from_node.as_str()).collect();
    let avg_branching_factor = if sources.is_empty() {
        0.0
    } else {
        let raw = graph.edges.len() as f64 / sources.len() as f64;
        (raw * 100.0).round() / 100.0
    };

    GraphMetrics {
        total_nodes: graph.nodes.len(),
        total_edges: graph.edges.len(),
        start_node: graph.start_node.clone(),
        has_cycles: has_cycles(graph),
        unreachable_nodes: unreachable_nodes(graph).len(),
        dead_ends: dead_ends(graph).len(),
        node_types,
        avg_branching_factor,
        estimated_completion_minutes: graph.nodes.len() * MINUTES_PER_NODE,
    }
}

/// Authoring advice derived from shape and content mix
pub fn suggest_improvements(graph: &BubbleGraph) -> Vec<String> {
    let validation = validate_graph(graph);
    let mut suggestions = Vec::new();

    if !validation.unreachable_nodes.is_empty() {
        suggestions.push("Connect unreachable nodes to the main learning path".to_string());
    }
    if validation.has_cycles {
        suggestions.push("Review cycles to ensure they don't create infinite loops".to_string());
    }

    let count = |t: BubbleType| graph.nodes.iter().filter(|n| n.node_type == t).count();
    if count(BubbleType::Concept) < count(BubbleType::Task) {
        suggestions.push("Add more concept bubbles to explain before practice".to_string());
    }
    if graph.nodes.len() > 10 {
        suggestions.push("Consider breaking this into multiple sessions".to_string());
    }
    if graph.edges.len() + 1 < graph.nodes.len() {
        suggestions.push("Graph seems linear - consider adding alternative paths".to_string());
    }
    suggestions
}

pub fn analyze(graph: &BubbleGraph) -> GraphAnalysis {
    GraphAnalysis {
        validation: validate_graph(graph),
        metrics: metrics(graph),
        suggestions: suggest_improvements(graph),
        paths: valid_paths(graph),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GraphEdge, GraphNode};

    fn node(id: &str, node_type: BubbleType) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            node_type,
            title: id.to_uppercase(),
            x: 0.0,
            y: 0.0,
            width: 150.0,
            height: 80.0,
            color: None,
        }
    }

    fn edge(from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            from_node: from.to_string(),
            to_node: to.to_string(),
            label: None,
            condition: None,
        }
    }

    fn graph(start: &str, nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> BubbleGraph {
        BubbleGraph {
            start_node: start.to_string(),
            nodes,
            edges,
        }
    }

    /// intro -> task -> (quiz | demo)
    fn branching() -> BubbleGraph {
        graph(
            "intro",
            vec![
                node("intro", BubbleType::Concept),
                node("task", BubbleType::Task),
                node("quiz", BubbleType::Quiz),
                node("demo", BubbleType::Demo),
            ],
            vec![edge("intro", "task"), edge("task", "quiz"), edge("task", "demo")],
        )
    }

    #[test]
    fn test_empty_graph_is_invalid() {
        let result = validate_graph(&graph("a", vec![], vec![]));
        assert!(!result.is_valid);
        assert_eq!(result.errors, vec!["Graph must have at least one node"]);
        assert_eq!(result.node_count, 0);
    }

    #[test]
    fn test_valid_branching_graph() {
        let result = validate_graph(&branching());

        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(!result.has_cycles);
        assert_eq!(result.node_count, 4);
        assert_eq!(result.edge_count, 3);
        assert_eq!(result.warnings, vec!["Multiple dead ends found: quiz, demo"]);
    }

    #[test]
    fn test_structural_errors() {
        let g = graph(
            "missing",
            vec![node("a", BubbleType::Concept), node("a", BubbleType::Task)],
            vec![edge("a", "ghost"), edge("nowhere", "a"), edge("a", "a")],
        );
        let result = validate_graph(&g);

        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "Duplicate node id: a",
                "Start node 'missing' not found in graph nodes",
                "Edge references unknown to_node: ghost",
                "Edge references unknown from_node: nowhere",
                "Self-loop detected: a -> a",
            ]
        );
        assert!(result.has_cycles);
    }

    #[test]
    fn test_warnings_for_cycles_unreachable_and_content() {
        let mut blank = node("c", BubbleType::Demo);
        blank.title = "  ".to_string();
        let g = graph(
            "a",
            vec![node("a", BubbleType::Demo), node("b", BubbleType::Summary), blank],
            vec![edge("a", "b"), edge("b", "a")],
        );
        let result = validate_graph(&g);

        assert!(result.is_valid);
        assert_eq!(result.unreachable_nodes, vec!["c"]);
        assert_eq!(
            result.warnings,
            vec![
                "Graph contains cycles - students may get stuck in loops",
                "Unreachable nodes found: c",
                "Node 'c' has empty title",
                "No concept bubbles found - consider adding explanatory content",
                "No interactive bubbles found - consider adding tasks or quizzes",
            ]
        );
    }

    #[test]
    fn test_next_nodes_in_edge_order() {
        let g = branching();
        assert_eq!(next_nodes(&g, "task"), vec!["quiz", "demo"]);
        assert!(next_nodes(&g, "quiz").is_empty());
        assert!(next_nodes(&g, "unknown").is_empty());
    }

    #[test]
    fn test_valid_paths() {
        let paths = valid_paths(&branching());
        assert_eq!(
            paths,
            vec![
                vec!["intro", "task", "quiz"],
                vec!["intro", "task", "demo"],
            ]
        );
    }

    #[test]
    fn test_valid_paths_skip_revisits() {
        // a -> b -> a loops back; the walk stops instead of recording a path
        let g = graph(
            "a",
            vec![node("a", BubbleType::Concept), node("b", BubbleType::Task), node("c", BubbleType::Quiz)],
            vec![edge("a", "b"), edge("b", "a"), edge("b", "c")],
        );
        assert_eq!(valid_paths(&g), vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_valid_paths_bounded_on_complete_digraph() {
        // Every node links to every other: no dead end and n! simple paths
        let ids: Vec<String> = (0..14).map(|i| format!("n{}", i)).collect();
        let nodes = ids.iter().map(|id| node(id, BubbleType::Concept)).collect();
        let edges = ids
            .iter()
            .flat_map(|a| ids.iter().filter(move |b| *b != a).map(move |b| edge(a, b)))
            .collect();
        let g = graph("n0", nodes, edges);

        assert!(valid_paths(&g).is_empty());
        assert_eq!(analyze(&g).paths.len(), 0);
    }

    #[test]
    fn test_valid_paths_stop_at_path_limit() {
        // Ten diamonds in a row give 2^10 distinct paths
        let mut nodes = vec![node("s0", BubbleType::Concept)];
        let mut edges = Vec::new();
        for i in 0..10 {
            let (from, left, right, to) =
                (format!("s{}", i), format!("l{}", i), format!("r{}", i), format!("s{}", i + 1));
            nodes.push(node(&left, BubbleType::Task));
            nodes.push(node(&right, BubbleType::Quiz));
            nodes.push(node(&to, BubbleType::Concept));
            edges.extend([edge(&from, &left), edge(&from, &right), edge(&left, &to), edge(&right, &to)]);
        }
        let g = graph("s0", nodes, edges);

        let paths = valid_paths(&g);
        assert_eq!(paths.len(), MAX_VALID_PATHS);
        assert!(paths.iter().all(|p| p.len() == 21 && p[20] == "s10"));
    }

    #[test]
    fn test_valid_paths_long_chain() {
        let ids: Vec<String> = (0..20_000).map(|i| format!("n{}", i)).collect();
        let nodes = ids.iter().map(|id| node(id, BubbleType::Concept)).collect();
        let edges = ids.windows(2).map(|w| edge(&w[0], &w[1])).collect();
        let g = graph("n0", nodes, edges);

        let paths = valid_paths(&g);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].len(), 20_000);
    }

    #[test]
    fn test_metrics() {
        let m = metrics(&branching());

        assert_eq!(m.total_nodes, 4);
        assert_eq!(m.total_edges, 3);
        assert_eq!(m.start_node, "intro");
        assert_eq!(m.dead_ends, 2);
        assert_eq!(m.unreachable_nodes, 0);
        assert_eq!(m.node_types.get("task"), Some(&1));
        assert_eq!(m.avg_branching_factor, 1.5);
        assert_eq!(m.estimated_completion_minutes, 20);

        let lonely = metrics(&graph("a", vec![node("a", BubbleType::Concept)], vec![]));
        assert_eq!(lonely.avg_branching_factor, 0.0);
    }

    #[test]
    fn test_avg_branching_rounds_to_two_decimals() {
        let g = graph(
            "a",
            vec![
                node("a", BubbleType::Concept),
                node("b", BubbleType::Task),
                node("c", BubbleType::Quiz),
                node("d", BubbleType::Quiz),
            ],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("b", "c"), edge("c", "d")],
        );
        // 5 edges over 3 sources
        assert_eq!(metrics(&g).avg_branching_factor, 1.67);
    }

    #[test]
    fn test_analyze_combines_reports() {
        let report = analyze(&branching());
        assert!(report.validation.is_valid);
        assert_eq!(report.metrics.total_nodes, 4);
        assert_eq!(report.paths.len(), 2);
        assert!(report.suggestions.is_empty());
    }

    #[test]
    fn test_suggestions() {
        let mut nodes: Vec<GraphNode> = (0..12)
            .map(|i| node(&format!("t{}", i), BubbleType::Task))
            .collect();
        nodes.push(node("c", BubbleType::Concept));
        let g = graph("t0", nodes, vec![edge("t0", "t1")]);

        assert_eq!(
            suggest_improvements(&g),
            vec![
                "Connect unreachable nodes to the main learning path",
                "Add more concept bubbles to explain before practice",
                "Consider breaking this into multiple sessions",
                "Graph seems linear - consider adding alternative paths",
            ]
        );
        assert!(suggest_improvements(&branching()).is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::models::{GraphEdge, GraphNode};
    use proptest::prelude::*;

    fn chain(len: usize) -> BubbleGraph {
        let ids: Vec<String> = (0..len).map(|i| format!("n{}", i)).collect();
        BubbleGraph {
            start_node: ids[0].clone(),
            nodes: ids
                .iter()
                .map(|id| GraphNode {
                    id: id.clone(),
                    node_type: BubbleType::Concept,
                    title: id.clone(),
                    x: 0.0,
                    y: 0.0,
                    width: 150.0,
                    height: 80.0,
                    color: None,
                })
                .collect(),
            edges: ids
                .windows(2)
                .map(|w| GraphEdge {
                    from_node: w[0].clone(),
                    to_node: w[1].clone(),
                    label: None,
                    condition: None,
                })
                .collect(),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]

        /// A chain is valid, acyclic and has exactly one full-length path
        #[test]
        fn chain_has_single_path(len in 1usize..30) {
            let g = chain(len);
            let validation = validate_graph(&g);

            prop_assert!(validation.is_valid);
            prop_assert!(!validation.has_cycles);
            prop_assert!(validation.unreachable_nodes.is_empty());

            let paths = valid_paths(&g);
            prop_assert_eq!(paths.len(), 1);
            prop_assert_eq!(paths[0].len(), len);
        }

        /// Any back edge in a chain closes a cycle
        #[test]
        fn back_edge_creates_cycle(len in 2usize..30, from_seed in 0usize..1000, to_seed in 0usize..1000) {
            let mut g = chain(len);
            let from = 1 + from_seed % (len - 1);
            let to = to_seed % from;
            g.edges.push(GraphEdge {
                from_node: format!("n{}", from),
                to_node: format!("n{}", to),
                label: None,
                condition: None,
            });

            prop_assert!(has_cycles(&g));
            prop_assert!(validate_graph(&g).is_valid);
        }

        /// Paths never repeat a node
        #[test]
        fn paths_are_simple(len in 2usize..12, extra in proptest::collection::vec((0usize..12, 0usize..12), 0..8)) {
            let mut g = chain(len);
            for (a, b) in extra {
                let (a, b) = (a % len, b % len);
                if a != b {
                    g.edges.push(GraphEdge {
                        from_node: format!("n{}", a),
                        to_node: format!("n{}", b),
                        label: None,
                        condition: None,
                    });
                }
            }

            for path in valid_paths(&g) {
                let unique: HashSet<_> = path.iter().collect();
                prop_assert_eq!(unique.len(), path.len());
                prop_assert_eq!(path[0].as_str(), "n0");
            }
        }
    }
}
