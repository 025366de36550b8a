use std::cmp::Reverse;
use std::collections::BTreeSet;

use nalgebra::DVector;
use petgraph::graph::{NodeIndex, UnGraph};

use crate::checker::CollisionChecker;

/// Samples joined when the straight segment between them is collision free.
#[derive(Debug, Clone)]
pub struct VisibilityGraph {
    pub points: Vec<DVector<f64>>,
    pub graph: UnGraph<usize, ()>,
}

impl VisibilityGraph {
    pub fn build(points: Vec<DVector<f64>>, checker: &dyn CollisionChecker) -> Self {
        let mut graph = UnGraph::with_capacity(points.len(), 0);
        let nodes: Vec<NodeIndex> = (0..points.len()).map(|i| graph.add_node(i)).collect();
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                if checker.is_edge_collision_free(&points[i], &points[j]) {
                    graph.add_edge(nodes[i], nodes[j], ());
                }
            }
        }
        Self { points, graph }
    }

    pub fn num_edges(&self) -> usize {
        self.graph.edge_count()
    }

    /// Points of a clique returned by [`greedy_clique_cover`].
    pub fn clique_points(&self, clique: &[usize]) -> Vec<DVector<f64>> {
        clique.iter().map(|&i| self.points[i].clone()).collect()
    }
}

/// Repeatedly seeds a clique with the vertex of highest remaining degree,
/// extends it with the candidate most connected to the other candidates and
/// removes it. Stops at the first clique smaller than `minimum_clique_size`.
pub fn greedy_clique_cover(graph: &UnGraph<usize, ()>, minimum_clique_size: usize) -> Vec<Vec<usize>> {
    let mut remaining: BTreeSet<NodeIndex> = graph.node_indices().collect();
    let mut cliques = vec![];

    let connections = |v: NodeIndex, within: &BTreeSet<NodeIndex>| {
        graph.neighbors(v).filter(|u| within.contains(u)).count()
    };

    while !remaining.is_empty() {
        // ties go to the lowest index
        let Some(seed) = remaining
            .iter()
            .copied()
            .max_by_key(|&v| (connections(v, &remaining), Reverse(v)))
        else {
            break;
        };

        let mut clique = vec![seed];
        let mut candidates: BTreeSet<NodeIndex> = graph
            .neighbors(seed)
            .filter(|u| remaining.contains(u))
            .collect();
        while let Some(next) = candidates
            .iter()
            .copied()
            .max_by_key(|&v| (connections(v, &candidates), Reverse(v)))
        {
            clique.push(next);
            candidates = graph
                .neighbors(next)
                .filter(|u| candidates.contains(u))
                .collect();
        }

        if clique.len() < minimum_clique_size.max(1) {
            break;
        }
        for v in &clique {
            remaining.remove(v);
        }
        let mut members: Vec<usize> = clique.iter().map(|v| graph[*v]).collect();
        members.sort_unstable();
        cliques.push(members);
    }
    cliques
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::checker::FnChecker;

    fn graph(n: usize, edges: &[(usize, usize)]) -> UnGraph<usize, ()> {
        let mut g = UnGraph::new_undirected();
        let nodes: Vec<_> = (0..n).map(|i| g.add_node(i)).collect();
        for &(a, b) in edges {
            g.add_edge(nodes[a], nodes[b], ());
        }
        g
    }

    #[test]
    fn test_two_triangles() {
        // triangles {0,1,2} and {3,4,5} joined by 2-3
        let g = graph(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]);
        let cliques = greedy_clique_cover(&g, 3);
        assert_eq!(cliques, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn test_minimum_size_stops_cover() {
        let g = graph(5, &[(0, 1), (1, 2), (0, 2), (3, 4)]);
        assert_eq!(greedy_clique_cover(&g, 3), vec![vec![0, 1, 2]]);
        assert_eq!(greedy_clique_cover(&g, 2).len(), 2);
        assert!(greedy_clique_cover(&g, 4).is_empty());
    }

    #[test]
    fn test_visibility_across_wall() {
        // wall at x = 0 blocks the two sides from each other
        let checker = FnChecker::new(|q: &DVector<f64>| q[0].abs() > 0.1);
        let points = vec![
            DVector::from_column_slice(&[-1.0, 0.0]),
            DVector::from_column_slice(&[-1.0, 0.5]),
            DVector::from_column_slice(&[1.0, 0.0]),
            DVector::from_column_slice(&[1.0, 0.5]),
        ];
        let visibility = VisibilityGraph::build(points, &checker);
        assert_eq!(visibility.num_edges(), 2);
        let cliques = greedy_clique_cover(&visibility.graph, 2);
        assert_eq!(cliques, vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(visibility.clique_points(&cliques[1])[0][0], 1.0);
    }
}
