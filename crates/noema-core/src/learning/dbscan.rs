//! Density-based clustering of candidate embeddings.
//!
//! Points within `eps` cosine distance are neighbours; a point with at least
//! `min_points` neighbours (itself included) is a core point. Clusters grow
//! from core points in index order, so labels are deterministic for a given
//! input order.

use crate::semantic::cosine_similarity;
use crate::types::Embedding;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Cluster(usize),
    Noise,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub labels: Vec<Label>,
    pub clusters: usize,
}

impl Clustering {
    /// Point indices of each cluster, in cluster order.
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.clusters];
        for (i, label) in self.labels.iter().enumerate() {
            if let Label::Cluster(c) = label {
                out[*c].push(i);
            }
        }
        out
    }

    pub fn noise(&self) -> usize {
        self.labels.iter().filter(|l| **l == Label::Noise).count()
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).max(0.0)
}

pub fn dbscan(points: &[Embedding], eps: f32, min_points: usize) -> Clustering {
    let neighbours: Vec<Vec<usize>> = points
        .par_iter()
        .map(|p| {
            points
                .iter()
                .enumerate()
                .filter(|(_, q)| cosine_distance(p, q) <= eps)
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    let is_core = |i: usize| neighbours[i].len() >= min_points.max(1);

    let mut labels: Vec<Option<Label>> = vec![None; points.len()];
    let mut clusters = 0;
    for start in 0..points.len() {
        if labels[start].is_some() {
            continue;
        }
        if !is_core(start) {
            labels[start] = Some(Label::Noise);
            continue;
        }
        let cluster = clusters;
        clusters += 1;
        labels[start] = Some(Label::Cluster(cluster));
        let mut frontier: Vec<usize> = neighbours[start].clone();
        while let Some(j) = frontier.pop() {
            match labels[j] {
                Some(Label::Cluster(_)) => continue,
                // border point reached from a core point
                Some(Label::Noise) => labels[j] = Some(Label::Cluster(cluster)),
                None => {
                    labels[j] = Some(Label::Cluster(cluster));
                    if is_core(j) {
                        frontier.extend(neighbours[j].iter().copied());
                    }
                }
            }
        }
    }

    Clustering {
        labels: labels.into_iter().map(|l| l.unwrap_or(Label::Noise)).collect(),
        clusters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_group_and_noise() {
        let mut points = vec![vec![1.0, 0.0]; 5];
        points.push(vec![0.99, 0.05]);
        points.push(vec![0.0, 1.0]);
        let result = dbscan(&points, 0.1, 5);
        assert_eq!(result.clusters, 1);
        assert_eq!(result.members()[0].len(), 6);
        assert_eq!(result.labels[6], Label::Noise);
        assert_eq!(result.noise(), 1);
    }

    #[test]
    fn test_sparse_points_are_all_noise() {
        let points = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.0]];
        let result = dbscan(&points, 0.1, 2);
        assert_eq!(result.clusters, 0);
        assert_eq!(result.noise(), 3);
    }

    #[test]
    fn test_two_clusters_in_input_order() {
        let mut points = vec![vec![0.0, 1.0]; 3];
        points.extend(vec![vec![1.0, 0.0]; 3]);
        let result = dbscan(&points, 0.05, 3);
        assert_eq!(result.clusters, 2);
        assert_eq!(result.labels[0], Label::Cluster(0));
        assert_eq!(result.labels[5], Label::Cluster(1));
    }
}
