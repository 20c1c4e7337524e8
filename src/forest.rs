//! Random-forest classifier evaluated from an exported tree ensemble.
//!
//! The export keeps scikit-learn's flat node arrays per tree: `children_left`
//! and `children_right` index into the same arrays, `-1` marks a leaf, and
//! `value` holds the per-class weight of the training samples that reached
//! each node.

use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;
use std::path::Path;

const LEAF: i64 = -1;

#[derive(Debug, Clone, Deserialize)]
pub struct DecisionTree {
    children_left: Vec<i64>,
    children_right: Vec<i64>,
    feature: Vec<i64>,
    threshold: Vec<f64>,
    value: Vec<Vec<f64>>,
}

impl DecisionTree {
    fn validate(&self, n_features: usize, n_classes: usize) -> Result<()> {
        let nodes = self.children_left.len();
        ensure!(nodes > 0, "tree has no nodes");
        ensure!(
            self.children_right.len() == nodes
                && self.feature.len() == nodes
                && self.threshold.len() == nodes
                && self.value.len() == nodes,
            "node arrays have different lengths"
        );

        for node in 0..nodes {
            let (left, right) = (self.children_left[node], self.children_right[node]);
            if left == LEAF {
                let row = &self.value[node];
                ensure!(
                    row.len() == n_classes,
                    "leaf {node} has {} class weights, expected {n_classes}",
                    row.len()
                );
                ensure!(
                    row.iter().all(|w| w.is_finite() && *w >= 0.0),
                    "leaf {node} has a negative or non-finite class weight"
                );
                ensure!(
                    row.iter().sum::<f64>() > 0.0,
                    "leaf {node} has no class weight"
                );
                continue;
            }

            // Children are always stored after their parent, so this also rules out cycles.
            for child in [left, right] {
                ensure!(
                    child > node as i64 && (child as usize) < nodes,
                    "node {node} points at invalid child {child}"
                );
            }
            let feature = self.feature[node];
            ensure!(
                feature >= 0 && (feature as usize) < n_features,
                "node {node} splits on unknown feature {feature}"
            );
        }
        Ok(())
    }

    fn leaf(&self, sample: &[f64]) -> usize {
        let mut node = 0;
        while self.children_left[node] != LEAF {
            // Forests are fit on f32 inputs; compare at that precision.
            let x = sample[self.feature[node] as usize] as f32 as f64;
            node = if x <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        node
    }

    fn accumulate_proba(&self, sample: &[f64], out: &mut [f64]) {
        let row = &self.value[self.leaf(sample)];
        let total: f64 = row.iter().sum();
        for (acc, weight) in out.iter_mut().zip(row) {
            *acc += weight / total;
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    /// Encoded class ids, in the column order of `predict_proba`.
    classes: Vec<u32>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    #[cfg(test)]
    pub fn new(n_features: usize, classes: Vec<u32>, trees: Vec<DecisionTree>) -> Result<Self> {
        let forest = Self {
            n_features,
            classes,
            trees,
        };
        forest.validate()?;
        Ok(forest)
    }

    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read forest {}", path.display()))?;
        let forest: RandomForest = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed forest {}", path.display()))?;
        forest
            .validate()
            .with_context(|| format!("Invalid forest {}", path.display()))?;
        tracing::debug!(
            trees = forest.trees.len(),
            classes = forest.classes.len(),
            "Forest loaded"
        );
        Ok(forest)
    }

    fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            bail!("Forest has no trees");
        }
        ensure!(!self.classes.is_empty(), "Forest has no classes");
        for (index, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features, self.classes.len())
                .with_context(|| format!("tree {index}"))?;
        }
        Ok(())
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn classes(&self) -> &[u32] {
        &self.classes
    }

    /// Mean of the per-tree class distributions at the leaves `sample` reaches.
    pub fn predict_proba(&self, sample: &[f64]) -> Result<Vec<f64>> {
        ensure!(
            sample.len() == self.n_features,
            "expected {} features, got {}",
            self.n_features,
            sample.len()
        );

        let mut proba = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            tree.accumulate_proba(sample, &mut proba);
        }
        let n_trees = self.trees.len() as f64;
        proba.iter_mut().for_each(|p| *p /= n_trees);
        Ok(proba)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// One split on `feature` with the given leaf weights.
    pub(crate) fn stump(
        feature: i64,
        threshold: f64,
        left: Vec<f64>,
        right: Vec<f64>,
    ) -> DecisionTree {
        DecisionTree {
            children_left: vec![1, LEAF, LEAF],
            children_right: vec![2, LEAF, LEAF],
            feature: vec![feature, -2, -2],
            threshold: vec![threshold, -2.0, -2.0],
            value: vec![vec![1.0; left.len()], left, right],
        }
    }

    #[test]
    fn averages_normalized_leaf_distributions() {
        let forest = RandomForest::new(
            2,
            vec![0, 1],
            vec![
                stump(0, 5.0, vec![3.0, 1.0], vec![0.0, 4.0]),
                stump(1, 0.5, vec![1.0, 1.0], vec![10.0, 0.0]),
            ],
        )
        .unwrap();

        // tree 1 -> left (0.75, 0.25), tree 2 -> right (1.0, 0.0)
        let proba = forest.predict_proba(&[2.0, 3.0]).unwrap();
        assert!((proba[0] - 0.875).abs() < 1e-12);
        assert!((proba[1] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn threshold_is_inclusive_on_the_left() {
        let forest =
            RandomForest::new(1, vec![0, 1], vec![stump(0, 5.0, vec![1.0, 0.0], vec![0.0, 1.0])])
                .unwrap();
        assert_eq!(forest.predict_proba(&[5.0]).unwrap(), vec![1.0, 0.0]);
        assert_eq!(forest.predict_proba(&[5.5]).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn compares_at_single_precision() {
        // 0.1 rounds up to 0.10000000149 in f32, which lands right of this threshold.
        let forest = RandomForest::new(
            1,
            vec![0, 1],
            vec![stump(0, 0.1000000005, vec![1.0, 0.0], vec![0.0, 1.0])],
        )
        .unwrap();
        assert_eq!(forest.predict_proba(&[0.1]).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let forest =
            RandomForest::new(1, vec![0, 1], vec![stump(0, 5.0, vec![1.0, 0.0], vec![0.0, 1.0])])
                .unwrap();
        assert!(forest.predict_proba(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn rejects_inconsistent_trees() {
        let mut bad_child = stump(0, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]);
        bad_child.children_left[0] = 7;
        assert!(RandomForest::new(1, vec![0, 1], vec![bad_child]).is_err());

        let bad_feature = stump(3, 1.0, vec![1.0, 0.0], vec![0.0, 1.0]);
        assert!(RandomForest::new(1, vec![0, 1], vec![bad_feature]).is_err());

        let wrong_width = stump(0, 1.0, vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]);
        assert!(RandomForest::new(1, vec![0, 1], vec![wrong_width]).is_err());

        let negative = stump(0, 5.0, vec![3.0, -2.0], vec![0.0, 1.0]);
        assert!(RandomForest::new(1, vec![0, 1], vec![negative]).is_err());

        let not_finite = stump(0, 5.0, vec![1.0, 0.0], vec![f64::INFINITY, 1.0]);
        assert!(RandomForest::new(1, vec![0, 1], vec![not_finite]).is_err());

        assert!(RandomForest::new(1, vec![0, 1], vec![]).is_err());
    }

    #[test]
    fn loads_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "n_features": 1,
                "classes": [4, 2],
                "trees": [{{
                    "children_left": [1, -1, -1],
                    "children_right": [2, -1, -1],
                    "feature": [0, -2, -2],
                    "threshold": [0.5, -2.0, -2.0],
                    "value": [[5.0, 5.0], [5.0, 0.0], [0.0, 5.0]]
                }}]
            }}"#
        )
        .unwrap();

        let forest = RandomForest::from_file(file.path()).unwrap();
        assert_eq!(forest.classes(), &[4, 2]);
        assert_eq!(forest.n_features(), 1);
        assert_eq!(forest.predict_proba(&[1.0]).unwrap(), vec![0.0, 1.0]);
    }
}
