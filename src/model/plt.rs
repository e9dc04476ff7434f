use crate::args::{Args, ModelType, OfoType};
use crate::model::base::{Base, TrainConfig};
use crate::model::tree::Tree;
use crate::util::derive_seed;
use crate::{Error, FeatureMat, Index, IndexValueVec, LabelMat, Result};
use hashbrown::HashSet;
use itertools::Itertools;
use log::{info, warn};
use ordered_float::NotNan;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::ops::Range;
use std::path::Path;
use std::sync::Mutex;

/// Rough per-entry footprint of a training bucket, for memLimit planning.
const BUCKET_ENTRY_BYTES: u64 = 16;

fn not_nan(value: f32) -> NotNan<f32> {
    NotNan::new(value).unwrap_or_else(|_| {
        warn!("Non-finite score encountered during prediction; clamping to 0");
        NotNan::new(0.).expect("zero is not NaN")
    })
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    value: NotNan<f32>,
    node: usize,
}

/// Best-first queue with bounded admission.
///
/// `pending` drives the traversal; `finalized` keeps the k best leaf scores
/// seen so far, so that once it is full any candidate below its minimum can
/// be dropped on admission instead of ever entering the heap.
struct TopKQueue {
    pending: BinaryHeap<QueueEntry>,
    finalized: BinaryHeap<Reverse<QueueEntry>>,
    k: usize,
}

impl TopKQueue {
    fn new(k: usize) -> Self {
        Self {
            pending: BinaryHeap::new(),
            finalized: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    fn admits(&self, entry: &QueueEntry) -> bool {
        self.k == 0
            || self.finalized.len() < self.k
            || self
                .finalized
                .peek()
                .map_or(true, |Reverse(min)| min < entry)
    }

    fn push(&mut self, entry: QueueEntry, is_final: bool) {
        if !self.admits(&entry) {
            return;
        }
        if is_final && self.k > 0 {
            if self.finalized.len() == self.k {
                self.finalized.pop();
            }
            self.finalized.push(Reverse(entry));
        }
        self.pending.push(entry);
    }

    fn pop(&mut self) -> Option<QueueEntry> {
        self.pending.pop()
    }
}

/// Per-node training bucket built while streaming the dataset.
#[derive(Default)]
struct NodeBucket {
    examples: Vec<u32>,
    targets: Vec<bool>,
    weights: Vec<f32>,
}

/// Probabilistic label tree: one binary classifier per tree node; a label's
/// score is the product of branch probabilities along its root-to-leaf path.
pub struct Plt {
    tree: Tree,
    bases: Vec<Base>,
}

impl Plt {
    pub fn n_labels(&self) -> usize {
        self.tree.n_leaves()
    }

    pub fn from_parts(tree: Tree, bases: Vec<Base>) -> Plt {
        assert_eq!(tree.n_nodes(), bases.len());
        Plt { tree, bases }
    }

    /// Trains a PLT on the given data and writes the tree and weights into
    /// `output`.
    pub fn train(
        labels: &LabelMat,
        features: &FeatureMat,
        args: &Args,
        output: &Path,
    ) -> Result<Plt> {
        let tree = Tree::build(labels, features, args)?;
        tree.save_structure(&output.join(super::TREE_TEXT_FILE))?;

        let bases = Self::train_bases(&tree, labels, features, args);
        let plt = Plt { tree, bases };
        plt.save(output)?;
        Ok(plt)
    }

    /// Derives the per-example node updates: positives are the union of
    /// leaf-to-root paths of the example's labels, negatives the unvisited
    /// siblings. An example with no positive labels contributes negatives
    /// for the root's children only.
    pub(crate) fn assign_nodes(tree: &Tree, row_labels: &[Index]) -> (Vec<usize>, Vec<usize>) {
        let mut positive = HashSet::new();
        for &label in row_labels {
            if let Some(leaf) = tree.leaf(label) {
                for node in tree.path_to_root(leaf) {
                    if !positive.insert(node) {
                        break; // the rest of the path is already marked
                    }
                }
            }
        }

        let mut negative = Vec::new();
        if positive.is_empty() {
            negative.extend(tree.node(tree.root()).children.iter().copied());
        } else {
            for &node in &positive {
                for &child in &tree.node(node).children {
                    if !positive.contains(&child) {
                        negative.push(child);
                    }
                }
            }
        }

        let mut positive = positive.into_iter().collect_vec();
        positive.sort_unstable();
        negative.sort_unstable();
        (positive, negative)
    }

    fn train_bases(
        tree: &Tree,
        labels: &LabelMat,
        features: &FeatureMat,
        args: &Args,
    ) -> Vec<Base> {
        let n_nodes = tree.n_nodes();
        let n_examples = labels.rows();
        let pick_one = args.pick_one_label_weighting || args.model == ModelType::Hsm;
        let weighted = pick_one || args.inbalance_labels_weighting;
        let config = TrainConfig::from_args(args);

        // Counting pass sizes the buckets so node ranges can be fit within
        // the memory budget, re-streaming the data once per range.
        let mut counts = vec![0u64; n_nodes];
        for r in 0..n_examples {
            let (positive, negative) = Self::assign_nodes(tree, labels.row(r));
            for node in positive.iter().chain(negative.iter()) {
                counts[*node] += 1;
            }
        }
        let ranges = plan_node_ranges(&counts, args.resolved_mem_limit());
        info!(
            "Training {} node classifiers in {} pass(es)",
            n_nodes,
            ranges.len()
        );
        let start_t = time::precise_time_s();
        let pb = Mutex::new(crate::util::create_progress_bar(n_nodes as u64));

        let mut bases: Vec<Option<Base>> = (0..n_nodes).map(|_| None).collect();
        for range in ranges {
            let mut buckets: Vec<NodeBucket> = (0..range.len()).map(|_| NodeBucket::default()).collect();
            for r in 0..n_examples {
                let row_labels = labels.row(r);
                let (positive, negative) = Self::assign_nodes(tree, row_labels);
                let positive_weight = if pick_one && !row_labels.is_empty() {
                    1. / row_labels.len() as f32
                } else {
                    1.
                };
                for &node in &positive {
                    if range.contains(&node) {
                        let bucket = &mut buckets[node - range.start];
                        bucket.examples.push(r as u32);
                        bucket.targets.push(true);
                        if weighted {
                            bucket.weights.push(positive_weight);
                        }
                    }
                }
                for &node in &negative {
                    if range.contains(&node) {
                        let bucket = &mut buckets[node - range.start];
                        bucket.examples.push(r as u32);
                        bucket.targets.push(false);
                        if weighted {
                            bucket.weights.push(1.);
                        }
                    }
                }
            }

            let fitted: Vec<Base> = buckets
                .into_par_iter()
                .enumerate()
                .map(|(offset, mut bucket)| {
                    let node = range.start + offset;
                    if args.inbalance_labels_weighting {
                        apply_inbalance_weights(&mut bucket);
                    }
                    let rows = bucket
                        .examples
                        .iter()
                        .map(|&r| features.row(r as usize))
                        .collect_vec();
                    let base = Base::fit(
                        &rows,
                        &bucket.targets,
                        if weighted {
                            Some(&bucket.weights)
                        } else {
                            None
                        },
                        features.cols(),
                        &config,
                        derive_seed(args.seed, node as u64),
                    );
                    pb.lock().expect("progress bar poisoned").inc();
                    base
                })
                .collect();
            for (offset, base) in fitted.into_iter().enumerate() {
                bases[range.start + offset] = Some(base);
            }
        }
        pb.lock().expect("progress bar poisoned").finish();
        info!(
            "Trained node classifiers; it took {:.2}s",
            time::precise_time_s() - start_t
        );

        bases.into_iter().map(|b| b.expect("all ranges fitted")).collect()
    }

    fn beam_search<F>(&self, x: &[(Index, f32)], top_k: usize, admit: F) -> IndexValueVec
    where
        F: Fn(usize, f32) -> bool,
    {
        let mut queue = TopKQueue::new(top_k);
        let root = self.tree.root();
        let root_value = self.bases[root].probability(x);
        if admit(root, root_value) {
            queue.push(
                QueueEntry {
                    value: not_nan(root_value),
                    node: root,
                },
                self.tree.is_leaf(root),
            );
        }

        let mut predictions = IndexValueVec::new();
        while let Some(QueueEntry { value, node }) = queue.pop() {
            if let Some(label) = self.tree.node(node).label {
                predictions.push((label, value.into_inner()));
                if top_k > 0 && predictions.len() == top_k {
                    break;
                }
            } else {
                for &child in &self.tree.node(node).children {
                    let child_value = value.into_inner() * self.bases[child].probability(x);
                    if admit(child, child_value) {
                        queue.push(
                            QueueEntry {
                                value: not_nan(child_value),
                                node: child,
                            },
                            self.tree.is_leaf(child),
                        );
                    }
                }
            }
        }
        predictions
    }

    /// Top-k (and/or scalar-threshold) prediction, scores descending.
    pub fn predict(&self, x: &[(Index, f32)], top_k: usize, threshold: f32) -> IndexValueVec {
        self.beam_search(x, top_k, |_, value| value >= threshold)
    }

    /// Prediction against the per-node threshold vector installed with
    /// [`Plt::set_thresholds`].
    pub fn predict_with_thresholds(&self, x: &[(Index, f32)]) -> IndexValueVec {
        self.beam_search(x, 0, |node, value| value >= self.tree.node(node).threshold)
    }

    /// Probability of a single label: the product of branch probabilities
    /// along its leaf-to-root path, O(depth) rather than O(tree).
    pub fn predict_for_label(&self, label: Index, x: &[(Index, f32)]) -> f32 {
        match self.tree.leaf(label) {
            None => 0.,
            Some(leaf) => self
                .tree
                .path_to_root(leaf)
                .map(|node| self.bases[node].probability(x))
                .product(),
        }
    }

    /// Installs per-label decision thresholds, propagated down-up so internal
    /// nodes carry the minimum over their children.
    pub fn set_thresholds(&mut self, thresholds: &[f32]) -> Result<()> {
        self.tree.set_thresholds(thresholds)
    }

    /// Online F-measure optimization: tunes per-label thresholds by keeping
    /// running a/b counts and setting each threshold to their ratio.
    pub fn ofo(&mut self, labels: &LabelMat, features: &FeatureMat, args: &Args) -> Vec<f32> {
        let k = self.n_labels();
        info!("Optimizing thresholds for F-measure ({:?})", args.ofo_type);

        match args.ofo_type {
            OfoType::Micro => {
                let (mut a, mut b) = (args.ofo_a as f64, args.ofo_b as f64);
                for _ in 0..args.epochs {
                    for r in 0..features.rows() {
                        let theta = (a / b) as f32;
                        let predicted = self.predict(features.row(r), 0, theta);
                        let (intersection, union) =
                            intersection_union(labels.row(r), &predicted);
                        a += intersection as f64;
                        b += union as f64;
                    }
                }
                vec![(a / b) as f32; k]
            }
            variant => {
                let tuned: HashSet<Index> = match variant {
                    // Mixed tunes only the most frequent labels individually
                    OfoType::Mixed => {
                        let frequencies = super::tree::label_frequencies(labels);
                        let mut order = (0..k as Index).collect_vec();
                        order.sort_unstable_by_key(|&l| Reverse(frequencies[l as usize]));
                        order.into_iter().take(args.ofo_top_labels).collect()
                    }
                    _ => (0..k as Index).collect(),
                };

                let mut label_a = vec![args.ofo_a as f64; k];
                let mut label_b = vec![args.ofo_b as f64; k];
                let (mut micro_a, mut micro_b) = (args.ofo_a as f64, args.ofo_b as f64);

                // Macro uses the plain per-label ratio; mixed bounds tuned
                // labels from below by the shared micro estimate.
                let theta =
                    move |la: f64, lb: f64, ma: f64, mb: f64, tuned: bool| -> f32 {
                        let label_ratio = (la / lb) as f32;
                        let micro = (ma / mb) as f32;
                        match variant {
                            OfoType::Macro => label_ratio,
                            _ if tuned => label_ratio.max(micro),
                            _ => micro,
                        }
                    };

                let initial = (0..k as Index)
                    .map(|l| {
                        theta(
                            label_a[l as usize],
                            label_b[l as usize],
                            micro_a,
                            micro_b,
                            tuned.contains(&l),
                        )
                    })
                    .collect_vec();
                self.tree
                    .set_thresholds(&initial)
                    .expect("threshold count matches label count");

                for _ in 0..args.epochs {
                    for r in 0..features.rows() {
                        let truth = labels.row(r);
                        let predicted = self.predict_with_thresholds(features.row(r));
                        let predicted_set: HashSet<Index> =
                            predicted.iter().map(|&(l, _)| l).collect();

                        let mut touched: Vec<Index> = truth.to_vec();
                        touched.extend(predicted_set.iter().copied());
                        touched.sort_unstable();
                        touched.dedup();

                        for &label in &touched {
                            let hit = predicted_set.contains(&label)
                                && truth.binary_search(&label).is_ok();
                            let l = label as usize;
                            label_a[l] += hit as u64 as f64;
                            label_b[l] += 1.;
                            micro_a += hit as u64 as f64;
                            micro_b += 1.;
                        }
                        for &label in &touched {
                            let l = label as usize;
                            self.tree.update_leaf_threshold(
                                label,
                                theta(
                                    label_a[l],
                                    label_b[l],
                                    micro_a,
                                    micro_b,
                                    tuned.contains(&label),
                                ),
                            );
                        }
                    }

                    // Untouched labels still track the drifting micro estimate
                    for label in 0..k as Index {
                        if !tuned.contains(&label) {
                            self.tree.update_leaf_threshold(
                                label,
                                theta(0., 1., micro_a, micro_b, false),
                            );
                        }
                    }
                }

                (0..k as Index)
                    .map(|l| {
                        theta(
                            label_a[l as usize],
                            label_b[l as usize],
                            micro_a,
                            micro_b,
                            tuned.contains(&l),
                        )
                    })
                    .collect_vec()
            }
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        self.tree.save(&dir.join(super::TREE_FILE))?;
        crate::util::save_bincode(&self.bases, &dir.join(super::WEIGHTS_FILE))
    }

    pub fn load(dir: &Path) -> Result<Plt> {
        let tree = Tree::load(&dir.join(super::TREE_FILE))?;
        let bases: Vec<Base> = crate::util::load_bincode(&dir.join(super::WEIGHTS_FILE))?;
        if bases.len() != tree.n_nodes() {
            return Err(Error::Data(format!(
                "model has {} classifiers for {} tree nodes",
                bases.len(),
                tree.n_nodes()
            )));
        }
        Ok(Plt { tree, bases })
    }
}

/// Splits nodes into contiguous ranges whose estimated bucket footprint
/// stays within the memory budget.
fn plan_node_ranges(counts: &[u64], mem_limit: u64) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut bytes = 0u64;
    for (node, &count) in counts.iter().enumerate() {
        let node_bytes = count * BUCKET_ENTRY_BYTES;
        if bytes + node_bytes > mem_limit && node > start {
            ranges.push(start..node);
            start = node;
            bytes = 0;
        }
        bytes += node_bytes;
    }
    if start < counts.len() {
        ranges.push(start..counts.len());
    }
    ranges
}

fn apply_inbalance_weights(bucket: &mut NodeBucket) {
    let n_positive = bucket.targets.iter().filter(|&&t| t).count() as f32;
    let n_negative = bucket.targets.len() as f32 - n_positive;
    if n_positive == 0. || n_negative == 0. {
        return;
    }
    let positive_weight = (n_positive + n_negative) / (2. * n_positive);
    let negative_weight = (n_positive + n_negative) / (2. * n_negative);
    if bucket.weights.is_empty() {
        bucket.weights = vec![1.; bucket.targets.len()];
    }
    for (weight, &target) in bucket.weights.iter_mut().zip(&bucket.targets) {
        *weight *= if target {
            positive_weight
        } else {
            negative_weight
        };
    }
}

fn intersection_union(truth: &[Index], predicted: &IndexValueVec) -> (usize, usize) {
    let intersection = predicted
        .iter()
        .filter(|(label, _)| truth.binary_search(label).is_ok())
        .count();
    (intersection, truth.len() + predicted.len() - intersection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::TreeType;

    /// Complete binary tree over 4 labels with constant node probabilities
    /// chosen to give the label scores [0.9, 0.1, 0.8, 0.5].
    fn toy_plt() -> Plt {
        let mut args = Args::default();
        args.tree_type = TreeType::CompleteInOrder;
        let mut labels = LabelMat::new();
        for l in 0..4u32 {
            labels.append_row(vec![l]);
        }
        let features = {
            let mut m = FeatureMat::new();
            for _ in 0..4 {
                m.append_row(vec![(2, 1.)]);
            }
            m
        };
        let tree = Tree::build(&labels, &features, &args).unwrap();

        let probability_by_node = [1.0, 1.0, 1.0, 0.9, 0.1, 0.8, 0.5];
        let bases = probability_by_node
            .iter()
            .map(|&probability| Base::Constant { probability })
            .collect_vec();
        Plt::from_parts(tree, bases)
    }

    fn training_data() -> (LabelMat, FeatureMat) {
        let mut labels = LabelMat::new();
        let mut features = FeatureMat::new();
        // Each label has its own indicative feature; several examples each
        for round in 0..5u32 {
            for l in 0..4u32 {
                labels.append_row(vec![l]);
                features.append_row(vec![(1, 1.), (2 + l, 1.), (6 + (round % 2), 0.2)]);
            }
        }
        (labels, features)
    }

    #[test]
    fn test_predict_top_k_order() {
        let plt = toy_plt();
        let predictions = plt.predict(&[(2, 1.)], 3, 0.);
        assert_eq!(vec![(0, 0.9), (2, 0.8), (3, 0.5)], predictions);
    }

    #[test]
    fn test_predict_with_threshold_only() {
        let plt = toy_plt();
        let predictions = plt.predict(&[(2, 1.)], 0, 0.45);
        assert_eq!(vec![(0, 0.9), (2, 0.8), (3, 0.5)], predictions);

        let all = plt.predict(&[(2, 1.)], 0, 0.);
        assert_eq!(4, all.len());
    }

    #[test]
    fn test_predict_with_threshold_vector() {
        let mut plt = toy_plt();
        plt.set_thresholds(&[0.0, 0.0, 0.95, 0.0]).unwrap();
        let predictions = plt.predict_with_thresholds(&[(2, 1.)]);
        // Label 2 is omitted despite scoring 0.8
        assert_eq!(vec![(0, 0.9), (3, 0.5), (1, 0.1)], predictions);
    }

    #[test]
    fn test_predict_for_label_matches_path_product() {
        let plt = toy_plt();
        let x = [(2, 1.)];
        for (label, expected) in [(0, 0.9), (1, 0.1), (2, 0.8), (3, 0.5)] {
            let p = plt.predict_for_label(label, &x);
            assert!((p - expected).abs() < 1e-6);
        }
        assert_eq!(0., plt.predict_for_label(99, &x));
    }

    #[test]
    fn test_single_label_predicts_unit_probability() {
        let mut labels = LabelMat::new();
        labels.append_row(vec![0]);
        let mut features = FeatureMat::new();
        features.append_row(vec![(2, 1.)]);
        let tree = Tree::build(&labels, &features, &Args::default()).unwrap();
        let plt = Plt::from_parts(tree, vec![Base::Constant { probability: 1.0 }]);

        assert_eq!(vec![(0, 1.0)], plt.predict(&[(5, 123.)], 5, 0.));
        assert_eq!(vec![(0, 1.0)], plt.predict(&[], 1, 0.));
    }

    #[test]
    fn test_assign_nodes() {
        let plt = toy_plt();
        let tree = &plt.tree;

        // Leaves sit at nodes 3..=6 for labels 0..=3
        let (positive, negative) = Plt::assign_nodes(tree, &[0]);
        assert_eq!(vec![0, 1, 3], positive);
        assert_eq!(vec![2, 4], negative);

        let (positive, negative) = Plt::assign_nodes(tree, &[0, 3]);
        assert_eq!(vec![0, 1, 2, 3, 6], positive);
        assert_eq!(vec![4, 5], negative);

        // No positive labels: negatives along the root's children only
        let (positive, negative) = Plt::assign_nodes(tree, &[]);
        assert!(positive.is_empty());
        assert_eq!(vec![1, 2], negative);
    }

    #[test]
    fn test_assignment_deterministic() {
        let plt = toy_plt();
        let (p1, n1) = Plt::assign_nodes(&plt.tree, &[1, 2]);
        let (p2, n2) = Plt::assign_nodes(&plt.tree, &[1, 2]);
        assert_eq!(p1, p2);
        assert_eq!(n1, n2);
    }

    #[test]
    fn test_train_recovers_indicative_features() {
        let (labels, features) = training_data();
        let mut args = Args::default();
        args.tree_type = TreeType::CompleteInOrder;
        args.max_leaves = 2;
        args.weights_threshold = 0.;
        args.norm = false;

        let dir = tempfile::tempdir().unwrap();
        let plt = Plt::train(&labels, &features, &args, dir.path()).unwrap();

        for l in 0..4u32 {
            let x = vec![(1, 1.), (2 + l, 1.)];
            let top = plt.predict(&x, 1, 0.);
            assert_eq!(l, top[0].0, "expected label {} for {:?}, got {:?}", l, x, top);
        }
    }

    #[test]
    fn test_train_deterministic_and_round_trips() {
        let (labels, features) = training_data();
        let mut args = Args::default();
        args.seed = 99;

        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let a = Plt::train(&labels, &features, &args, dir_a.path()).unwrap();
        let _ = Plt::train(&labels, &features, &args, dir_b.path()).unwrap();

        let loaded = Plt::load(dir_a.path()).unwrap();
        let x = vec![(1, 1.), (3, 1.)];
        assert_eq!(a.predict(&x, 4, 0.), loaded.predict(&x, 4, 0.));

        let b = Plt::load(dir_b.path()).unwrap();
        assert_eq!(a.predict(&x, 4, 0.), b.predict(&x, 4, 0.));
    }

    #[test]
    fn test_mem_limit_passes_do_not_change_model() {
        let (labels, features) = training_data();
        let mut args = Args::default();
        args.tree_type = TreeType::CompleteInOrder;

        let dir_a = tempfile::tempdir().unwrap();
        let unlimited = Plt::train(&labels, &features, &args, dir_a.path()).unwrap();

        // A tiny budget forces one node per pass
        args.mem_limit = 1;
        let dir_b = tempfile::tempdir().unwrap();
        let limited = Plt::train(&labels, &features, &args, dir_b.path()).unwrap();

        let x = vec![(1, 1.), (4, 1.)];
        assert_eq!(unlimited.predict(&x, 4, 0.), limited.predict(&x, 4, 0.));
    }

    #[test]
    fn test_plan_node_ranges() {
        // Every node fits alone: 10 entries * 16 bytes each
        let counts = vec![10, 10, 10];
        assert_eq!(
            vec![0..1, 1..2, 2..3],
            plan_node_ranges(&counts, BUCKET_ENTRY_BYTES * 10)
        );
        assert_eq!(vec![0..3], plan_node_ranges(&counts, u64::MAX));
        // Oversized single node still gets its own range
        assert_eq!(
            vec![0..1, 1..2, 2..3],
            plan_node_ranges(&counts, 1)
        );
    }

    #[test]
    fn test_inbalance_weights() {
        let mut bucket = NodeBucket {
            examples: vec![0, 1, 2, 3],
            targets: vec![true, false, false, false],
            weights: Vec::new(),
        };
        apply_inbalance_weights(&mut bucket);
        assert_eq!(vec![2.0, 4. / 6., 4. / 6., 4. / 6.], bucket.weights);
    }

    #[test]
    fn test_ofo_learns_sensible_thresholds() {
        let plt_template = || toy_plt();

        // Micro: single shared threshold replicated per label
        let mut plt = plt_template();
        let mut labels = LabelMat::new();
        let mut features = FeatureMat::new();
        for _ in 0..10 {
            labels.append_row(vec![0, 2]);
            features.append_row(vec![(2, 1.)]);
        }
        let mut args = Args::default();
        args.ofo_type = OfoType::Micro;
        args.epochs = 4;
        let thresholds = plt.ofo(&labels, &features, &args);
        assert_eq!(4, thresholds.len());
        assert!(thresholds.iter().all(|&t| t == thresholds[0]));
        assert!(thresholds[0] > 0. && thresholds[0] < 1.);

        // Macro: per-label thresholds; labels that are always right keep
        // higher ratios than labels that are always wrong
        let mut plt = plt_template();
        args.ofo_type = OfoType::Macro;
        let thresholds = plt.ofo(&labels, &features, &args);
        assert!(thresholds[0] > thresholds[3]);
        // Label 3 is always predicted and never true, so its plain ratio
        // sinks below the shared micro estimate, which here never drops
        // under its a/b starting point of 0.5
        assert!(thresholds[3] < args.ofo_a / args.ofo_b);

        // Mixed bounds the same label from below by the micro estimate
        let mut plt = plt_template();
        args.ofo_type = OfoType::Mixed;
        let thresholds = plt.ofo(&labels, &features, &args);
        assert!(thresholds[3] >= args.ofo_a / args.ofo_b);
    }
}
