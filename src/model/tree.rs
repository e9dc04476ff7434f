use crate::args::{Args, TreeType};
use crate::mat::l2_normalize;
use crate::model::cluster::balanced_kmeans;
use crate::{Error, FeatureMat, Index, IndexValueVec, LabelMat, Result};
use hashbrown::HashMap;
use itertools::{izip, Itertools};
use log::info;
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Node of a label tree, held in the tree's flat arena.
///
/// Parent/child links are indices into that arena, which keeps the structure
/// free of ownership cycles and cheap to serialize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub index: usize,
    pub label: Option<Index>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub threshold: f32,
}

/// A k-ary tree with labels at the leaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    leaves: HashMap<Index, usize>,
    root: usize,
}

impl Tree {
    fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            leaves: HashMap::new(),
            root: 0,
        }
    }

    fn add_node(&mut self, parent: Option<usize>, label: Option<Index>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(TreeNode {
            index,
            label,
            parent,
            children: Vec::new(),
            threshold: 0.,
        });
        if let Some(label) = label {
            self.leaves.insert(label, index);
        }
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn root(&self) -> usize {
        self.root
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn is_leaf(&self, index: usize) -> bool {
        self.nodes[index].label.is_some()
    }

    pub fn leaf(&self, label: Index) -> Option<usize> {
        self.leaves.get(&label).copied()
    }

    /// Walks from `node` up to the root, inclusive.
    pub fn path_to_root(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let mut current = Some(node);
        std::iter::from_fn(move || {
            let node = current?;
            current = self.nodes[node].parent;
            Some(node)
        })
    }

    pub fn depth(&self, node: usize) -> usize {
        self.path_to_root(node).count() - 1
    }

    /// Builds a tree for the label space of `labels` using the configured
    /// strategy, or loads one from `args.tree_structure` when set.
    pub fn build(labels: &LabelMat, features: &FeatureMat, args: &Args) -> Result<Tree> {
        let k = labels.cols();
        if k == 0 {
            return Err(Error::Data("no labels in training data".to_string()));
        }

        if !args.tree_structure.is_empty() {
            return Self::load_structure(Path::new(&args.tree_structure));
        }

        let mut rng = StdRng::seed_from_u64(args.seed);
        let tree = if k == 1 {
            // A single label needs no hierarchy.
            let mut tree = Tree::empty();
            tree.add_node(None, Some(0));
            tree
        } else {
            match args.tree_type {
                TreeType::CompleteInOrder => Self::build_complete(k, false, args.arity, &mut rng),
                TreeType::CompleteRandom => Self::build_complete(k, true, args.arity, &mut rng),
                TreeType::BalancedInOrder => Self::build_balanced(k, false, args, &mut rng),
                TreeType::BalancedRandom => Self::build_balanced(k, true, args, &mut rng),
                TreeType::Huffman => Self::build_huffman(&label_frequencies(labels), args.arity),
                TreeType::HierarchicalKMeans => {
                    let label_features = compute_label_feature_matrix(
                        labels,
                        features,
                        args.norm,
                        args.k_means_weighted_features,
                    );
                    Self::build_kmeans(&label_features, args)
                }
            }
        };

        info!(
            "Built {:?} tree: {} nodes, {} leaves",
            args.tree_type,
            tree.n_nodes(),
            tree.n_leaves()
        );
        tree.validate(true)?;
        Ok(tree)
    }

    /// Complete k-ary tree: node `i`'s parent is `(i - 1) / arity` and the
    /// last `k` nodes are the leaves.
    fn build_complete(k: usize, randomize: bool, arity: usize, rng: &mut StdRng) -> Tree {
        let t = (arity * k - 1 + arity - 2) / (arity - 1);
        let first_leaf = t - k;

        let mut label_order = (0..k as Index).collect_vec();
        if randomize {
            label_order.shuffle(rng);
        }

        let mut tree = Tree::empty();
        tree.add_node(None, None);
        for i in 1..t {
            let label = if i >= first_leaf {
                Some(label_order[i - first_leaf])
            } else {
                None
            };
            tree.add_node(Some((i - 1) / arity), label);
        }
        tree
    }

    /// Balanced k-ary tree: recursive split of the label list into `arity`
    /// contiguous parts whose sizes differ by at most one.
    fn build_balanced(k: usize, randomize: bool, args: &Args, rng: &mut StdRng) -> Tree {
        let mut tree = Tree::empty();
        let root = tree.add_node(None, None);

        let mut label_order = (0..k as Index).collect_vec();
        if randomize {
            label_order.shuffle(rng);
        }

        let mut queue = std::collections::VecDeque::new();
        queue.push_back((root, label_order));
        while let Some((node, partition)) = queue.pop_front() {
            if partition.len() > args.max_leaves {
                let base_size = partition.len() / args.arity;
                let mut with_one_more = partition.len() % args.arity;
                let mut rest = partition.as_slice();
                for _ in 0..args.arity {
                    let size = base_size + (with_one_more > 0) as usize;
                    with_one_more = with_one_more.saturating_sub(1);
                    if size == 0 {
                        continue;
                    }
                    let (part, tail) = rest.split_at(size);
                    rest = tail;
                    if let [label] = part {
                        tree.add_node(Some(node), Some(*label));
                    } else {
                        let child = tree.add_node(Some(node), None);
                        queue.push_back((child, part.to_vec()));
                    }
                }
            } else {
                for label in partition {
                    tree.add_node(Some(node), Some(label));
                }
            }
        }
        tree
    }

    /// Huffman tree over label frequencies: repeatedly merges the `arity`
    /// least frequent subtrees, leaving frequent labels near the root.
    fn build_huffman(frequencies: &[u64], arity: usize) -> Tree {
        let mut tree = Tree::empty();

        // Ties break on node index, keeping the build deterministic.
        let mut queue = BinaryHeap::new();
        for (label, &frequency) in frequencies.iter().enumerate() {
            let node = tree.add_node(None, Some(label as Index));
            queue.push(Reverse((frequency, node)));
        }

        while queue.len() > 1 {
            let mut to_merge = Vec::with_capacity(arity);
            for _ in 0..arity {
                match queue.pop() {
                    Some(Reverse(entry)) => to_merge.push(entry),
                    None => break,
                }
            }

            let parent = tree.add_node(None, None);
            let mut merged_frequency = 0;
            for (frequency, node) in to_merge {
                tree.nodes[node].parent = Some(parent);
                tree.nodes[parent].children.push(node);
                merged_frequency += frequency;
            }
            queue.push(Reverse((merged_frequency, parent)));
        }

        if let Some(Reverse((_, root))) = queue.pop() {
            tree.root = root;
        }
        tree
    }

    /// Hierarchical balanced k-means over the label-feature centroid matrix.
    ///
    /// Sibling partitions cluster in parallel, one rayon task each, but seeds
    /// are drawn in frontier order on the calling thread and nodes are created
    /// only here, so the tree shape depends on the seed alone.
    fn build_kmeans(label_features: &FeatureMat, args: &Args) -> Tree {
        info!(
            "Hierarchical k-means clustering of {} labels",
            label_features.rows()
        );
        let k = label_features.rows();
        let mut tree = Tree::empty();
        let root = tree.add_node(None, None);
        let mut seeder = StdRng::seed_from_u64(args.seed);

        let all_labels = (0..k as Index).collect_vec();
        let mut frontier: Vec<(usize, Vec<Index>)> = Vec::new();
        if all_labels.len() <= args.max_leaves {
            for label in all_labels {
                tree.add_node(Some(root), Some(label));
            }
        } else {
            frontier.push((root, all_labels));
        }

        while !frontier.is_empty() {
            let jobs = frontier
                .drain(..)
                .map(|(node, partition)| {
                    let seed = seeder.gen::<u64>();
                    (node, partition, seed)
                })
                .collect_vec();

            let assignments: Vec<Vec<u32>> = jobs
                .par_iter()
                .map(|(_, partition, seed)| {
                    balanced_kmeans(
                        partition,
                        label_features,
                        args.arity,
                        args.k_means_eps,
                        args.k_means_balanced,
                        *seed,
                    )
                })
                .collect();

            let mut next_frontier = Vec::new();
            for ((node, partition, _), assignment) in izip!(jobs, assignments) {
                let mut parts = vec![Vec::new(); args.arity];
                for (label, a) in partition.iter().zip(assignment) {
                    parts[a as usize].push(*label);
                }

                // A degenerate clustering that leaves everything in one part
                // would never terminate; fall back to a contiguous split.
                if parts.iter().filter(|p| !p.is_empty()).count() == 1 {
                    let chunk = (partition.len() + args.arity - 1) / args.arity;
                    parts = partition.chunks(chunk).map(|c| c.to_vec()).collect_vec();
                }

                for part in parts {
                    match part.len() {
                        0 => {}
                        1 => {
                            tree.add_node(Some(node), Some(part[0]));
                        }
                        len if len <= args.max_leaves => {
                            let child = tree.add_node(Some(node), None);
                            for label in part {
                                tree.add_node(Some(child), Some(label));
                            }
                        }
                        _ => {
                            let child = tree.add_node(Some(node), None);
                            next_frontier.push((child, part));
                        }
                    }
                }
            }
            frontier = next_frontier;
        }

        tree
    }

    /// Loads a tree from its text edge-list form and validates it.
    pub fn load_structure(path: &Path) -> Result<Tree> {
        info!("Loading tree structure from {}", path.display());
        let mut lines = BufReader::new(File::open(path)?).lines();

        let header = lines
            .next()
            .ok_or_else(|| Error::TreeStructure("missing header line".to_string()))??;
        let mut header_iter = header.split_whitespace();
        let k: usize = header_iter
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::TreeStructure("bad header".to_string()))?;
        let t: usize = header_iter
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::TreeStructure("bad header".to_string()))?;
        if k > t {
            return Err(Error::TreeStructure(format!(
                "more labels ({}) than nodes ({})",
                k, t
            )));
        }

        let mut tree = Tree::empty();
        for _ in 0..t {
            tree.add_node(None, None);
        }

        let mut root = None;
        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields = line.split_whitespace().collect_vec();
            if fields.len() < 2 || fields.len() > 3 {
                return Err(Error::TreeStructure(format!("bad edge line '{}'", line)));
            }
            let parent: i64 = fields[0]
                .parse()
                .map_err(|_| Error::TreeStructure(format!("bad parent in '{}'", line)))?;
            let child: usize = fields[1]
                .parse()
                .map_err(|_| Error::TreeStructure(format!("bad child in '{}'", line)))?;
            if child >= t {
                return Err(Error::TreeStructure(format!(
                    "node index {} out of range {}",
                    child, t
                )));
            }

            if parent < 0 {
                root = Some(child);
            } else {
                let parent = parent as usize;
                if parent >= t {
                    return Err(Error::TreeStructure(format!(
                        "parent index {} out of range {}",
                        parent, t
                    )));
                }
                tree.nodes[parent].children.push(child);
                tree.nodes[child].parent = Some(parent);
            }

            if let Some(label_str) = fields.get(2) {
                let label: Index = label_str
                    .parse()
                    .map_err(|_| Error::TreeStructure(format!("bad label in '{}'", line)))?;
                if label as usize >= k {
                    return Err(Error::TreeStructure(format!(
                        "label {} out of range {}",
                        label, k
                    )));
                }
                if tree.leaves.insert(label, child).is_some() {
                    return Err(Error::TreeStructure(format!("duplicate label {}", label)));
                }
                tree.nodes[child].label = Some(label);
            }
        }

        tree.root =
            root.ok_or_else(|| Error::TreeStructure("no root edge (parent -1)".to_string()))?;
        if tree.leaves.len() != k {
            return Err(Error::TreeStructure(format!(
                "expected {} leaves, found {}",
                k,
                tree.leaves.len()
            )));
        }
        // Externally authored trees may contain unary chains
        tree.validate(false)?;
        info!("Loaded tree: {} nodes, {} leaves", t, k);
        Ok(tree)
    }

    /// Writes the textual edge list: header `k t`, then one
    /// `parent child [label]` line per node, with `-1` marking the root.
    pub fn save_structure(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{} {}", self.n_leaves(), self.n_nodes())?;
        for node in &self.nodes {
            match (node.parent, node.label) {
                (Some(parent), Some(label)) => writeln!(out, "{} {} {}", parent, node.index, label)?,
                (Some(parent), None) => writeln!(out, "{} {}", parent, node.index)?,
                (None, Some(label)) => writeln!(out, "-1 {} {}", node.index, label)?,
                (None, None) => writeln!(out, "-1 {}", node.index)?,
            }
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::util::save_bincode(self, path)
    }

    pub fn load(path: &Path) -> Result<Tree> {
        let tree: Tree = crate::util::load_bincode(path)?;
        tree.validate(false)?;
        Ok(tree)
    }

    /// Checks the structural invariants; `require_multiway` additionally
    /// rejects internal nodes with fewer than two children.
    pub fn validate(&self, require_multiway: bool) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::TreeStructure("empty tree".to_string()));
        }

        if self.nodes[self.root].parent.is_some() {
            return Err(Error::TreeStructure("root has a parent".to_string()));
        }
        for node in &self.nodes {
            if node.parent.is_none() && node.index != self.root {
                return Err(Error::TreeStructure(format!(
                    "node {} has no parent and is not the root",
                    node.index
                )));
            }
            match node.label {
                Some(_) if !node.children.is_empty() => {
                    return Err(Error::TreeStructure(format!(
                        "leaf {} has children",
                        node.index
                    )));
                }
                None if node.children.is_empty() => {
                    return Err(Error::TreeStructure(format!(
                        "internal node {} has no children",
                        node.index
                    )));
                }
                None if require_multiway && node.children.len() < 2 => {
                    return Err(Error::TreeStructure(format!(
                        "internal node {} has a single child",
                        node.index
                    )));
                }
                _ => {}
            }
        }

        // Leaf labels must cover 0..k exactly
        let k = self.leaves.len();
        for label in 0..k as Index {
            match self.leaves.get(&label) {
                Some(&node) if self.nodes[node].label == Some(label) => {}
                _ => {
                    return Err(Error::TreeStructure(format!(
                        "label {} has no leaf",
                        label
                    )));
                }
            }
        }

        // Connectivity (and so acyclicity): everything reachable from root
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        let mut reached = 0;
        while let Some(node) = stack.pop() {
            if std::mem::replace(&mut visited[node], true) {
                return Err(Error::TreeStructure(format!(
                    "node {} reached twice; tree contains a cycle",
                    node
                )));
            }
            reached += 1;
            stack.extend(self.nodes[node].children.iter().copied());
        }
        if reached != self.nodes.len() {
            return Err(Error::TreeStructure(format!(
                "{} of {} nodes unreachable from root",
                self.nodes.len() - reached,
                self.nodes.len()
            )));
        }

        Ok(())
    }

    /// Installs per-label thresholds at the leaves and propagates
    /// `min(children)` upward so internal pruning stays admissible.
    pub fn set_thresholds(&mut self, thresholds: &[f32]) -> Result<()> {
        if thresholds.len() != self.n_leaves() {
            return Err(Error::Config(format!(
                "expected {} thresholds, got {}",
                self.n_leaves(),
                thresholds.len()
            )));
        }
        for (label, &threshold) in thresholds.iter().enumerate() {
            let leaf = self.leaves[&(label as Index)];
            self.nodes[leaf].threshold = threshold;
        }
        for node in self.post_order() {
            if self.nodes[node].children.is_empty() {
                continue;
            }
            let min_child = self.nodes[node]
                .children
                .iter()
                .map(|&c| self.nodes[c].threshold)
                .fold(f32::INFINITY, f32::min);
            self.nodes[node].threshold = min_child;
        }
        Ok(())
    }

    /// Updates one leaf's threshold and repairs the `min(children)` values
    /// along its path to the root.
    pub fn update_leaf_threshold(&mut self, label: Index, threshold: f32) {
        let leaf = self.leaves[&label];
        self.nodes[leaf].threshold = threshold;
        let mut current = self.nodes[leaf].parent;
        while let Some(node) = current {
            let new_threshold = self.nodes[node]
                .children
                .iter()
                .map(|&c| self.nodes[c].threshold)
                .fold(f32::INFINITY, f32::min);
            if (new_threshold - self.nodes[node].threshold).abs() == 0. {
                break;
            }
            self.nodes[node].threshold = new_threshold;
            current = self.nodes[node].parent;
        }
    }

    fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.nodes[node].children.iter().copied());
        }
        order.reverse();
        order
    }
}

/// Counts how many examples carry each label.
pub(crate) fn label_frequencies(labels: &LabelMat) -> Vec<u64> {
    let mut frequencies = vec![0u64; labels.cols()];
    for row in labels.iter() {
        for &label in row {
            frequencies[label as usize] += 1;
        }
    }
    frequencies
}

/// Number of lock stripes for label-feature aggregation; first prime past 1024.
const AGGREGATION_STRIPES: usize = 1031;

/// Builds the (label x feature) centroid matrix that seeds k-means tree
/// construction.
///
/// Rows of `features` are sharded across the rayon pool; per-label sums are
/// synchronized through a fixed bank of mutexes keyed by `label % 1031`. The
/// bias slot (index 1) is skipped. With `weighted_features`, each example's
/// contribution is divided by its label count. Rows come out l2-normalized
/// when `norm` is set, and divided by the label's example count otherwise.
pub(crate) fn compute_label_feature_matrix(
    labels: &LabelMat,
    features: &FeatureMat,
    norm: bool,
    weighted_features: bool,
) -> FeatureMat {
    assert_eq!(labels.rows(), features.rows());
    info!("Computing label-feature matrix for {} labels", labels.cols());
    let start_t = time::precise_time_s();

    let k = labels.cols();
    let stripes: Vec<Mutex<HashMap<Index, HashMap<Index, f32>>>> = (0..AGGREGATION_STRIPES)
        .map(|_| Mutex::new(HashMap::new()))
        .collect();

    (0..features.rows()).into_par_iter().for_each(|r| {
        let row_labels = labels.row(r);
        let row_features = features.row(r);
        for &label in row_labels {
            let mut stripe = stripes[label as usize % AGGREGATION_STRIPES]
                .lock()
                .expect("aggregation stripe poisoned");
            let feature_sums = stripe.entry(label).or_default();
            for &(index, value) in row_features {
                if index == 1 {
                    continue; // bias slot
                }
                let value = if weighted_features {
                    value / row_labels.len() as f32
                } else {
                    value
                };
                *feature_sums.entry(index).or_default() += value;
            }
        }
    });

    let frequencies = if norm {
        Vec::new()
    } else {
        label_frequencies(labels)
    };

    let mut per_label: Vec<IndexValueVec> = vec![Vec::new(); k];
    for stripe in stripes {
        for (label, sums) in stripe.into_inner().expect("aggregation stripe poisoned") {
            let mut row = sums.into_iter().collect_vec();
            row.sort_unstable_by_key(|&(i, _)| i);
            per_label[label as usize] = row;
        }
    }

    let mut label_features = FeatureMat::new();
    for (label, mut row) in per_label.into_iter().enumerate() {
        if norm {
            l2_normalize(&mut row);
        } else if frequencies[label] > 0 {
            for entry in &mut row {
                entry.1 /= frequencies[label] as f32;
            }
        }
        label_features.append_row(row);
    }

    info!(
        "Computed label-feature matrix; it took {:.2}s",
        time::precise_time_s() - start_t
    );
    label_features
}
