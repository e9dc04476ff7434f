use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level estimator.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum ModelType {
    Plt,
    Hsm,
}

/// Tree construction strategy.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum TreeType {
    HierarchicalKMeans,
    CompleteInOrder,
    CompleteRandom,
    BalancedInOrder,
    BalancedRandom,
    Huffman,
}

/// Base classifier optimizer family.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum OptimizerType {
    Liblinear,
    Sgd,
    Adagrad,
    Fobos,
}

/// Loss solved by the liblinear-style dual coordinate descent solvers.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum LossType {
    /// Log loss: min_w w^Tw/2 + C \sum log(1 + exp(-y_i w^Tx_i))
    Log,
    /// Squared hinge loss: min_w w^Tw/2 + C \sum max(0, 1 - y_i w^Tx_i)^2
    Hinge,
}

/// Variant of online F-measure optimization.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Serialize, Deserialize)]
pub enum OfoType {
    Micro,
    Macro,
    Mixed,
}

/// Runtime configuration shared by all commands.
///
/// Serialized to `args.bin` in the model directory at training time and
/// reloaded before test/predict so prediction always sees the settings the
/// model was trained with.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Args {
    // Input/output
    pub input: String,
    pub output: String,
    pub model: ModelType,
    pub header: bool,
    pub bias: bool,
    pub bias_value: f32,
    pub norm: bool,
    pub hash: usize,
    pub features_threshold: f32,

    // Base classifier
    pub optimizer: OptimizerType,
    pub loss: LossType,
    pub cost: f32,
    pub eps: f32,
    pub max_iter: u32,
    pub weights_threshold: f32,
    pub inbalance_labels_weighting: bool,
    pub pick_one_label_weighting: bool,

    // Online optimizers
    pub eta: f32,
    pub epochs: u32,
    pub l2_penalty: f32,
    pub fobos_penalty: f32,
    pub adagrad_eps: f32,

    // Tree
    pub tree_structure: String,
    pub tree_type: TreeType,
    pub arity: usize,
    pub max_leaves: usize,
    pub k_means_eps: f32,
    pub k_means_balanced: bool,
    pub k_means_weighted_features: bool,

    // Ensemble
    pub ensemble: usize,
    pub on_the_trot_prediction: bool,
    pub ens_missing_scores: bool,

    // Prediction
    pub top_k: usize,
    pub threshold: f32,
    pub thresholds: String,

    // Execution
    pub threads: i32,
    pub mem_limit: u64,
    pub seed: u64,

    // Measures for the test command
    pub measures: String,

    // OFO
    pub ofo_type: OfoType,
    pub ofo_top_labels: usize,
    pub ofo_a: f32,
    pub ofo_b: f32,

    // testPredictionTime
    pub batch_sizes: String,
    pub batches: u32,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            model: ModelType::Plt,
            header: true,
            bias: true,
            bias_value: 1.0,
            norm: true,
            hash: 0,
            features_threshold: 0.0,

            optimizer: OptimizerType::Liblinear,
            loss: LossType::Log,
            cost: 16.0,
            eps: 0.1,
            max_iter: 100,
            weights_threshold: 0.1,
            inbalance_labels_weighting: false,
            pick_one_label_weighting: false,

            eta: 1.0,
            epochs: 1,
            l2_penalty: 0.0,
            fobos_penalty: 0.00001,
            adagrad_eps: 0.001,

            tree_structure: String::new(),
            tree_type: TreeType::HierarchicalKMeans,
            arity: 2,
            max_leaves: 100,
            k_means_eps: 0.0001,
            k_means_balanced: true,
            k_means_weighted_features: false,

            ensemble: 1,
            on_the_trot_prediction: false,
            ens_missing_scores: true,

            top_k: 5,
            threshold: 0.0,
            thresholds: String::new(),

            threads: 0,
            mem_limit: 0,
            seed: 1993,

            measures: "p@1,r@1,c@1,p@3,r@3,c@3,p@5,r@5,c@5".to_string(),

            ofo_type: OfoType::Micro,
            ofo_top_labels: 1000,
            ofo_a: 10.0,
            ofo_b: 20.0,

            batch_sizes: "100,1000,10000".to_string(),
            batches: 10,
        }
    }
}

impl Args {
    pub fn validate(&self) -> Result<()> {
        if self.arity < 2 {
            return Err(Error::Config(format!(
                "arity must be at least 2, but is {}",
                self.arity
            )));
        }
        if self.max_leaves < 1 {
            return Err(Error::Config("maxLeaves must be positive".to_string()));
        }
        if self.ensemble < 1 {
            return Err(Error::Config(format!(
                "ensemble must be at least 1, but is {}",
                self.ensemble
            )));
        }
        if self.eps <= 0. {
            return Err(Error::Config(format!(
                "eps must be positive, but is {}",
                self.eps
            )));
        }
        if self.cost <= 0. {
            return Err(Error::Config(format!(
                "cost must be positive, but is {}",
                self.cost
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::Config("maxIter must be positive".to_string()));
        }
        if self.weights_threshold < 0. {
            return Err(Error::Config(format!(
                "weightsThreshold must be non-negative, but is {}",
                self.weights_threshold
            )));
        }
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of rayon workers to ask for; 0 lets rayon pick all cores.
    pub fn resolved_threads(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match self.threads {
            0 => cores,
            n if n < 0 => cores.saturating_sub(n.unsigned_abs() as usize).max(1),
            n => n as usize,
        }
    }

    /// Memory budget for training buckets; 0 falls back to system RAM.
    pub fn resolved_mem_limit(&self) -> u64 {
        if self.mem_limit > 0 {
            self.mem_limit
        } else {
            system_memory().unwrap_or(u64::MAX)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::util::save_bincode(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        crate::util::load_bincode(path)
    }
}

/// Total system RAM in bytes, read from /proc/meminfo.
fn system_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb = rest.trim().trim_end_matches(" kB").trim().parse::<u64>().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
