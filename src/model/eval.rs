use crate::{Error, Index, IndexSet, IndexValueVec, LabelMat, Result};

#[derive(Clone, Debug, PartialEq)]
enum MeasureKind {
    PrecisionAt(usize),
    RecallAt(usize),
    CoverageAt(usize),
    F1,
    Accuracy,
    PredictionSize,
}

/// Streaming accumulator for one evaluation measure.
///
/// Feed batches with [`Measure::accumulate`]; [`Measure::value`] reports the
/// running mean (or, for coverage, the covered fraction of the label space).
pub struct Measure {
    kind: MeasureKind,
    name: String,
    sum: f64,
    count: usize,
    covered: IndexSet,
    n_labels: usize,
}

impl Measure {
    fn new(kind: MeasureKind, name: String, n_labels: usize) -> Self {
        Self {
            kind,
            name,
            sum: 0.,
            count: 0,
            covered: IndexSet::new(),
            n_labels,
        }
    }

    /// Parses a comma-separated measure list such as `p@1,r@3,c@5,f1,acc,s`.
    pub fn parse_list(measures: &str, n_labels: usize) -> Result<Vec<Measure>> {
        measures
            .split(',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                let kind = match token {
                    "f1" => MeasureKind::F1,
                    "acc" => MeasureKind::Accuracy,
                    "s" => MeasureKind::PredictionSize,
                    _ => {
                        let (prefix, k) = token
                            .split_once('@')
                            .ok_or_else(|| Error::Config(format!("unknown measure '{}'", token)))?;
                        let k: usize = k.parse().map_err(|_| {
                            Error::Config(format!("bad cutoff in measure '{}'", token))
                        })?;
                        if k == 0 {
                            return Err(Error::Config(format!(
                                "cutoff must be positive in measure '{}'",
                                token
                            )));
                        }
                        match prefix {
                            "p" => MeasureKind::PrecisionAt(k),
                            "r" => MeasureKind::RecallAt(k),
                            "c" => MeasureKind::CoverageAt(k),
                            _ => {
                                return Err(Error::Config(format!(
                                    "unknown measure '{}'",
                                    token
                                )))
                            }
                        }
                    }
                };
                Ok(Measure::new(kind, token.to_string(), n_labels))
            })
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accumulates one example; `truth` is sorted ascending.
    pub fn accumulate(&mut self, truth: &[Index], prediction: &IndexValueVec) {
        let hits_at = |k: usize| {
            prediction
                .iter()
                .take(k)
                .filter(|(label, _)| truth.binary_search(label).is_ok())
                .count()
        };

        match self.kind {
            MeasureKind::PrecisionAt(k) => {
                self.sum += hits_at(k) as f64 / k as f64;
                self.count += 1;
            }
            MeasureKind::RecallAt(k) => {
                if !truth.is_empty() {
                    self.sum += hits_at(k) as f64 / truth.len() as f64;
                    self.count += 1;
                }
            }
            MeasureKind::CoverageAt(k) => {
                for (label, _) in prediction.iter().take(k) {
                    if truth.binary_search(label).is_ok() {
                        self.covered.insert(*label);
                    }
                }
            }
            MeasureKind::F1 => {
                if !truth.is_empty() || !prediction.is_empty() {
                    let hits = hits_at(prediction.len());
                    self.sum += 2. * hits as f64 / (truth.len() + prediction.len()) as f64;
                    self.count += 1;
                }
            }
            MeasureKind::Accuracy => {
                self.sum += prediction
                    .first()
                    .map_or(0., |(label, _)| truth.binary_search(label).is_ok() as u64 as f64);
                self.count += 1;
            }
            MeasureKind::PredictionSize => {
                self.sum += prediction.len() as f64;
                self.count += 1;
            }
        }
    }

    pub fn accumulate_batch(&mut self, labels: &LabelMat, predictions: &[IndexValueVec]) {
        assert_eq!(labels.rows(), predictions.len());
        for (r, prediction) in predictions.iter().enumerate() {
            self.accumulate(labels.row(r), prediction);
        }
    }

    pub fn value(&self) -> f64 {
        match self.kind {
            MeasureKind::CoverageAt(_) => {
                if self.n_labels > 0 {
                    self.covered.len() as f64 / self.n_labels as f64
                } else {
                    0.
                }
            }
            _ => {
                if self.count > 0 {
                    self.sum / self.count as f64
                } else {
                    0.
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_batch() -> (LabelMat, Vec<IndexValueVec>) {
        let mut labels = LabelMat::new();
        labels.append_row(vec![0, 2]);
        labels.append_row(vec![1]);
        let predictions = vec![
            vec![(0, 0.9), (1, 0.8), (2, 0.7)],
            vec![(3, 0.9), (1, 0.8), (0, 0.7)],
        ];
        (labels, predictions)
    }

    #[test]
    fn test_parse_list() {
        let measures = Measure::parse_list("p@1,r@3,c@5,f1,acc,s", 10).unwrap();
        assert_eq!(
            vec!["p@1", "r@3", "c@5", "f1", "acc", "s"],
            measures.iter().map(|m| m.name()).collect::<Vec<_>>()
        );

        assert!(Measure::parse_list("p@0", 10).is_err());
        assert!(Measure::parse_list("q@1", 10).is_err());
        assert!(Measure::parse_list("bogus", 10).is_err());
    }

    #[test]
    fn test_precision_at_k() {
        let (labels, predictions) = example_batch();
        let mut p1 = Measure::parse_list("p@1", 4).unwrap().pop().unwrap();
        p1.accumulate_batch(&labels, &predictions);
        assert!((p1.value() - 0.5).abs() < 1e-9); // hits: [yes, no]

        let mut p3 = Measure::parse_list("p@3", 4).unwrap().pop().unwrap();
        p3.accumulate_batch(&labels, &predictions);
        assert!((p3.value() - (2. / 3. + 1. / 3.) / 2.).abs() < 1e-9);
    }

    #[test]
    fn test_recall_skips_empty_truth() {
        let mut labels = LabelMat::new();
        labels.append_row(vec![0, 2]);
        labels.append_row(vec![]);
        let predictions = vec![vec![(0, 0.9), (2, 0.8)], vec![(1, 0.9)]];

        let mut r2 = Measure::parse_list("r@2", 4).unwrap().pop().unwrap();
        r2.accumulate_batch(&labels, &predictions);
        assert!((r2.value() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_coverage_counts_label_space() {
        let (labels, predictions) = example_batch();
        let mut c3 = Measure::parse_list("c@3", 4).unwrap().pop().unwrap();
        c3.accumulate_batch(&labels, &predictions);
        // Covered: labels 0, 2 (row 0) and 1 (row 1) out of 4
        assert!((c3.value() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_accuracy_and_size() {
        let (labels, predictions) = example_batch();
        let mut acc = Measure::parse_list("acc", 4).unwrap().pop().unwrap();
        acc.accumulate_batch(&labels, &predictions);
        assert!((acc.value() - 0.5).abs() < 1e-9);

        let mut s = Measure::parse_list("s", 4).unwrap().pop().unwrap();
        s.accumulate_batch(&labels, &predictions);
        assert!((s.value() - 3.).abs() < 1e-9);
    }

    #[test]
    fn test_f1() {
        let mut labels = LabelMat::new();
        labels.append_row(vec![0, 1]);
        let predictions = vec![vec![(0, 0.9), (2, 0.8)]];
        let mut f1 = Measure::parse_list("f1", 4).unwrap().pop().unwrap();
        f1.accumulate_batch(&labels, &predictions);
        assert!((f1.value() - 0.5).abs() < 1e-9); // 2*1/(2+2)
    }
}
