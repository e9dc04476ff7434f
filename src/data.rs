use crate::args::Args;
use crate::mat::l2_normalize;
use crate::{Error, FeatureMat, Index, IndexValueVec, LabelMat, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

/// Parsed dataset: one labels row and one features row per example.
pub struct DataSet {
    pub labels: LabelMat,
    pub features: FeatureMat,
}

impl DataSet {
    pub fn n_examples(&self) -> usize {
        self.features.rows()
    }

    pub fn n_labels(&self) -> usize {
        self.labels.cols()
    }

    /// Writes the dataset back out in libsvm format with a header line.
    ///
    /// Internal feature indices are shifted back to the 1-based input space;
    /// the bias slot is skipped. Only lossless for data read without
    /// normalization or hashing.
    pub fn save_libsvm<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(
            writer,
            "{} {} {}",
            self.n_examples(),
            self.features.cols().saturating_sub(2),
            self.n_labels()
        )?;
        for i in 0..self.n_examples() {
            let labels = self
                .labels
                .row(i)
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join(",");
            write!(writer, "{}", labels)?;
            for &(index, value) in self.features.row(i) {
                if index <= 1 {
                    continue; // bias slot
                }
                write!(writer, " {}:{}", index - 1, value)?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}

/// Reads libsvm-format data and applies the feature-side transforms.
///
/// The transform settings are captured at training time and written to
/// `data_reader.bin` so that test/predict runs shape their inputs the same
/// way the training data was shaped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataReader {
    header: bool,
    bias: bool,
    bias_value: f32,
    norm: bool,
    hash: usize,
    features_threshold: f32,
}

impl DataReader {
    pub fn from_args(args: &Args) -> Self {
        Self {
            header: args.header,
            bias: args.bias,
            bias_value: args.bias_value,
            norm: args.norm,
            hash: args.hash,
            features_threshold: args.features_threshold,
        }
    }

    /// Loads a dataset from a file path, or from stdin when the path is `-`.
    pub fn read_data(&self, path: &str) -> Result<DataSet> {
        info!("Loading data from {}", path);
        let start_t = time::precise_time_s();

        let dataset = if path == "-" {
            let stdin = std::io::stdin();
            let locked = stdin.lock();
            self.read_from(locked)?
        } else {
            self.read_from(BufReader::new(File::open(path)?))?
        };

        info!(
            "Loaded {} examples; it took {:.2}s",
            dataset.n_examples(),
            time::precise_time_s() - start_t
        );
        Ok(dataset)
    }

    pub fn read_from<R: BufRead>(&self, reader: R) -> Result<DataSet> {
        let mut lines = reader.lines();

        let declared = if self.header {
            let header_line = lines
                .next()
                .ok_or_else(|| Error::Data("missing header line".to_string()))??;
            Some(Self::parse_header(&header_line)?)
        } else {
            None
        };

        let mut pb = declared.map(|(rows, _, _)| crate::util::create_progress_bar(rows as u64));
        let mut labels = LabelMat::new();
        let mut features = FeatureMat::new();

        for (line_no, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (row_labels, row_features) = self
                .parse_example(&line)
                .map_err(|e| Error::Data(format!("line {}: {}", line_no + 2, e)))?;

            if let Some((_, n_features, n_labels)) = declared {
                if let Some(&label) = row_labels.last() {
                    if label as usize >= n_labels {
                        return Err(Error::Data(format!(
                            "line {}: label {} outside declared range {}",
                            line_no + 2,
                            label,
                            n_labels
                        )));
                    }
                }
                // Internal indices are input + 1; highest legal is n_features + 1.
                if let Some(&(index, _)) = row_features.last() {
                    if self.hash == 0 && index as usize > n_features + 1 {
                        return Err(Error::Data(format!(
                            "line {}: feature {} outside declared range {}",
                            line_no + 2,
                            index - 1,
                            n_features
                        )));
                    }
                }
            }

            labels.append_row(row_labels);
            features.append_row(row_features);
            if let Some(pb) = pb.as_mut() {
                pb.inc();
            }
        }

        if let Some(pb) = pb.as_mut() {
            pb.finish();
        }

        if let Some((rows, _, _)) = declared {
            if rows != features.rows() {
                return Err(Error::Data(format!(
                    "expected {} examples, read {}",
                    rows,
                    features.rows()
                )));
            }
        }

        Ok(DataSet { labels, features })
    }

    /// Parses the `rows features labels` header line.
    fn parse_header(line: &str) -> Result<(usize, usize, usize)> {
        let mut token_iter = line.split_whitespace();
        let mut next_count = |what: &str| {
            token_iter
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| Error::Data(format!("bad header: missing {}", what)))
        };
        let rows = next_count("row count")?;
        let features = next_count("feature count")?;
        let labels = next_count("label count")?;
        Ok((rows, features, labels))
    }

    /// Parses one example line: `l1,l2,... ft:val ft:val ...`, then applies
    /// the reader-side transforms to the feature vector.
    pub fn parse_example(&self, line: &str) -> Result<(Vec<Index>, IndexValueVec)> {
        let mut token_iter = line.trim_start().split(' ');

        let mut labels = Vec::new();
        let labels_str = token_iter
            .next()
            .ok_or_else(|| Error::Data("empty line".to_string()))?;
        for label_str in labels_str.split(',') {
            if !label_str.is_empty() {
                labels.push(
                    label_str
                        .parse::<Index>()
                        .map_err(|_| Error::Data(format!("bad label '{}'", label_str)))?,
                );
            }
        }
        labels.sort_unstable();
        labels.dedup();

        let mut features = Vec::new();
        for pair_str in token_iter {
            if pair_str.is_empty() {
                continue;
            }
            let mut pair_iter = pair_str.split(':');
            let index = pair_iter
                .next()
                .and_then(|s| s.parse::<Index>().ok())
                .ok_or_else(|| Error::Data(format!("bad feature '{}'", pair_str)))?;
            let value = match pair_iter.next() {
                Some(s) => s
                    .parse::<f32>()
                    .map_err(|_| Error::Data(format!("bad feature value '{}'", pair_str)))?,
                None => 1.0,
            };
            if pair_iter.next().is_some() {
                return Err(Error::Data(format!("bad feature '{}'", pair_str)));
            }
            // Slot 0 is unused and slot 1 is the bias, so inputs shift up by one.
            features.push((index + 1, value));
        }

        Ok((labels, self.transform_features(features)))
    }

    fn transform_features(&self, mut features: IndexValueVec) -> IndexValueVec {
        if self.features_threshold > 0. {
            features.retain(|&(_, v)| v.abs() > self.features_threshold);
        }

        if self.hash > 0 {
            for entry in &mut features {
                entry.0 = 2 + fnv1a(entry.0 - 1) % self.hash as Index;
            }
        }

        features.sort_unstable_by_key(|&(i, _)| i);
        // Hash collisions fold into a single slot.
        features.dedup_by(|curr, prev| {
            if curr.0 == prev.0 {
                prev.1 += curr.1;
                true
            } else {
                false
            }
        });

        if self.norm {
            l2_normalize(&mut features);
        }

        if self.bias {
            features.insert(0, (1, self.bias_value));
        }

        features.shrink_to_fit();
        features
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::util::save_bincode(self, path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        crate::util::load_bincode(path)
    }
}

/// Fowler-Noll-Vo hash of a feature index, for the hashing trick.
fn fnv1a(index: Index) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for byte in index.to_le_bytes().iter() {
        h ^= u32::from(*byte);
        h = h.wrapping_mul(16_777_619);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_reader() -> DataReader {
        DataReader {
            header: true,
            bias: false,
            bias_value: 1.0,
            norm: false,
            hash: 0,
            features_threshold: 0.0,
        }
    }

    #[test]
    fn test_parse_example() {
        let reader = plain_reader();
        let (labels, features) = reader.parse_example("11,12 21:1 23:2 24:3").unwrap();
        assert_eq!(vec![11, 12], labels);
        assert_eq!(vec![(22, 1.), (24, 2.), (25, 3.)], features);
    }

    #[test]
    fn test_parse_example_no_labels_and_default_value() {
        let reader = plain_reader();
        let (labels, features) = reader.parse_example(" 3 7:2.5").unwrap();
        assert!(labels.is_empty());
        assert_eq!(vec![(4, 1.), (8, 2.5)], features);
    }

    #[test]
    fn test_parse_example_rejects_garbage() {
        let reader = plain_reader();
        assert!(reader.parse_example("1 x:1").is_err());
        assert!(reader.parse_example("1 2:a").is_err());
        assert!(reader.parse_example("1 2:3:4").is_err());
    }

    #[test]
    fn test_bias_and_norm() {
        let mut reader = plain_reader();
        reader.bias = true;
        reader.norm = true;
        let (_, features) = reader.parse_example("0 1:3 2:4").unwrap();
        assert_eq!(vec![(1, 1.), (2, 0.6), (3, 0.8)], features);
    }

    #[test]
    fn test_features_threshold() {
        let mut reader = plain_reader();
        reader.features_threshold = 0.5;
        let (_, features) = reader.parse_example("0 1:0.2 2:0.7 3:0.4 4:2").unwrap();
        assert_eq!(vec![(3, 0.7), (5, 2.)], features);
    }

    #[test]
    fn test_hashing_buckets_features() {
        let mut reader = plain_reader();
        reader.hash = 8;
        let (_, features) = reader.parse_example("0 1:1 100:1 100000:1").unwrap();
        assert!(!features.is_empty() && features.len() <= 3);
        for &(index, _) in &features {
            assert!((2..10).contains(&index));
        }
    }

    #[test]
    fn test_read_from_header_mismatch() {
        let reader = plain_reader();
        let result = reader.read_from("3 5 4\n1 1:1\n2 2:1\n".as_bytes());
        assert!(result.is_err());
    }

    #[test]
    fn test_read_from_rejects_out_of_range() {
        let reader = plain_reader();
        assert!(reader
            .read_from("1 5 4\n9 1:1\n".as_bytes())
            .is_err());
        assert!(reader
            .read_from("1 5 4\n1 6:1\n".as_bytes())
            .is_err());
    }

    #[test]
    fn test_libsvm_round_trip() {
        let reader = plain_reader();
        let text = "2 4 3\n0,2 1:1 3:0.5\n1 2:2 4:4\n";
        let dataset = reader.read_from(text.as_bytes()).unwrap();

        let mut serialized = Vec::new();
        dataset.save_libsvm(&mut serialized).unwrap();
        let reparsed = reader.read_from(&serialized[..]).unwrap();

        assert_eq!(dataset.labels, reparsed.labels);
        assert_eq!(dataset.features, reparsed.features);
    }
}
