use crate::{DenseVec, FeatureMat, Index};
use itertools::Itertools;
use order_stat::kth_by;
use rand::prelude::*;

/// Clusters the given label rows into `arity` subsets by cosine k-means.
///
/// `features` rows are assumed to be l2-normalized; `points` are row indices
/// into it. Returns one centroid assignment per position in `points`. With
/// `balanced` set, cluster sizes differ by at most one.
pub(crate) fn balanced_kmeans(
    points: &[Index],
    features: &FeatureMat,
    arity: usize,
    eps: f32,
    balanced: bool,
    seed: u64,
) -> Vec<u32> {
    let n_points = points.len();
    assert!(arity >= 2);
    assert!(n_points >= arity);

    let mut rng = StdRng::seed_from_u64(seed);

    // Seed centroids from distinct sampled rows
    let n_features = features.cols();
    let mut centroids = vec![DenseVec::zeros(n_features); arity];
    for (centroid, choice) in centroids
        .iter_mut()
        .zip(rand::seq::index::sample(&mut rng, n_points, arity).into_iter())
    {
        for &(i, v) in features.row(points[choice] as usize) {
            centroid[i as usize] = v;
        }
    }

    let mut assignments = vec![0u32; n_points];
    let mut similarities = vec![vec![0f32; arity]; n_points];
    let mut prev_avg_similarity = -2f32;

    loop {
        for (point, sims) in points.iter().zip(similarities.iter_mut()) {
            for (j, centroid) in centroids.iter().enumerate() {
                sims[j] = crate::mat::dot_dense(
                    features.row(*point as usize),
                    centroid.as_slice().expect("contiguous"),
                );
            }
        }

        let avg_similarity = if arity == 2 {
            assign_2means(&similarities, balanced, &mut assignments)
        } else {
            assign_kmeans(&similarities, arity, balanced, &mut assignments)
        } / n_points as f32;

        // Stop iteration if converged
        if avg_similarity - prev_avg_similarity < eps {
            break;
        }
        prev_avg_similarity = avg_similarity;

        // Recompute each centroid as the normalized sum of its members
        for centroid in &mut centroids {
            centroid.fill(0.);
        }
        for (point, &a) in points.iter().zip(assignments.iter()) {
            let centroid = &mut centroids[a as usize];
            for &(i, v) in features.row(*point as usize) {
                centroid[i as usize] += v;
            }
        }
        for centroid in &mut centroids {
            let norm = centroid.dot(centroid).sqrt();
            if norm > 0. {
                *centroid /= norm;
            }
        }
    }

    assignments
}

/// 2-means assignment: order by the signed similarity margin and, when
/// balanced, split at the median. Returns the summed similarity.
fn assign_2means(similarities: &[Vec<f32>], balanced: bool, assignments: &mut [u32]) -> f32 {
    let n_points = similarities.len();
    let mut index_margin_pairs = similarities
        .iter()
        .map(|sims| sims[0] - sims[1])
        .enumerate()
        .collect_vec();

    if balanced {
        // Reorder by margin; the two halves get different partitions
        let mid_rank = n_points - n_points / 2 - 1;
        kth_by(&mut index_margin_pairs, mid_rank, |(_, lm), (_, rm)| {
            rm.partial_cmp(lm)
                .unwrap_or_else(|| panic!("numeric error comparing {} and {}", lm, rm))
        });
        for (rank, &(i, _)) in index_margin_pairs.iter().enumerate() {
            assignments[i] = (rank > mid_rank) as u32;
        }
    } else {
        for &(i, margin) in &index_margin_pairs {
            assignments[i] = (margin <= 0.) as u32;
        }
    }

    similarities
        .iter()
        .zip(assignments.iter())
        .map(|(sims, &a)| sims[a as usize])
        .sum()
}

/// General-arity assignment: points ordered by decreasing margin between
/// their best and second-best centroid grab the best centroid that still has
/// capacity. Returns the summed similarity.
fn assign_kmeans(
    similarities: &[Vec<f32>],
    arity: usize,
    balanced: bool,
    assignments: &mut [u32],
) -> f32 {
    let n_points = similarities.len();
    let (max_size, mut with_one_more) = if balanced {
        (n_points / arity, n_points % arity)
    } else {
        (n_points, 0)
    };

    // Per point: centroid preference order and the assignment margin
    let mut order = (0..n_points)
        .map(|i| {
            let mut prefs = (0..arity).collect_vec();
            prefs.sort_unstable_by(|&a, &b| {
                similarities[i][b]
                    .partial_cmp(&similarities[i][a])
                    .unwrap_or_else(|| panic!("numeric error in similarity comparison"))
                    .then(a.cmp(&b))
            });
            let margin = similarities[i][prefs[0]] - similarities[i][prefs[1]];
            (i, prefs, margin)
        })
        .collect_vec();
    order.sort_unstable_by(|(li, _, lm), (ri, _, rm)| {
        rm.partial_cmp(lm)
            .unwrap_or_else(|| panic!("numeric error in margin comparison"))
            .then(li.cmp(ri))
    });

    let mut sizes = vec![0usize; arity];
    let mut total_similarity = 0.;
    for (i, prefs, _) in &order {
        for &j in prefs {
            let fits = sizes[j] < max_size || (sizes[j] < max_size + 1 && with_one_more > 0);
            if fits {
                if sizes[j] == max_size {
                    with_one_more -= 1;
                }
                sizes[j] += 1;
                assignments[*i] = j as u32;
                total_similarity += similarities[*i][j];
                break;
            }
        }
    }

    total_similarity
}
