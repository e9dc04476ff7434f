use crate::mat::dense_add_assign_row_mul_scalar;
use crate::{DenseVec, Index};
use itertools::Itertools;
use rand::prelude::*;

fn dot_row_dense(row: &[(Index, f32)], dense: &DenseVec) -> f32 {
    let mut sum = 0.;
    for &(i, v) in row {
        sum += v * dense[i as usize];
    }
    sum
}

fn row_dot_self(row: &[(Index, f32)]) -> f32 {
    row.iter().map(|&(_, v)| v * v).sum()
}

/// A coordinate descent solver for L2-loss SVM dual problems.
///
/// This is pretty much a line-by-line port from liblinear (with some
/// simplification) to avoid unnecessary ffi-related overhead.
///
///  min_\alpha  0.5(\alpha^T (Q + D)\alpha) - e^T \alpha,
///    s.t.      0 <= \alpha_i <= upper_bound_i,
///
///  where Qij = yi yj xi^T xj and
///  D is a diagonal matrix
///
/// In the L2-SVM case:
/// 		upper_bound_i = INF
/// 		D_ii = 1/(2*C_i)
///
/// `c` holds the per-example cost, which is how instance weights enter the
/// problem. `eps` is the stopping tolerance.
///
/// See Algorithm 3 of Hsieh et al., ICML 2008.
#[allow(clippy::many_single_char_names)]
pub(crate) fn solve_l2r_l2_svc(
    x: &[&[(Index, f32)]],
    y: &[bool],
    c: &[f32],
    eps: f32,
    max_iter: u32,
    n_features: usize,
    rng: &mut StdRng,
) -> DenseVec {
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), c.len());

    let l = x.len();
    let mut w = DenseVec::zeros(n_features);

    let mut active_size = l;

    // PG: projected gradient, for shrinking and stopping
    let mut pg: f32;
    let mut pgmax_old = f32::INFINITY;
    let mut pgmax_new: f32;
    let mut pgmin_new: f32;

    let diag = c.iter().map(|&ci| 0.5 / ci).collect_vec();

    // Note that 0 <= alpha[i], with no finite upper bound in the L2 case
    let mut alpha = vec![0.; l];

    let mut index = (0..l).collect_vec();
    let qd = x
        .iter()
        .enumerate()
        .map(|(i, xi)| diag[i] + row_dot_self(xi))
        .collect_vec();

    let mut iter = 0;
    while iter < max_iter {
        pgmax_new = f32::NEG_INFINITY;
        pgmin_new = f32::INFINITY;

        index.shuffle(rng);

        let mut s = 0;
        while s < active_size {
            let i = index[s];
            let yi_sign = if y[i] { 1. } else { -1. };
            let xi = x[i];

            let g = yi_sign * dot_row_dense(xi, &w) - 1. + alpha[i] * diag[i];

            pg = 0.;
            if alpha[i] == 0. {
                if g > pgmax_old {
                    active_size -= 1;
                    index.swap(s, active_size);
                    continue;
                } else if g < 0. {
                    pg = g;
                }
            } else {
                pg = g;
            }

            pgmax_new = pgmax_new.max(pg);
            pgmin_new = pgmin_new.min(pg);

            if pg.abs() > 1e-12 {
                let alpha_old = alpha[i];
                alpha[i] = (alpha[i] - g / qd[i]).max(0.);
                let d = (alpha[i] - alpha_old) * yi_sign;
                dense_add_assign_row_mul_scalar(w.as_slice_mut().expect("contiguous"), xi, d);
            }

            s += 1;
        }

        iter += 1;

        if pgmax_new - pgmin_new <= eps {
            if active_size == l {
                break;
            } else {
                active_size = l;
                pgmax_old = f32::INFINITY;
                continue;
            }
        }
        pgmax_old = pgmax_new;
        if pgmax_old <= 0. {
            pgmax_old = f32::INFINITY;
        }
    }

    w
}

/// A coordinate descent solver for the dual of L2-regularized logistic
/// regression problems.
///
/// This is pretty much a line-by-line port from liblinear (with some
/// simplification) to avoid unnecessary ffi-related overhead.
///
///  min_\alpha  0.5(\alpha^T Q \alpha) + \sum \alpha_i log (\alpha_i) + (upper_bound_i - \alpha_i) log (upper_bound_i - \alpha_i),
///    s.t.      0 <= \alpha_i <= upper_bound_i,
///
///  where Qij = yi yj xi^T xj and
///  upper_bound_i = C_i (instance-weighted cost)
///
/// See Algorithm 5 of Yu et al., MLJ 2010.
#[allow(clippy::many_single_char_names)]
pub(crate) fn solve_l2r_lr_dual(
    x: &[&[(Index, f32)]],
    y: &[bool],
    c: &[f32],
    eps: f32,
    max_iter: u32,
    n_features: usize,
    rng: &mut StdRng,
) -> DenseVec {
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), c.len());

    let l = x.len();

    let max_inner_iter = 100; // for inner Newton
    let mut innereps = 1e-2f32;
    let innereps_min = eps.min(1e-8);

    // store alpha and C - alpha. Note that
    // 0 < alpha[i] < upper_bound[i]
    // alpha[2*i] + alpha[2*i+1] = upper_bound[i]
    let mut alpha = c
        .iter()
        .flat_map(|&ci| {
            let a = (0.001 * ci).min(1e-8);
            vec![a, ci - a]
        })
        .collect_vec();

    let xtx = x.iter().map(|xi| row_dot_self(xi)).collect_vec();

    let mut w = DenseVec::zeros(n_features);
    for (i, (&xi, &yi)) in x.iter().zip(y.iter()).enumerate() {
        let yi_sign = if yi { 1. } else { -1. };
        dense_add_assign_row_mul_scalar(
            w.as_slice_mut().expect("contiguous"),
            xi,
            yi_sign * alpha[2 * i],
        );
    }

    let mut index = (0..l).collect_vec();

    let mut iter = 0;
    while iter < max_iter {
        index.shuffle(rng);
        let mut newton_iter = 0;
        let mut gmax = 0f32;
        for &i in &index {
            let yi_sign = if y[i] { 1. } else { -1. };
            let ci = c[i];
            let xi = x[i];
            let a = xtx[i];
            let b = yi_sign * dot_row_dense(xi, &w);

            // Decide to minimize g_1(z) or g_2(z)
            let (ind1, ind2, sign) = if 0.5 * a * (alpha[2 * i + 1] - alpha[2 * i]) + b < 0. {
                (2 * i + 1, 2 * i, -1.)
            } else {
                (2 * i, 2 * i + 1, 1.)
            };

            //  g_t(z) = z*log(z) + (C-z)*log(C-z) + 0.5a(z-alpha_old)^2 + sign*b(z-alpha_old)
            let alpha_old = alpha[ind1];
            let mut z = if ci - alpha_old < 0.5 * ci {
                0.1 * alpha_old
            } else {
                alpha_old
            };
            let mut gp = a * (z - alpha_old) + sign * b + (z / (ci - z)).ln();
            gmax = gmax.max(gp.abs());

            // Newton method on the sub-problem
            let eta = 0.1; // xi in the paper
            let mut inner_iter = 0;
            while inner_iter <= max_inner_iter {
                if gp.abs() < innereps {
                    break;
                }
                let gpp = a + ci / (ci - z) / z;
                let tmpz = z - gp / gpp;
                if tmpz <= 0. {
                    z *= eta;
                } else {
                    // tmpz in (0, C)
                    z = tmpz;
                }
                gp = a * (z - alpha_old) + sign * b + (z / (ci - z)).ln();
                newton_iter += 1;
                inner_iter += 1;
            }

            if inner_iter > 0 {
                // update w
                alpha[ind1] = z;
                alpha[ind2] = ci - z;
                dense_add_assign_row_mul_scalar(
                    w.as_slice_mut().expect("contiguous"),
                    xi,
                    sign * (z - alpha_old) * yi_sign,
                );
            }
        }

        iter += 1;

        if gmax < eps {
            break;
        }

        if newton_iter <= l / 10 {
            innereps = innereps_min.max(0.1 * innereps);
        }
    }

    w
}
