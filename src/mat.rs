use crate::{Index, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// An entry of a sparse row; carries the column index it occupies.
pub trait RowEntry: Copy {
    fn index(&self) -> Index;
}

impl RowEntry for Index {
    #[inline]
    fn index(&self) -> Index {
        *self
    }
}

impl RowEntry for (Index, f32) {
    #[inline]
    fn index(&self) -> Index {
        self.0
    }
}

/// Row-major sparse matrix that owns its rows.
///
/// Within a row, entries are sorted by index strictly ascending; `cols` is one
/// past the maximum index observed so far and never decreases across appends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseRowMat<T> {
    rows: Vec<Vec<T>>,
    n_cols: usize,
    n_cells: usize,
}

impl<T: RowEntry> SparseRowMat<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            n_cols: 0,
            n_cells: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn cols(&self) -> usize {
        self.n_cols
    }

    pub fn cells(&self) -> usize {
        self.n_cells
    }

    pub fn row(&self, i: usize) -> &[T] {
        &self.rows[i]
    }

    pub fn row_size(&self, i: usize) -> usize {
        self.rows[i].len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[T]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Appends a row. The caller guarantees entries are sorted by index.
    pub fn append_row(&mut self, row: Vec<T>) {
        debug_assert!(is_sorted_by_index(&row));
        self.update_cols(&row);
        self.n_cells += row.len();
        self.rows.push(row);
    }

    /// Replaces row `i`, freeing the old one.
    pub fn replace_row(&mut self, i: usize, row: Vec<T>) {
        debug_assert!(is_sorted_by_index(&row));
        self.update_cols(&row);
        self.n_cells += row.len();
        self.n_cells -= self.rows[i].len();
        self.rows[i] = row;
    }

    /// Concatenates `data` onto row `i`. The caller guarantees the
    /// concatenation remains sorted by index.
    pub fn append_to_row(&mut self, i: usize, data: &[T]) {
        self.update_cols(data);
        self.n_cells += data.len();
        self.rows[i].extend_from_slice(data);
        debug_assert!(is_sorted_by_index(&self.rows[i]));
    }

    fn update_cols(&mut self, row: &[T]) {
        if let Some(last) = row.last() {
            let min_cols = last.index() as usize + 1;
            if self.n_cols < min_cols {
                self.n_cols = min_cols;
            }
        }
    }
}

impl<T: Serialize> SparseRowMat<T> {
    pub fn save<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }
}

impl<T: DeserializeOwned> SparseRowMat<T> {
    pub fn load<R: Read>(reader: R) -> Result<Self> {
        Ok(bincode::deserialize_from(reader)?)
    }
}

fn is_sorted_by_index<T: RowEntry>(row: &[T]) -> bool {
    row.windows(2).all(|w| w[0].index() < w[1].index())
}

/// Sparse dot product of a feature row against a dense vector.
///
/// Entries past the dense vector's length are ignored, which matches how
/// classifiers trained on a narrower feature space score wider queries.
pub fn dot_dense(row: &[(Index, f32)], dense: &[f32]) -> f32 {
    let mut sum = 0.;
    for &(i, v) in row {
        if let Some(d) = dense.get(i as usize) {
            sum += v * d;
        }
    }
    sum
}

/// Sparse dot product of two index-sorted rows.
pub fn dot_sparse(left: &[(Index, f32)], right: &[(Index, f32)]) -> f32 {
    let mut sum = 0.;
    let mut l = left.iter().peekable();
    let mut r = right.iter().peekable();
    while let (Some(&&(li, lv)), Some(&&(ri, rv))) = (l.peek(), r.peek()) {
        if li == ri {
            sum += lv * rv;
            l.next();
            r.next();
        } else if li < ri {
            l.next();
        } else {
            r.next();
        }
    }
    sum
}

/// Adds `scalar` times a sparse row onto a dense vector.
pub fn dense_add_assign_row_mul_scalar(dense: &mut [f32], row: &[(Index, f32)], scalar: f32) {
    for &(i, v) in row {
        dense[i as usize] += v * scalar;
    }
}

/// Rescales an index-value list to unit L2 length; zero vectors are left as-is.
pub fn l2_normalize(row: &mut [(Index, f32)]) {
    let mut length = 0f32;
    for &(_, v) in row.iter() {
        length += v * v;
    }
    if length > 0. {
        length = length.sqrt();
        for entry in row.iter_mut() {
            entry.1 /= length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_row_updates_shape() {
        let mut mat = SparseRowMat::<(Index, f32)>::new();
        mat.append_row(vec![(0, 1.), (3, 2.)]);
        mat.append_row(vec![(1, 1.)]);
        mat.append_row(vec![]);
        assert_eq!(3, mat.rows());
        assert_eq!(4, mat.cols());
        assert_eq!(3, mat.cells());
        assert_eq!(&[(0, 1.), (3, 2.)], mat.row(0));
        assert_eq!(0, mat.row_size(2));
    }

    #[test]
    fn test_cols_monotone_across_appends() {
        let mut mat = SparseRowMat::<Index>::new();
        mat.append_row(vec![5]);
        assert_eq!(6, mat.cols());
        mat.append_row(vec![1]);
        assert_eq!(6, mat.cols());
        mat.append_row(vec![2, 9]);
        assert_eq!(10, mat.cols());
    }

    #[test]
    fn test_replace_row_updates_cells() {
        let mut mat = SparseRowMat::<(Index, f32)>::new();
        mat.append_row(vec![(0, 1.), (1, 2.), (2, 3.)]);
        mat.append_row(vec![(1, 1.)]);
        mat.replace_row(0, vec![(4, 1.)]);
        assert_eq!(2, mat.cells());
        assert_eq!(5, mat.cols());
        assert_eq!(&[(4, 1.)], mat.row(0));
    }

    #[test]
    fn test_append_to_row() {
        let mut mat = SparseRowMat::<(Index, f32)>::new();
        mat.append_row(vec![(0, 1.)]);
        mat.append_to_row(0, &[(2, 2.), (3, 3.)]);
        assert_eq!(&[(0, 1.), (2, 2.), (3, 3.)], mat.row(0));
        assert_eq!(3, mat.cells());
        assert_eq!(4, mat.cols());
    }

    #[test]
    fn test_cells_equals_sum_of_row_sizes() {
        let mut mat = SparseRowMat::<Index>::new();
        mat.append_row(vec![0, 2]);
        mat.append_row(vec![1]);
        mat.replace_row(1, vec![0, 1, 2]);
        let total: usize = (0..mat.rows()).map(|i| mat.row_size(i)).sum();
        assert_eq!(total, mat.cells());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut mat = SparseRowMat::<(Index, f32)>::new();
        mat.append_row(vec![(1, 0.5), (7, 1.5)]);
        mat.append_row(vec![(0, 2.)]);

        let mut buf = Vec::<u8>::new();
        mat.save(&mut buf).unwrap();
        let loaded = SparseRowMat::<(Index, f32)>::load(&buf[..]).unwrap();
        assert_eq!(mat, loaded);
    }

    #[test]
    fn test_dot_sparse() {
        let x = vec![(1, 2.), (4, 5.), (6, 3.), (7, 10.)];
        let y = vec![(1, 3.), (5, 5.), (7, 3.), (8, 10.)];
        assert_eq!(2. * 3. + 10. * 3., dot_sparse(&x, &y));
        assert_eq!(0., dot_sparse(&x, &[]));
    }

    #[test]
    fn test_dot_dense_ignores_out_of_range() {
        let dense = vec![1., 2., 3.];
        assert_eq!(2. * 2. + 3. * 1., dot_dense(&[(1, 2.), (2, 1.), (9, 4.)], &dense));
    }

    #[test]
    fn test_l2_normalize() {
        let mut row = vec![(1, 1.), (5, 2.), (50, 4.), (100, 6.), (1000, 8.)];
        l2_normalize(&mut row);
        assert_eq!(
            vec![
                (1, 1. / 11.),
                (5, 2. / 11.),
                (50, 4. / 11.),
                (100, 6. / 11.),
                (1000, 8. / 11.),
            ],
            row
        );

        let mut zero = vec![(1, 0.), (2, 0.)];
        l2_normalize(&mut zero);
        assert_eq!(vec![(1, 0.), (2, 0.)], zero);
    }
}
