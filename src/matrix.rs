//! Square integer matrices: owned row-major storage, pseudo-random fill,
//! and the bordered console grid the coordinator prints.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Matrix element type. The whole pipeline works on fixed-width integers.
pub type Elem = i32;

/// Cell width of the printed grid.
const CELL_WIDTH: usize = 2;

/// An N×N matrix in one owned, contiguous, row-major buffer.
///
/// Row `i` occupies `data[i * n .. (i + 1) * n]`. The coordinator holds full
/// matrices; workers only ever hold single rows (`&[Elem]` / `Vec<Elem>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    n: usize,
    data: Vec<Elem>,
}

impl Matrix {
    /// An N×N matrix of zeros.
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![0; n * n],
        }
    }

    /// An N×N matrix with every cell drawn uniformly from `0..10`.
    pub fn random(n: usize, rng: &mut impl Rng) -> Self {
        let data = (0..n * n).map(|_| rng.gen_range(0..10)).collect();
        Self { n, data }
    }

    /// Reassemble a square matrix from its rows, row `i` of the result
    /// taken from `rows[i]`.
    ///
    /// # Panics
    ///
    /// Panics if any row's length differs from the number of rows.
    pub fn from_rows(rows: &[Vec<Elem>]) -> Self {
        let n = rows.len();
        let mut data = Vec::with_capacity(n * n);
        for row in rows {
            assert_eq!(row.len(), n, "row length must equal the row count");
            data.extend_from_slice(row);
        }
        Self { n, data }
    }

    /// The matrix dimension N.
    pub fn size(&self) -> usize {
        self.n
    }

    /// Row `i` as a slice.
    pub fn row(&self, i: usize) -> &[Elem] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// Iterate over the rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[Elem]> {
        self.data.chunks_exact(self.n)
    }

    /// The rows as owned vectors, in order. This is the shape the scatter
    /// collective distributes.
    pub fn to_rows(&self) -> Vec<Vec<Elem>> {
        self.rows().map(<[Elem]>::to_vec).collect()
    }
}

impl fmt::Display for Matrix {
    /// Bordered grid, one horizontal rule above and below every row, each
    /// cell right-justified in a fixed field width:
    ///
    /// ```text
    /// +----------+
    /// |  1 |  2 |
    /// +----------+
    /// | 13 |  4 |
    /// +----------+
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = format!("+{}+", "-".repeat((CELL_WIDTH + 3) * self.n));
        writeln!(f, "{}", rule)?;
        for row in self.rows() {
            write!(f, "|")?;
            for cell in row {
                write!(f, " {:>width$} |", cell, width = CELL_WIDTH)?;
            }
            writeln!(f)?;
            writeln!(f, "{}", rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rows_are_contiguous_row_major() {
        let m = Matrix::from_rows(&[vec![1, 2], vec![3, 4]]);
        assert_eq!(m.size(), 2);
        assert_eq!(m.row(0), &[1, 2]);
        assert_eq!(m.row(1), &[3, 4]);
        assert_eq!(m.to_rows(), vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    #[should_panic(expected = "row length must equal the row count")]
    fn ragged_rows_are_rejected() {
        Matrix::from_rows(&[vec![1, 2], vec![3]]);
    }

    #[test]
    fn random_fill_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let m = Matrix::random(8, &mut rng);
        assert!(m.rows().flatten().all(|&v| (0..10).contains(&v)));
    }

    #[test]
    fn same_seed_generates_same_matrix() {
        let a = Matrix::random(4, &mut StdRng::seed_from_u64(42));
        let b = Matrix::random(4, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn zeros_is_all_zero() {
        let m = Matrix::zeros(3);
        assert!(m.rows().flatten().all(|&v| v == 0));
    }

    #[test]
    fn display_draws_the_bordered_grid() {
        let m = Matrix::from_rows(&[vec![1, 2], vec![13, 4]]);
        let expected = "\
+----------+
|  1 |  2 |
+----------+
| 13 |  4 |
+----------+
";
        assert_eq!(m.to_string(), expected);
    }
}
