/////////////////////////////////////////////////////
// A compressed sparse matrix with explicit arrays  //
/////////////////////////////////////////////////////

use nalgebra::DMatrix;
use std::io::Error;
use std::io::ErrorKind;

/// The storage order of a `SparseMatrix`: `Row` gives compressed sparse row
/// (CSR) storage, which is efficient for matrix-vector products, and `Column`
/// gives compressed sparse column (CSC) storage, which is efficient for
/// extracting individual columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MajorOrder {
    Row,
    Column,
}

/// A compressed sparse matrix of `f32` values stored as the classic
/// `(indptr, indices, data)` triple. The value arrays are public through
/// accessors so that callers can re-derive value-transformed copies (e.g.
/// decay matrices from residence-time matrices) without touching the
/// sparsity structure.
///
/// Example:
///
/// ```
/// use contam_common::structures::{MajorOrder, SparseMatrix};
///
/// let dense = nalgebra::DMatrix::<f32>::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 3.0]);
/// let m = SparseMatrix::from_dense(&dense, MajorOrder::Row);
/// let y = m.mul_vec(&[1.0, 1.0]);
/// assert_eq!(y, vec![1.0, 5.0]);
/// ```
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    order: MajorOrder,
    rows: usize,
    columns: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f32>,
}

impl SparseMatrix {
    /// Compresses a dense matrix, dropping exact zeros.
    pub fn from_dense(dense: &DMatrix<f32>, order: MajorOrder) -> SparseMatrix {
        let rows = dense.nrows();
        let columns = dense.ncols();
        let major_dim = match order {
            MajorOrder::Row => rows,
            MajorOrder::Column => columns,
        };
        let minor_dim = match order {
            MajorOrder::Row => columns,
            MajorOrder::Column => rows,
        };
        let mut indptr = Vec::with_capacity(major_dim + 1);
        let mut indices = vec![];
        let mut data = vec![];
        indptr.push(0usize);
        for i in 0..major_dim {
            for j in 0..minor_dim {
                let value = match order {
                    MajorOrder::Row => dense[(i, j)],
                    MajorOrder::Column => dense[(j, i)],
                };
                if value != 0f32 {
                    indices.push(j);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        SparseMatrix {
            order,
            rows,
            columns,
            indptr,
            indices,
            data,
        }
    }

    /// Builds a matrix directly from the raw compressed arrays, as read from
    /// a persisted bundle. Returns an error if the arrays are inconsistent.
    pub fn from_raw_parts(
        order: MajorOrder,
        rows: usize,
        columns: usize,
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<SparseMatrix, Error> {
        let m = SparseMatrix {
            order,
            rows,
            columns,
            indptr,
            indices,
            data,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn to_dense(&self) -> DMatrix<f32> {
        let mut dense = DMatrix::<f32>::zeros(self.rows, self.columns);
        for major in 0..self.major_dim() {
            for k in self.indptr[major]..self.indptr[major + 1] {
                let minor = self.indices[k];
                match self.order {
                    MajorOrder::Row => dense[(major, minor)] = self.data[k],
                    MajorOrder::Column => dense[(minor, major)] = self.data[k],
                }
            }
        }
        dense
    }

    pub fn order(&self) -> MajorOrder {
        self.order
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// The number of stored (nonzero) entries.
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn major_dim(&self) -> usize {
        match self.order {
            MajorOrder::Row => self.rows,
            MajorOrder::Column => self.columns,
        }
    }

    /// Value at `(row, col)`; zero when no entry is stored there.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        let (major, minor) = match self.order {
            MajorOrder::Row => (row, col),
            MajorOrder::Column => (col, row),
        };
        let lo = self.indptr[major];
        let hi = self.indptr[major + 1];
        match self.indices[lo..hi].binary_search(&minor) {
            Ok(k) => self.data[lo + k],
            Err(_) => 0f32,
        }
    }

    /// Matrix-vector product `y = M x`, accumulated in double precision.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0f64; self.rows];
        match self.order {
            MajorOrder::Row => {
                for row in 0..self.rows {
                    let mut sum = 0f64;
                    for k in self.indptr[row]..self.indptr[row + 1] {
                        sum += self.data[k] as f64 * x[self.indices[k]];
                    }
                    y[row] = sum;
                }
            }
            MajorOrder::Column => {
                for col in 0..self.columns {
                    let xv = x[col];
                    if xv != 0f64 {
                        for k in self.indptr[col]..self.indptr[col + 1] {
                            y[self.indices[k]] += self.data[k] as f64 * xv;
                        }
                    }
                }
            }
        }
        y
    }

    /// Extracts column `col` as a dense vector. This is O(col entries) for
    /// column-major storage and O(nnz) for row-major storage.
    pub fn column(&self, col: usize) -> Vec<f32> {
        let mut out = vec![0f32; self.rows];
        match self.order {
            MajorOrder::Column => {
                for k in self.indptr[col]..self.indptr[col + 1] {
                    out[self.indices[k]] = self.data[k];
                }
            }
            MajorOrder::Row => {
                for row in 0..self.rows {
                    let lo = self.indptr[row];
                    let hi = self.indptr[row + 1];
                    if let Ok(k) = self.indices[lo..hi].binary_search(&col) {
                        out[row] = self.data[lo + k];
                    }
                }
            }
        }
        out
    }

    /// Returns a copy of the matrix with every stored value transformed by
    /// `f`. The sparsity structure is shared semantics-wise: the output has
    /// entries exactly where the input does, whatever `f` returns.
    pub fn map_data<F: Fn(f32) -> f32>(&self, f: F) -> SparseMatrix {
        SparseMatrix {
            order: self.order,
            rows: self.rows,
            columns: self.columns,
            indptr: self.indptr.clone(),
            indices: self.indices.clone(),
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }

    /// Checks the compressed-array invariants: `indptr` monotone and sized
    /// `major_dim + 1`, minor indices in range and strictly increasing within
    /// each major slice.
    pub fn validate(&self) -> Result<(), Error> {
        let minor_dim = match self.order {
            MajorOrder::Row => self.columns,
            MajorOrder::Column => self.rows,
        };
        if self.indptr.len() != self.major_dim() + 1 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The index pointer array does not match the matrix dimensions.",
            ));
        }
        if self.indptr[0] != 0 || self.indptr[self.major_dim()] != self.indices.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The index pointer array does not span the index array.",
            ));
        }
        if self.indices.len() != self.data.len() {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "The index and value arrays differ in length.",
            ));
        }
        for major in 0..self.major_dim() {
            if self.indptr[major] > self.indptr[major + 1] {
                return Err(Error::new(
                    ErrorKind::InvalidData,
                    "The index pointer array is not monotone.",
                ));
            }
            let mut last: Option<usize> = None;
            for k in self.indptr[major]..self.indptr[major + 1] {
                if self.indices[k] >= minor_dim {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "A stored index lies outside the matrix dimensions.",
                    ));
                }
                if let Some(prev) = last {
                    if self.indices[k] <= prev {
                        return Err(Error::new(
                            ErrorKind::InvalidData,
                            "Stored indices are not strictly increasing.",
                        ));
                    }
                }
                last = Some(self.indices[k]);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{MajorOrder, SparseMatrix};
    use nalgebra::DMatrix;

    fn example() -> DMatrix<f32> {
        DMatrix::<f32>::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 1.5, 3.0, 0.0, 0.0, 0.5, 4.0])
    }

    #[test]
    fn test_round_trip_both_orders() {
        let dense = example();
        for order in [MajorOrder::Row, MajorOrder::Column] {
            let m = SparseMatrix::from_dense(&dense, order);
            assert!(m.validate().is_ok());
            assert_eq!(m.nnz(), 5);
            assert_eq!(m.to_dense(), dense);
        }
    }

    #[test]
    fn test_get_and_column() {
        let dense = example();
        let csr = SparseMatrix::from_dense(&dense, MajorOrder::Row);
        let csc = SparseMatrix::from_dense(&dense, MajorOrder::Column);
        assert_eq!(csr.get(1, 0), 1.5);
        assert_eq!(csr.get(0, 2), 0.0);
        assert_eq!(csr.column(1), vec![0.0, 3.0, 0.5]);
        assert_eq!(csc.column(1), vec![0.0, 3.0, 0.5]);
    }

    #[test]
    fn test_mul_vec_matches_dense() {
        let dense = example();
        let x = vec![1.0f64, 2.0, 3.0];
        let expected = vec![2.0f64, 1.5 + 6.0, 1.0 + 12.0];
        for order in [MajorOrder::Row, MajorOrder::Column] {
            let m = SparseMatrix::from_dense(&dense, order);
            let y = m.mul_vec(&x);
            for i in 0..3 {
                assert!((y[i] - expected[i]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_map_data_preserves_structure() {
        let m = SparseMatrix::from_dense(&example(), MajorOrder::Row);
        let mapped = m.map_data(|v| (-0.5f32 * v).exp());
        assert_eq!(mapped.nnz(), m.nnz());
        assert_eq!(mapped.indices(), m.indices());
        assert!((mapped.get(2, 2) - (-2.0f32).exp()).abs() < 1e-6);
        // zeros stay absent, not mapped to exp(0)=1
        assert_eq!(mapped.get(0, 1), 0.0);
    }
}
