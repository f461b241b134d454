use faer::Mat;

#[must_use]
pub fn select_rows(matrix: &Mat<f64>, indices: &[usize]) -> Mat<f64> {
    Mat::from_fn(indices.len(), matrix.ncols(), |i, j| {
        matrix[(indices[i], j)]
    })
}

/// Copy of `matrix` shifted down by `shift` rows, with the first `shift` rows zeroed.
#[must_use]
pub fn shift_rows_down(matrix: &Mat<f64>, shift: usize) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), matrix.ncols(), |i, j| {
        if i < shift { 0.0 } else { matrix[(i - shift, j)] }
    })
}

/// Horizontal concatenation of blocks with equal row counts.
///
/// # Panics
///
/// Panics if the blocks have different row counts.
#[must_use]
pub fn hstack(blocks: &[Mat<f64>], nrows: usize) -> Mat<f64> {
    assert!(
        blocks.iter().all(|block| block.nrows() == nrows),
        "hstack requires equal row counts"
    );
    let ncols = blocks.iter().map(|block| block.ncols()).sum();
    let mut out = Mat::<f64>::zeros(nrows, ncols);
    let mut offset = 0;
    for block in blocks {
        for i in 0..nrows {
            for j in 0..block.ncols() {
                out[(i, offset + j)] = block[(i, j)];
            }
        }
        offset += block.ncols();
    }
    out
}

/// Vertical concatenation of blocks with equal column counts.
///
/// # Panics
///
/// Panics if the blocks have different column counts.
#[must_use]
pub fn vstack(blocks: &[Mat<f64>], ncols: usize) -> Mat<f64> {
    assert!(
        blocks.iter().all(|block| block.ncols() == ncols),
        "vstack requires equal column counts"
    );
    let nrows = blocks.iter().map(|block| block.nrows()).sum();
    let mut out = Mat::<f64>::zeros(nrows, ncols);
    let mut offset = 0;
    for block in blocks {
        for i in 0..block.nrows() {
            for j in 0..ncols {
                out[(offset + i, j)] = block[(i, j)];
            }
        }
        offset += block.nrows();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_rows_down_zero_fills_the_head() {
        let m = Mat::from_fn(3, 1, |i, _| f64::from(u32::try_from(i + 1).unwrap_or(0)));
        let shifted = shift_rows_down(&m, 1);
        assert!((shifted[(0, 0)]).abs() < 1e-12);
        assert!((shifted[(1, 0)] - 1.0).abs() < 1e-12);
        assert!((shifted[(2, 0)] - 2.0).abs() < 1e-12);
        let gone = shift_rows_down(&m, 5);
        assert!((0..3).all(|i| gone[(i, 0)] == 0.0));
    }

    #[test]
    fn stacking_preserves_block_order() {
        let a = Mat::from_fn(2, 1, |_i, _| 1.0);
        let b = Mat::from_fn(2, 2, |_i, _| 2.0);
        let h = hstack(&[a.clone(), b], 2);
        assert_eq!(h.ncols(), 3);
        assert!((h[(1, 2)] - 2.0).abs() < 1e-12);

        let v = vstack(&[a.clone(), a], 1);
        assert_eq!(v.nrows(), 4);
        let empty = vstack(&[], 3);
        assert_eq!((empty.nrows(), empty.ncols()), (0, 3));
    }
}
