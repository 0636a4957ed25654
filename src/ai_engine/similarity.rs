use ndarray::{Array2, Axis};

/// Pairwise cosine similarity between the rows of `matrix`.
///
/// Rows with zero norm get similarity 0 against every row, themselves included.
pub fn cosine_similarity(matrix: &Array2<f64>) -> Array2<f64> {
    let norms: Vec<f64> = matrix
        .axis_iter(Axis(0))
        .map(|row| row.dot(&row).sqrt())
        .collect();

    let mut normalized = matrix.clone();
    for (mut row, norm) in normalized.axis_iter_mut(Axis(0)).zip(&norms) {
        if *norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        } else {
            row.fill(0.0);
        }
    }

    normalized.dot(&normalized.t())
}
