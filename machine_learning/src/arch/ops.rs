use ndarray::{Array2, ArrayView1, Axis};

/// Applies a numerically stable softmax to each row, in place.
pub fn softmax_rows(a: &mut Array2<f32>) {
    for mut row in a.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
}

/// Returns `log(sum(exp(row)))` computed with the max-shift trick.
pub fn log_sum_exp(row: ArrayView1<f32>) -> f32 {
    let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    max + row.mapv(|v| (v - max).exp()).sum().ln()
}

/// Returns the index of the largest value of each row, the first one on ties.
pub fn argmax_rows(a: &Array2<f32>) -> Vec<usize> {
    a.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best_at, best), (i, &v)| {
                    if v > best { (i, v) } else { (best_at, best) }
                })
                .0
        })
        .collect()
}
