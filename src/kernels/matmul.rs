// RANKLE, an interpreter for a terse array language.

// SPDX-FileCopyrightText: © 2026 The Rankle contributors
// SPDX-License-Identifier: AGPL-3.0-only

// Rankle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top level LICENSE file for the license
// text.

// <>

// src/kernels/matmul.rs

// Matrix multiply over f32. Three shapes: matrix-matrix with a
// blocked 4-by-4 register kernel, matrix-vector as a dot product per
// row, vector-matrix as a 4-wide column-strided accumulation. All
// strides are in elements.

// <>

use super::reduce::dot_f32;

/// C[m,n] = A[m,k] · B[k,n]; `rr` may be a subrange of rows so the
/// worker pool can split the outer dimension
pub fn mm_f32(
    c: &mut [f32],
    a: &[f32],
    b: &[f32],
    rr: std::ops::Range<usize>,
    k: usize,
    n: usize,
    sa: usize,
    sb: usize,
    sc: usize,
) {
    let mut i0 = rr.start;
    while i0 < rr.end {
        let ib = (rr.end - i0).min(4);
        let mut j0 = 0;
        while j0 < n {
            let jb = (n - j0).min(4);
            // 4x4 accumulator block held in registers
            let mut acc = [[0.0f32; 4]; 4];
            for p in 0..k {
                for (r, row) in acc.iter_mut().enumerate().take(ib) {
                    let av = a[(i0 + r) * sa + p];
                    for (q, cell) in row.iter_mut().enumerate().take(jb) {
                        *cell += av * b[p * sb + j0 + q];
                    }
                }
            }
            for r in 0..ib {
                for q in 0..jb {
                    c[(i0 + r) * sc + j0 + q] = acc[r][q];
                }
            }
            j0 += 4;
        }
        i0 += 4;
    }
}

/// c[m] = A[m,k] · v[k], one dot product per row
pub fn mv_f32(c: &mut [f32], a: &[f32], v: &[f32], rr: std::ops::Range<usize>, k: usize, sa: usize) {
    for i in rr {
        c[i] = dot_f32(&a[i * sa..i * sa + k], v);
    }
}

/// c[n] = v[k] · B[k,n], accumulating rows 4 columns at a time
pub fn vm_f32(c: &mut [f32], v: &[f32], b: &[f32], k: usize, n: usize, sb: usize) {
    for x in c.iter_mut() {
        *x = 0.0;
    }
    for p in 0..k {
        let s = v[p];
        let row = &b[p * sb..p * sb + n];
        let mut j = 0;
        while j + 4 <= n {
            c[j] += s * row[j];
            c[j + 1] += s * row[j + 1];
            c[j + 2] += s * row[j + 2];
            c[j + 3] += s * row[j + 3];
            j += 4;
        }
        while j < n {
            c[j] += s * row[j];
            j += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
        let mut c = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                for p in 0..k {
                    c[i * n + j] += a[i * k + p] * b[p * n + j];
                }
            }
        }
        c
    }

    #[test]
    fn matrix_matrix() {
        let (m, k, n) = (5, 7, 6);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 11) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 7) as f32 * 0.5).collect();
        let mut c = vec![0.0; m * n];
        mm_f32(&mut c, &a, &b, 0..m, k, n, k, n, n);
        assert_eq!(c, naive(&a, &b, m, k, n));
    }

    #[test]
    fn matrix_matrix_strided() {
        // 3x3 operands strided at 4
        let mut a = vec![0.0f32; 12];
        let mut b = vec![0.0f32; 12];
        for r in 0..3 {
            for c in 0..3 {
                a[r * 4 + c] = (r * 3 + c) as f32;
                b[r * 4 + c] = if r == c { 1.0 } else { 0.0 };
            }
        }
        let mut c = vec![0.0f32; 12];
        mm_f32(&mut c, &a, &b, 0..3, 3, 3, 4, 4, 4);
        for r in 0..3 {
            for q in 0..3 {
                assert_eq!(c[r * 4 + q], a[r * 4 + q]);
            }
        }
    }

    #[test]
    fn matrix_vector() {
        let a: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let v = [1.0, 10.0, 100.0];
        let mut c = [0.0; 2];
        mv_f32(&mut c, &a, &v, 0..2, 3, 3);
        assert_eq!(c, [210.0, 543.0]);
    }

    #[test]
    fn vector_matrix() {
        let b: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let v = [1.0, 10.0];
        let mut c = [0.0; 3];
        vm_f32(&mut c, &v, &b, 2, 3, 3);
        assert_eq!(c, [30.0, 41.0, 52.0]);
    }
}
