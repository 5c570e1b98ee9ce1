//! Small dense-algebra helpers used by the face-coefficient builders
//! and the periodic halo transforms.
//!
//! Symmetric 3×3 tensors are stored as 6 components in the order
//! `[xx, yy, zz, xy, yz, xz]`; full tensors row-major as 9 components.

/// Dot product of two 3-vectors.
#[inline]
pub fn dot_3(u: &[f64; 3], v: &[f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

/// Squared Euclidean norm of a 3-vector.
#[inline]
pub fn square_norm_3(v: &[f64; 3]) -> f64 {
    dot_3(v, v)
}

/// Product `s1 . s2` of two symmetric 3×3 tensors, stored symmetric.
///
/// The true product is symmetric only when the operands commute; the
/// harmonic face-tensor mean uses the symmetric part, as the original
/// discretisation does.
#[inline]
pub fn sym_33_product(s1: &[f64; 6], s2: &[f64; 6]) -> [f64; 6] {
    [
        s1[0] * s2[0] + s1[3] * s2[3] + s1[5] * s2[5],
        s1[3] * s2[3] + s1[1] * s2[1] + s1[4] * s2[4],
        s1[5] * s2[5] + s1[4] * s2[4] + s1[2] * s2[2],
        s1[0] * s2[3] + s1[3] * s2[1] + s1[5] * s2[4],
        s1[3] * s2[5] + s1[1] * s2[4] + s1[4] * s2[2],
        s1[0] * s2[5] + s1[3] * s2[4] + s1[5] * s2[2],
    ]
}

/// `s . v` for a symmetric 3×3 tensor and a 3-vector.
#[inline]
pub fn sym_33_3_product(s: &[f64; 6], v: &[f64; 3]) -> [f64; 3] {
    [
        s[0] * v[0] + s[3] * v[1] + s[5] * v[2],
        s[3] * v[0] + s[1] * v[1] + s[4] * v[2],
        s[5] * v[0] + s[4] * v[1] + s[2] * v[2],
    ]
}

/// Inverse of a symmetric 3×3 tensor by Cramer's rule.
///
/// The caller guarantees invertibility; a singular input yields
/// non-finite components the caller must guard against.
#[inline]
pub fn sym_33_inv_cramer(s: &[f64; 6]) -> [f64; 6] {
    let c00 = s[1] * s[2] - s[4] * s[4];
    let c01 = s[4] * s[5] - s[3] * s[2];
    let c02 = s[3] * s[4] - s[1] * s[5];
    let det = s[0] * c00 + s[3] * c01 + s[5] * c02;
    let d = 1.0 / det;
    [
        c00 * d,
        (s[0] * s[2] - s[5] * s[5]) * d,
        (s[0] * s[1] - s[3] * s[3]) * d,
        c01 * d,
        (s[3] * s[5] - s[0] * s[4]) * d,
        c02 * d,
    ]
}

/// Expand a 6-component symmetric tensor to a full 3×3.
#[inline]
pub fn sym_33_to_full(s: &[f64; 6]) -> [[f64; 3]; 3] {
    [
        [s[0], s[3], s[5]],
        [s[3], s[1], s[4]],
        [s[5], s[4], s[2]],
    ]
}

/// `r . v` for a 3×3 rotation and a 3-vector.
#[inline]
pub fn rotate_vector(r: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
        r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
        r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
    ]
}

/// `r . s . r^T` for a symmetric tensor, returned symmetric.
pub fn rotate_sym_tensor(r: &[[f64; 3]; 3], s: &[f64; 6]) -> [f64; 6] {
    let m = sym_33_to_full(s);
    let mut rm = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            rm[i][j] = r[i][0] * m[0][j] + r[i][1] * m[1][j] + r[i][2] * m[2][j];
        }
    }
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = rm[i][0] * r[j][0] + rm[i][1] * r[j][1] + rm[i][2] * r[j][2];
        }
    }
    [
        out[0][0], out[1][1], out[2][2], out[0][1], out[1][2], out[0][2],
    ]
}

/// `r . t . r^T` for a full row-major 3×3 tensor.
pub fn rotate_tensor(r: &[[f64; 3]; 3], t: &[f64; 9]) -> [f64; 9] {
    let m = [
        [t[0], t[1], t[2]],
        [t[3], t[4], t[5]],
        [t[6], t[7], t[8]],
    ];
    let mut rm = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            rm[i][j] = r[i][0] * m[0][j] + r[i][1] * m[1][j] + r[i][2] * m[2][j];
        }
    }
    let mut out = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            out[3 * i + j] = rm[i][0] * r[j][0] + rm[i][1] * r[j][1] + rm[i][2] * r[j][2];
        }
    }
    out
}
