//! Float vector operations
//!
//! Elementwise kernels over contiguous `f32` spans used by the convolution
//! hot path. Every function works on the common prefix of its arguments.
//! Loops are written over `chunks_exact` so the compiler emits packed
//! SSE/AVX/NEON code without runtime dispatch.

use lpx_core::Sample;

const LANES: usize = 8;

/// `dest[i] = src[i]`
#[inline]
pub fn copy(dest: &mut [Sample], src: &[Sample]) {
    let n = dest.len().min(src.len());
    dest[..n].copy_from_slice(&src[..n]);
}

/// `dest[i] = value`
#[inline]
pub fn fill(dest: &mut [Sample], value: Sample) {
    dest.fill(value);
}

/// `dest[i] += src[i]`
#[inline]
pub fn add(dest: &mut [Sample], src: &[Sample]) {
    let n = dest.len().min(src.len());
    let (dest, src) = (&mut dest[..n], &src[..n]);

    let mut d_chunks = dest.chunks_exact_mut(LANES);
    let mut s_chunks = src.chunks_exact(LANES);
    for (d, s) in (&mut d_chunks).zip(&mut s_chunks) {
        for k in 0..LANES {
            d[k] += s[k];
        }
    }
    for (d, s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
        *d += *s;
    }
}

/// `dest[i] = a[i] + b[i]`
#[inline]
pub fn add_into(dest: &mut [Sample], a: &[Sample], b: &[Sample]) {
    let n = dest.len().min(a.len()).min(b.len());
    for ((d, x), y) in dest[..n].iter_mut().zip(&a[..n]).zip(&b[..n]) {
        *d = *x + *y;
    }
}

/// `dest[i] -= src[i]`
#[inline]
pub fn subtract(dest: &mut [Sample], src: &[Sample]) {
    let n = dest.len().min(src.len());
    for (d, s) in dest[..n].iter_mut().zip(&src[..n]) {
        *d -= *s;
    }
}

/// `dest[i] *= src[i]`
#[inline]
pub fn multiply(dest: &mut [Sample], src: &[Sample]) {
    let n = dest.len().min(src.len());
    for (d, s) in dest[..n].iter_mut().zip(&src[..n]) {
        *d *= *s;
    }
}

/// `dest[i] += a[i] * b[i]`
#[inline]
pub fn add_with_multiply(dest: &mut [Sample], a: &[Sample], b: &[Sample]) {
    let n = dest.len().min(a.len()).min(b.len());
    let (dest, a, b) = (&mut dest[..n], &a[..n], &b[..n]);

    let mut d_chunks = dest.chunks_exact_mut(LANES);
    let mut a_chunks = a.chunks_exact(LANES);
    let mut b_chunks = b.chunks_exact(LANES);
    for ((d, x), y) in (&mut d_chunks).zip(&mut a_chunks).zip(&mut b_chunks) {
        for k in 0..LANES {
            d[k] += x[k] * y[k];
        }
    }
    for ((d, x), y) in d_chunks
        .into_remainder()
        .iter_mut()
        .zip(a_chunks.remainder())
        .zip(b_chunks.remainder())
    {
        *d += *x * *y;
    }
}

/// `dest[i] -= a[i] * b[i]`
#[inline]
pub fn subtract_with_multiply(dest: &mut [Sample], a: &[Sample], b: &[Sample]) {
    let n = dest.len().min(a.len()).min(b.len());
    let (dest, a, b) = (&mut dest[..n], &a[..n], &b[..n]);

    let mut d_chunks = dest.chunks_exact_mut(LANES);
    let mut a_chunks = a.chunks_exact(LANES);
    let mut b_chunks = b.chunks_exact(LANES);
    for ((d, x), y) in (&mut d_chunks).zip(&mut a_chunks).zip(&mut b_chunks) {
        for k in 0..LANES {
            d[k] -= x[k] * y[k];
        }
    }
    for ((d, x), y) in d_chunks
        .into_remainder()
        .iter_mut()
        .zip(a_chunks.remainder())
        .zip(b_chunks.remainder())
    {
        *d -= *x * *y;
    }
}

/// Sum of all samples (f64 accumulator)
#[inline]
pub fn accumulate(src: &[f64]) -> f64 {
    src.iter().sum()
}

/// Root-mean-square of a signal
#[inline]
pub fn rms(src: &[f64]) -> f64 {
    if src.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = src.iter().map(|x| x * x).sum();
    (sum_squares / src.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_add_handles_remainder() {
        let mut dest = vec![1.0; 13];
        add(&mut dest, &ramp(13));
        for (i, &x) in dest.iter().enumerate() {
            assert_eq!(x, 1.0 + i as f32);
        }
    }

    #[test]
    fn test_add_into() {
        let mut dest = vec![0.0; 5];
        add_into(&mut dest, &ramp(5), &[1.0; 5]);
        assert_eq!(dest, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_multiply_accumulate() {
        let a = ramp(11);
        let b = vec![2.0; 11];

        let mut dest = vec![1.0; 11];
        add_with_multiply(&mut dest, &a, &b);
        for (i, &x) in dest.iter().enumerate() {
            assert_eq!(x, 1.0 + 2.0 * i as f32);
        }

        subtract_with_multiply(&mut dest, &a, &b);
        assert!(dest.iter().all(|&x| x == 1.0));
    }

    #[test]
    fn test_truncates_to_shortest() {
        let mut dest = vec![0.0; 4];
        copy(&mut dest, &[1.0, 2.0]);
        assert_eq!(dest, vec![1.0, 2.0, 0.0, 0.0]);

        subtract(&mut dest, &[1.0; 3]);
        assert_eq!(dest, vec![0.0, 1.0, -1.0, 0.0]);

        multiply(&mut dest, &[3.0; 2]);
        assert_eq!(dest, vec![0.0, 3.0, -1.0, 0.0]);
    }

    #[test]
    fn test_rms_and_accumulate() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-12);
        assert_eq!(accumulate(&[1.0, 2.0, 3.0]), 6.0);
    }
}
