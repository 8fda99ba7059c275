//! Multiple importance sampling heuristics.

/// Balance heuristic weight of strategy `a` against `b` (one sample each).
#[inline]
pub fn balance(pdf_a: f32, pdf_b: f32) -> f32 {
    let sum = pdf_a + pdf_b;
    if sum > 0.0 {
        pdf_a / sum
    } else {
        0.0
    }
}

/// Power heuristic with exponent 2.
#[inline]
pub fn power(pdf_a: f32, pdf_b: f32) -> f32 {
    let a = pdf_a * pdf_a;
    let sum = a + pdf_b * pdf_b;
    if sum > 0.0 {
        a / sum
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_partition_unity() {
        let (a, b) = (0.3, 1.7);
        assert!((balance(a, b) + balance(b, a) - 1.0).abs() < 1e-6);
        assert!((power(a, b) + power(b, a) - 1.0).abs() < 1e-6);
        assert_eq!(balance(0.0, 0.0), 0.0);
    }
}
