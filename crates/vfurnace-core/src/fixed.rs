use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits. Used for
/// processing speed, resource-rate multipliers, and recipe progress so that
/// advancing a machine is deterministic across platforms.
pub type Fixed64 = I32F32;

/// Steps are the atomic unit of simulation time.
pub type Steps = u64;

/// Convert an f64 to Fixed64. Use only for configuration, never in the tick loop.
/// `None` for NaN, infinities and values outside the Q32.32 range.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Option<Fixed64> {
    Fixed64::checked_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and logging.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Ceiling of a non-negative fixed-point value as a `u32`. Negative values
/// clamp to zero, values past `u32::MAX` saturate.
#[inline]
pub fn ceil_to_u32(v: Fixed64) -> u32 {
    if v <= Fixed64::ZERO {
        return 0;
    }
    let raw: i64 = v.to_num();
    let ceiled = if v.frac() > Fixed64::ZERO { raw + 1 } else { raw };
    ceiled.clamp(0, u32::MAX as i64) as u32
}

/// Raw bit pattern of a Fixed64, for lossless persistence.
#[inline]
pub fn fixed64_to_bits(v: Fixed64) -> i64 {
    v.to_bits()
}

/// Rebuild a Fixed64 from its raw bit pattern.
#[inline]
pub fn fixed64_from_bits(bits: i64) -> Fixed64 {
    Fixed64::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(v: f64) -> Fixed64 {
        f64_to_fixed64(v).unwrap()
    }

    #[test]
    fn fixed64_basic_arithmetic() {
        let a = fixed(1.5);
        let b = fixed(2.0);
        let sum = a + b;
        assert_eq!(fixed64_to_f64(sum), 3.5);
    }

    #[test]
    fn ceil_rounds_fractions_up() {
        assert_eq!(ceil_to_u32(fixed(1.0)), 1);
        assert_eq!(ceil_to_u32(fixed(1.25)), 2);
        assert_eq!(ceil_to_u32(fixed(0.5)), 1);
        assert_eq!(ceil_to_u32(Fixed64::ZERO), 0);
    }

    #[test]
    fn ceil_clamps_negative_to_zero() {
        assert_eq!(ceil_to_u32(fixed(-3.5)), 0);
    }

    #[test]
    fn bits_round_trip_exactly() {
        let v = fixed(1.0 / 3.0);
        assert_eq!(fixed64_from_bits(fixed64_to_bits(v)), v);
    }

    #[test]
    fn fixed64_determinism() {
        let a = fixed(1.0 / 3.0);
        let b = fixed(1.0 / 3.0);
        assert_eq!(a, b);
        assert_eq!(a * fixed(3.0), b * fixed(3.0));
    }

    #[test]
    fn non_finite_and_out_of_range_floats_are_rejected() {
        assert_eq!(f64_to_fixed64(f64::NAN), None);
        assert_eq!(f64_to_fixed64(f64::INFINITY), None);
        assert_eq!(f64_to_fixed64(f64::NEG_INFINITY), None);
        assert_eq!(f64_to_fixed64(1e12), None);
        assert_eq!(f64_to_fixed64(-1e12), None);
    }

    #[test]
    fn fixed64_ordering() {
        let a = fixed(1.0);
        let b = fixed(2.0);
        assert!(a < b);
        assert!(b > a);
    }
}
