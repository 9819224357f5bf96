//! VM status flags.
//!
//! Four flags live in the runtime object, outside the address space:
//! - Z: result was zero
//! - S: result had bit 12 set (negative in two's complement)
//! - C: unsigned carry / borrow out of the 13-bit result
//! - V: signed overflow (result does not fit in signed 13 bits)

use serde::{Serialize, Deserialize};

/// The four status flags.
///
/// Flag-affecting instructions write all four as a unit; the carry-only
/// instructions (CLC/STC/CMC) touch `carry` alone; everything else leaves
/// the flags exactly as they were.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub sign: bool,
    pub carry: bool,
    pub overflow: bool,
}

impl Flags {
    /// All four flags clear.
    pub const fn new() -> Self {
        Self {
            zero: false,
            sign: false,
            carry: false,
            overflow: false,
        }
    }

    /// Clear all four flags.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Signed "less than" after a compare: S != V.
    #[inline]
    pub fn less(self) -> bool {
        self.sign != self.overflow
    }

    /// Signed "greater than" after a compare: Z = 0 and S = V.
    #[inline]
    pub fn greater(self) -> bool {
        !self.zero && self.sign == self.overflow
    }

    /// Signed "less or equal" after a compare: Z = 1 or S != V.
    #[inline]
    pub fn less_equal(self) -> bool {
        self.zero || self.sign != self.overflow
    }

    /// Signed "greater or equal" after a compare: S = V.
    #[inline]
    pub fn greater_equal(self) -> bool {
        self.sign == self.overflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::alu;
    use crate::word::Word13;

    fn compare(a: i16, b: i16) -> Flags {
        let (_, flags) = alu::sub(Word13::from_i16(a), Word13::from_i16(b));
        flags
    }

    #[test]
    fn test_signed_predicates_small_values() {
        assert!(compare(1, 2).less());
        assert!(compare(2, 1).greater());
        assert!(compare(3, 3).less_equal());
        assert!(compare(3, 3).greater_equal());
        assert!(!compare(3, 3).less());
        assert!(!compare(3, 3).greater());
    }

    #[test]
    fn test_signed_predicates_across_zero() {
        assert!(compare(-1, 1).less());
        assert!(compare(1, -1).greater());
        assert!(compare(-4096, 4095).less());
        assert!(compare(4095, -4096).greater());
    }

    #[test]
    fn test_signed_predicates_with_overflow() {
        // -4096 - 1 overflows, but S != V still means "less".
        let flags = compare(-4096, 1);
        assert!(flags.overflow);
        assert!(flags.less());
        assert!(!flags.greater_equal());
    }

    #[test]
    fn test_reset() {
        let mut flags = Flags {
            zero: true,
            sign: true,
            carry: true,
            overflow: true,
        };
        flags.reset();
        assert_eq!(flags, Flags::new());
    }
}
