//! Result verification against reference outputs
//!
//! Elements are compared by the distance between their IEEE-754 bit
//! patterns, which tolerates the reassociation error of the hardware's
//! accumulation order. References at or below `1e-5` are not checked.

use crate::error::{Result, SpmvError};
use tracing::{info, warn};

/// References at or below this are skipped
pub const MIN_CHECKED: f32 = 1e-5;

/// Largest tolerated bit-pattern distance
pub const MAX_BIT_DISTANCE: i64 = 167_772;

/// Whether `actual` is too far from `expected`
pub fn mismatches(expected: f32, actual: f32) -> bool {
    if expected <= MIN_CHECKED {
        return false;
    }
    let e = i64::from(expected.to_bits() as i32);
    let a = i64::from(actual.to_bits() as i32);
    (e - a).abs() > MAX_BIT_DISTANCE
}

/// First bad element of a unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    /// Element index
    pub index: usize,
    /// Reference value
    pub expected: f32,
    /// Device value, `None` if the device produced too few elements
    pub actual: Option<f32>,
}

/// Outcome for one unit
#[derive(Debug, Clone, PartialEq)]
pub struct UnitVerdict {
    /// Compute unit
    pub unit: usize,
    /// Elements compared
    pub compared: usize,
    /// First mismatch, if any
    pub mismatch: Option<Mismatch>,
}

impl UnitVerdict {
    /// Whether the unit passed
    pub const fn passed(&self) -> bool {
        self.mismatch.is_none()
    }
}

/// Compare one unit's output with its reference, stopping at the first
/// mismatch
///
/// Every index of `expected` (the `.exp` records) is compared. A shorter
/// `actual` fails at its first missing index; extra trailing output is ignored.
pub fn verify_unit(unit: usize, expected: &[f32], actual: &[f32]) -> UnitVerdict {
    let mismatch = expected.iter().enumerate().find_map(|(index, &e)| match actual.get(index) {
        Some(&a) if !mismatches(e, a) => None,
        a => Some(Mismatch {
            index,
            expected: e,
            actual: a.copied(),
        }),
    });
    UnitVerdict {
        unit,
        compared: expected.len(),
        mismatch,
    }
}

/// Outcome for every unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    /// Per-unit verdicts
    pub units: Vec<UnitVerdict>,
}

impl Verification {
    /// Verify every unit; `expected` and `actual` are indexed by unit
    pub fn run<E, A>(expected: &[E], actual: &[A]) -> Self
    where
        E: AsRef<[f32]>,
        A: AsRef<[f32]>,
    {
        let units = expected
            .iter()
            .enumerate()
            .map(|(unit, e)| {
                let a = actual.get(unit).map_or(&[][..], AsRef::as_ref);
                let verdict = verify_unit(unit, e.as_ref(), a);
                match &verdict.mismatch {
                    None => info!("Unit {unit} pass"),
                    Some(m) => warn!(
                        "Unit {unit} fail at {}: got {:?}, expected {}",
                        m.index, m.actual, m.expected
                    ),
                }
                verdict
            })
            .collect();
        Self { units }
    }

    /// Whether every unit passed
    pub fn all_passed(&self) -> bool {
        self.units.iter().all(UnitVerdict::passed)
    }

    /// Turn a failed verification into an error
    ///
    /// # Errors
    ///
    /// Returns `Verification` naming the failed units.
    pub fn into_result(self) -> Result<Self> {
        if self.all_passed() {
            return Ok(self);
        }
        let failed: Vec<String> = self
            .units
            .iter()
            .filter(|v| !v.passed())
            .map(|v| v.unit.to_string())
            .collect();
        Err(SpmvError::verification(format!("unit(s) {} failed", failed.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_in_bit_space() {
        let x = 3.25f32;
        let near = f32::from_bits(x.to_bits() + 100_000);
        let far = f32::from_bits(x.to_bits() + 200_000);
        assert!(!mismatches(x, near));
        assert!(mismatches(x, far));
        assert!(mismatches(x, -x));
    }

    #[test]
    fn tiny_references_skipped() {
        assert!(!mismatches(1e-6, 1000.0));
        assert!(!mismatches(-5.0, 5.0));
    }

    #[test]
    fn first_mismatch_reported() {
        let verdict = verify_unit(2, &[1.0, 2.0, 3.0, 4.0], &[1.0, 2.5, 3.0, 9.0]);
        assert!(!verdict.passed());
        assert_eq!(verdict.mismatch.unwrap().index, 1);
    }

    #[test]
    fn short_output_fails() {
        let verdict = verify_unit(0, &[1.0, 2.0], &[1.0]);
        let m = verdict.mismatch.unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.actual, None);
    }

    #[test]
    fn aggregate() {
        let expected = vec![vec![1.0f32, 2.0], vec![3.0]];
        let good = Verification::run(&expected, &[vec![1.0f32, 2.0], vec![3.0]]);
        assert!(good.all_passed());
        good.into_result().unwrap();

        let bad = Verification::run(&expected, &[vec![1.0f32, 2.0], vec![-3.0]]);
        let err = bad.into_result().unwrap_err();
        assert!(err.to_string().contains("unit(s) 1 failed"));
    }
}
