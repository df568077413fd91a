use crate::halo_error::HaloError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self) {
        if let Err(e) = self.validate_invariants() {
            panic!("[invariants] {e}");
        }
    }
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), HaloError>;
}

/// Check invariants of a value (or run a fallible check and panic on error)
/// when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($value:expr) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        $crate::debug_invariants::DebugInvariants::debug_assert_invariants(&$value);
    };
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
