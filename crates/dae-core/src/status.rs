//! Status-flag taxonomy surfaced from the back-end and the driver itself.

/// Outcome of a solve, carrying either the back-end's forwarded numeric
/// status or a driver-synthesised value (stall, duplicate-time).
///
/// Per §6 of the specification the driver does not translate these to
/// strings; it forwards the integer code via [`StatusFlag::code`] for
/// consumers that key off the historical SUNDIALS convention, while still
/// being a proper Rust enum for internal matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFlag {
    /// The requested final time was reached without incident.
    Success,
    /// An intermediate forced stop-time was hit (`IDA_TSTOP_RETURN`).
    StopReturn,
    /// A root (event) crossing was detected (`IDA_ROOT_RETURN`).
    RootReturn,
    /// The back-end failed to converge, or the no-progress guard tripped.
    ErrFail,
    /// The back-end reported a memory/allocation failure.
    MemFail,
    /// A configuration or argument was invalid.
    BadInput,
}

impl StatusFlag {
    /// The integer code forwarded to callers, matching the historical
    /// SUNDIALS/IDA convention: non-negative is success-shaped, negative is
    /// a failure.
    pub fn code(self) -> i32 {
        match self {
            StatusFlag::Success => 0,
            StatusFlag::StopReturn => 1,
            StatusFlag::RootReturn => 2,
            StatusFlag::ErrFail => -1,
            StatusFlag::MemFail => -5,
            StatusFlag::BadInput => -6,
        }
    }

    /// True for any status that aborts the stepping loop without reaching
    /// a scheduled or event terminus.
    pub fn is_failure(self) -> bool {
        self.code() < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_are_negative() {
        assert!(StatusFlag::ErrFail.is_failure());
        assert!(StatusFlag::MemFail.is_failure());
        assert!(StatusFlag::BadInput.is_failure());
    }

    #[test]
    fn terminal_codes_are_non_negative() {
        assert!(!StatusFlag::Success.is_failure());
        assert!(!StatusFlag::StopReturn.is_failure());
        assert!(!StatusFlag::RootReturn.is_failure());
    }
}
