//! Dispatch sizing - workgroup count computation for compute passes.
//!
//! Group counts are always the ceiling of size / workgroup extent.
//! Flooring would leave the remainder cells of the grid unprocessed.

/// Number of workgroups needed to cover `size` invocations with
/// workgroups of `workgroup` threads.
///
/// Precondition: `size > 0` and `workgroup > 0`. Zero sizes are a caller
/// error, not a runtime-recoverable case.
#[inline]
pub fn workgroup_count(size: u32, workgroup: u32) -> u32 {
    debug_assert!(size > 0, "dispatch size must be positive");
    debug_assert!(workgroup > 0, "workgroup extent must be positive");
    size.div_ceil(workgroup)
}

/// 3D workgroup counts for a problem of `size` with workgroup extent
/// `workgroup`.
#[inline]
pub fn workgroup_counts(size: [u32; 3], workgroup: [u32; 3]) -> [u32; 3] {
    [
        workgroup_count(size[0], workgroup[0]),
        workgroup_count(size[1], workgroup[1]),
        workgroup_count(size[2], workgroup[2]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exact_multiple_has_no_extra_group() {
        assert_eq!(workgroup_count(512, 8), 64);
        assert_eq!(workgroup_count(8, 8), 1);
        assert_eq!(workgroup_count(256, 16), 16);
    }

    #[test]
    fn remainder_rounds_up() {
        assert_eq!(workgroup_count(513, 8), 65);
        assert_eq!(workgroup_count(1, 8), 1);
        assert_eq!(workgroup_count(9, 8), 2);
    }

    #[test]
    fn three_dimensional_counts() {
        assert_eq!(workgroup_counts([512, 513, 1], [8, 8, 1]), [64, 65, 1]);
    }

    proptest! {
        /// Coverage property: the dispatch covers every cell and the
        /// previous group count would not.
        #[test]
        fn covers_without_excess(size in 1u32..100_000, wg in 1u32..1024) {
            let count = workgroup_count(size, wg);
            prop_assert!(count as u64 * wg as u64 >= size as u64);
            prop_assert!((count as u64 - 1) * (wg as u64) < size as u64);
        }
    }
}
