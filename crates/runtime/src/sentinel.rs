//! Reserved constant-pool indices.
//!
//! Reserved indices above the maximum real constant-pool index. Their numeric values
//! are part of the bytecode ABI and must match the executing VM's expectations. They
//! live in `lumen-runtime` rather than the compiler crate because both the compiler
//! (emitting `LOADK` of these indices for `null`/`true`/`false`/`undefined`/`_func`/
//! `_args` keyword expressions) and a future VM need to agree on the exact values
//! without either depending on the other's internals.

/// Constant-pool index is wire-encoded in 18 bits.
pub const MAX_CPOOL_INDEX: u32 = (1 << 18) - 1;

pub const NULL_TAG: u32 = MAX_CPOOL_INDEX;
pub const TRUE_TAG: u32 = MAX_CPOOL_INDEX - 1;
pub const FALSE_TAG: u32 = MAX_CPOOL_INDEX - 2;
pub const UNDEFINED_TAG: u32 = MAX_CPOOL_INDEX - 3;
pub const ARGUMENTS_TAG: u32 = MAX_CPOOL_INDEX - 4;
pub const FUNC_TAG: u32 = MAX_CPOOL_INDEX - 5;

/// First index a real (non-reserved) constant pool entry may occupy without colliding
/// with a sentinel above. A function whose constant pool grows past this without
/// finalizing should be rejected the same way register/local overflow is.
pub const LAST_REAL_CPOOL_INDEX: u32 = FUNC_TAG - 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct_and_above_real_range() {
        let tags = [
            NULL_TAG,
            TRUE_TAG,
            FALSE_TAG,
            UNDEFINED_TAG,
            ARGUMENTS_TAG,
            FUNC_TAG,
        ];
        for (i, a) in tags.iter().enumerate() {
            for b in &tags[i + 1..] {
                assert_ne!(a, b);
            }
            assert!(*a > LAST_REAL_CPOOL_INDEX);
        }
    }
}
