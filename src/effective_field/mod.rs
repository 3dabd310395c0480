// src/effective_field/mod.rs
//
// Local effective field H(i) acting on one site of the chain:
//   H(i) = H_exchange(i) + H_zeeman(i)
// Pure functions of a read-only configuration snapshot.

pub mod exchange;
pub mod zeeman;

use crate::chain::Chain;
use crate::params::SimParams;
use crate::vec3::Vec3;

/// Which contributions to include when building H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMask {
    /// Exchange only (Zeeman ignored even if the field is on).
    Exchange,
    /// Exchange + Zeeman (Zeeman only if `params.field_enabled`).
    Full,
}

/// Effective field on site `i` with a mask controlling which terms are included.
///
/// Caller guarantees `i < chain.len()` and `chain.len() >= 5`.
#[inline]
pub fn effective_field_masked(
    i: usize,
    chain: &Chain,
    params: &SimParams,
    mask: FieldMask,
) -> Vec3 {
    let h = exchange::exchange_field(i, chain, params);
    match mask {
        FieldMask::Exchange => h,
        FieldMask::Full => h + zeeman::zeeman_field(i, chain, params),
    }
}

/// Full effective field on site `i`.
#[inline]
pub fn effective_field(i: usize, chain: &Chain, params: &SimParams) -> Vec3 {
    effective_field_masked(i, chain, params, FieldMask::Full)
}
