// src/effective_field/zeeman.rs

use crate::chain::Chain;
use crate::params::{SimParams, FIELD_CENTRE};
use crate::vec3::Vec3;

/// True if site `i` lies inside the applied-field window |x - centre| <= radius.
/// The window depends on absolute position only; it does not wrap.
#[inline]
pub fn in_field_window(i: usize, chain: &Chain, params: &SimParams) -> bool {
    let x = chain.sites[i].position;
    x >= FIELD_CENTRE - params.field_radius && x <= FIELD_CENTRE + params.field_radius
}

/// Zeeman contribution g * mu_B * B along +z, inside the field window and only while the
/// field is switched on.
#[inline]
pub fn zeeman_field(i: usize, chain: &Chain, params: &SimParams) -> Vec3 {
    if params.field_enabled && in_field_window(i, chain, params) {
        Vec3::Z * params.zeeman_strength()
    } else {
        Vec3::ZERO
    }
}
