// src/effective_field/exchange.rs

use crate::chain::Chain;
use crate::params::SimParams;
use crate::vec3::Vec3;

/// Heisenberg exchange field with nearest (J1) and next-nearest (J2) neighbours:
///   H_ex(i) = -J1 (S[i-1] + S[i+1]) - J2 (S[i-2] + S[i+2])
/// Neighbour indices wrap around the chain (ring).
#[inline]
pub fn exchange_field(i: usize, chain: &Chain, params: &SimParams) -> Vec3 {
    let nn = chain.neighbor(i, -1) + chain.neighbor(i, 1);
    let nnn = chain.neighbor(i, -2) + chain.neighbor(i, 2);
    nn * (-params.j1) + nnn * (-params.j2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_zero_of_five_uses_wrapped_neighbours() {
        let p = SimParams {
            n_sites: 5,
            j1: 1.0,
            j2: 10.0,
            ..SimParams::default()
        };
        let mut c = Chain::uniform(&p, Vec3::Z);
        // Tag each site with a distinct x component so the sum identifies who was read.
        let spins: Vec<Vec3> = (0..5)
            .map(|k| Vec3::new(10f64.powi(k as i32), 0.0, 0.0))
            .collect();
        c.set_spins(&spins);

        let h = exchange_field(0, &c, &p);
        // nearest: sites 4 and 1 -> 10^4 + 10^1 ; next-nearest: sites 3 and 2 -> 10^3 + 10^2
        let expected = -(1.0 * (1e4 + 1e1)) - 10.0 * (1e3 + 1e2);
        assert!((h.x - expected).abs() < 1e-9, "got {}, expected {}", h.x, expected);
    }
}
