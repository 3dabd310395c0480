// src/energy.rs
//
// Total magnetic energy of a chain configuration (meV):
//
//   E = Σ_i [ J1 S_i·S_{i+1} + J2 S_i·S_{i+2} ]  -  (field on ? B Σ_i S_i·z : 0)
//
// Neighbours wrap around the ring. The Zeeman sum runs over every site; unlike the
// effective field it has no spatial window.
// The sum is a parallel reduction, so compare energies with a tolerance.

use rayon::prelude::*;

use crate::chain::Chain;
use crate::params::SimParams;

/// Energy split into its two contributions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyBreakdown {
    pub exchange: f64,
    pub zeeman: f64,
}

impl EnergyBreakdown {
    #[inline]
    pub fn total(&self) -> f64 {
        self.exchange + self.zeeman
    }
}

pub fn compute_energy(chain: &Chain, params: &SimParams) -> EnergyBreakdown {
    let field = if params.field_enabled {
        params.external_field
    } else {
        0.0
    };

    (0..chain.len())
        .into_par_iter()
        .map(|i| {
            let s = chain.spin(i);
            let exchange =
                params.j1 * s.dot(chain.neighbor(i, 1)) + params.j2 * s.dot(chain.neighbor(i, 2));
            EnergyBreakdown {
                exchange,
                zeeman: -field * s.z,
            }
        })
        .reduce(EnergyBreakdown::default, |a, b| EnergyBreakdown {
            exchange: a.exchange + b.exchange,
            zeeman: a.zeeman + b.zeeman,
        })
}

/// Total energy (meV).
pub fn compute_total_energy(chain: &Chain, params: &SimParams) -> f64 {
    compute_energy(chain, params).total()
}

/// Energies are reduction-order dependent; never compare them exactly.
#[inline]
pub fn energies_close(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec3::Vec3;

    #[test]
    fn ferromagnetic_chain_energy_is_n_times_couplings() {
        let p = SimParams {
            n_sites: 12,
            j1: -1.6,
            j2: 0.44,
            ..SimParams::default()
        };
        let c = Chain::uniform(&p, Vec3::X);
        let e = compute_total_energy(&c, &p);
        assert!(energies_close(e, 12.0 * (-1.6 + 0.44), 1e-12), "got {}", e);
    }

    #[test]
    fn zeeman_energy_counts_every_site_when_field_on() {
        let mut p = SimParams {
            n_sites: 8,
            j1: 0.0,
            j2: 0.0,
            external_field: 2.0,
            ..SimParams::default()
        };
        let c = Chain::uniform(&p, Vec3::Z);
        assert_eq!(compute_total_energy(&c, &p), 0.0);

        p.field_enabled = true;
        let e = compute_energy(&c, &p);
        assert!(energies_close(e.zeeman, -16.0, 1e-12));
        assert_eq!(e.exchange, 0.0);
    }

    #[test]
    fn antiparallel_neighbours_flip_nearest_exchange_sign() {
        let p = SimParams {
            n_sites: 6,
            j1: 1.0,
            j2: 0.0,
            ..SimParams::default()
        };
        let mut c = Chain::uniform(&p, Vec3::Z);
        let spins: Vec<Vec3> = (0..6)
            .map(|i| if i % 2 == 0 { Vec3::Z } else { -Vec3::Z })
            .collect();
        c.set_spins(&spins);
        assert!(energies_close(compute_total_energy(&c, &p), -6.0, 1e-12));
    }
}
