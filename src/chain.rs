// src/chain.rs
//
// Spin chain state: fixed site positions plus one unit spin per site.
// Exchange lookups wrap around (ring); positions do not.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use crate::params::SimParams;
use crate::vec3::Vec3;

/// Mean in-plane angle of the initial random configuration.
const INIT_THETA_MEAN: f64 = 3.14;
/// Spread of the in-plane angle of the initial random configuration.
const INIT_THETA_SIGMA: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub position: f64,
    pub spin: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub sites: Vec<Site>,
}

impl Chain {
    /// Chain with every spin along `dir` (normalised).
    pub fn uniform(params: &SimParams, dir: Vec3) -> Self {
        let spin = dir.normalize();
        let spacing = params.site_spacing();
        let sites = (0..params.n_sites)
            .map(|i| Site {
                position: i as f64 * spacing,
                spin,
            })
            .collect();
        Self { sites }
    }

    /// Random in-plane configuration: θ ~ N(3.14, 1.5), S = (cos θ, sin θ, 0).
    pub fn random(params: &SimParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let spacing = params.site_spacing();
        let sites = (0..params.n_sites)
            .map(|i| {
                let z: f64 = StandardNormal.sample(&mut rng);
                let theta = INIT_THETA_MEAN + INIT_THETA_SIGMA * z;
                Site {
                    position: i as f64 * spacing,
                    spin: Vec3::new(theta.cos(), theta.sin(), 0.0),
                }
            })
            .collect();
        Self { sites }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    #[inline]
    pub fn spin(&self, i: usize) -> Vec3 {
        self.sites[i].spin
    }

    /// Circular index i + offset (mod N).
    #[inline]
    pub fn wrap(&self, i: usize, offset: isize) -> usize {
        let n = self.sites.len() as isize;
        (i as isize + offset).rem_euclid(n) as usize
    }

    /// Spin of the site `offset` steps away from `i`, wrapping around the ring.
    #[inline]
    pub fn neighbor(&self, i: usize, offset: isize) -> Vec3 {
        self.sites[self.wrap(i, offset)].spin
    }

    pub fn spins(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.sites.iter().map(|s| s.spin)
    }

    /// Transverse (z) component of every spin, in site order.
    pub fn spin_z(&self) -> Vec<f64> {
        self.sites.iter().map(|s| s.spin.z).collect()
    }

    /// Overwrite every spin from `spins` (same length as the chain).
    pub fn set_spins(&mut self, spins: &[Vec3]) {
        debug_assert_eq!(spins.len(), self.sites.len());
        for (site, &s) in self.sites.iter_mut().zip(spins) {
            site.spin = s;
        }
    }

    /// Largest deviation of |S| from 1 over the chain.
    pub fn max_norm_error(&self) -> f64 {
        self.spins()
            .map(|s| (s.norm() - 1.0).abs())
            .fold(0.0, f64::max)
    }
}
