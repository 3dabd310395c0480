// src/llg.rs
//
// Damped precession (Landau–Lifshitz form) for the spin chain:
//
//   dS/dt = -γ S × H  -  γ α(i) S × (S × H),     γ = 1/ħ
//
// Integrated with Heun's predictor–corrector. Each pass reads a fixed snapshot and
// writes only its own slot, so results do not depend on the number of rayon workers.
//
// α(i) carries a quadratic "sponge" near both chain ends to absorb outgoing waves.

use rayon::prelude::*;

use crate::chain::Chain;
use crate::effective_field::effective_field;
use crate::params::{SimParams, MAX_SPONGE_DAMPING};
use crate::vec3::Vec3;

/// Per-site damping: base damping everywhere, plus a quadratic ramp up to
/// `MAX_SPONGE_DAMPING` within `sponge_width` sites of either end.
///
/// The left branch is tested first, so on short chains it wins where the two overlap.
pub fn damping_profile(params: &SimParams) -> Vec<f64> {
    let n = params.n_sites;
    let base = params.damping;
    let w = params.sponge_width;

    if w == 0 {
        return vec![base; n];
    }

    let ramp = |closeness: f64| base + MAX_SPONGE_DAMPING * (1.0 - closeness).powi(2);

    (0..n)
        .map(|i| {
            if i <= w {
                ramp(i as f64 / w as f64)
            } else if i + w >= n {
                ramp((n - 1 - i) as f64 / w as f64)
            } else {
                base
            }
        })
        .collect()
}

/// RHS of the damped precession equation for one spin.
#[inline]
pub fn llg_rhs(s: Vec3, h: Vec3, gamma: f64, alpha: f64) -> Vec3 {
    let s_cross_h = s.cross(h);
    let precession = s_cross_h * (-gamma);
    let damping = s.cross(s_cross_h) * (-gamma * alpha);
    precession + damping
}

/// Reusable buffers for `step_heun`.
///
/// The damping profile is cached and rebuilt only when N, the base damping or the
/// sponge width change.
#[derive(Debug, Clone)]
pub struct HeunScratch {
    predicted: Chain,
    dsdt: Vec<Vec3>,
    next: Vec<Vec3>,
    profile: Vec<f64>,
    profile_key: (usize, u64, usize),
}

impl HeunScratch {
    pub fn new(params: &SimParams) -> Self {
        Self {
            predicted: Chain { sites: Vec::new() },
            dsdt: Vec::new(),
            next: Vec::new(),
            profile: damping_profile(params),
            profile_key: Self::key(params),
        }
    }

    fn key(params: &SimParams) -> (usize, u64, usize) {
        (params.n_sites, params.damping.to_bits(), params.sponge_width)
    }

    fn prepare(&mut self, chain: &Chain, params: &SimParams) {
        let key = Self::key(params);
        if key != self.profile_key || self.profile.len() != chain.len() {
            self.profile = damping_profile(params);
            self.profile_key = key;
        }
        let n = chain.len();
        self.predicted.sites.clone_from(&chain.sites);
        self.dsdt.resize(n, Vec3::ZERO);
        self.next.resize(n, Vec3::ZERO);
    }

    /// Damping profile used for the most recent step.
    pub fn profile(&self) -> &[f64] {
        &self.profile
    }
}

/// Advance every spin by one Heun step of size `params.dt`.
pub fn step_heun(chain: &mut Chain, params: &SimParams, scratch: &mut HeunScratch) {
    scratch.prepare(chain, params);

    let gamma = params.gamma();
    let dt = params.dt;

    let HeunScratch {
        predicted,
        dsdt,
        next,
        profile,
        ..
    } = scratch;
    let profile: &[f64] = profile;

    // Predictor: derivative on the current snapshot, Euler guess for every site.
    {
        let snapshot: &Chain = chain;
        predicted
            .sites
            .par_iter_mut()
            .zip(dsdt.par_iter_mut())
            .enumerate()
            .for_each(|(i, (pred, d))| {
                let s = snapshot.spin(i);
                let h = effective_field(i, snapshot, params);
                let k1 = llg_rhs(s, h, gamma, profile[i]);
                *d = k1;
                pred.spin = (s + k1 * dt).normalize();
            });
    }

    // Corrector: derivative on the predicted snapshot, averaged with the predictor slope.
    {
        let predicted: &Chain = predicted;
        let current: &Chain = chain;
        let dsdt: &[Vec3] = dsdt;
        next.par_iter_mut().enumerate().for_each(|(i, out)| {
            let p = predicted.spin(i);
            let h = effective_field(i, predicted, params);
            let k2 = llg_rhs(p, h, gamma, profile[i]);
            let avg = (dsdt[i] + k2) * 0.5;
            *out = (current.spin(i) + avg * dt).normalize();
        });
    }

    // Commit as one batch.
    chain.set_spins(next);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sponge_profile_is_symmetric_and_peaks_at_the_ends() {
        let p = SimParams {
            n_sites: 40,
            damping: 0.01,
            sponge_width: 5,
            ..SimParams::default()
        };
        let a = damping_profile(&p);
        assert_eq!(a.len(), 40);
        assert!((a[0] - (0.01 + MAX_SPONGE_DAMPING)).abs() < 1e-12);
        assert!((a[39] - (0.01 + MAX_SPONGE_DAMPING)).abs() < 1e-12);
        // i = w is the first site with no extra damping
        assert!((a[5] - 0.01).abs() < 1e-12);
        assert!((a[20] - 0.01).abs() < 1e-12);
        for i in 0..40 {
            assert!((a[i] - a[39 - i]).abs() < 1e-12, "asymmetric at {}", i);
        }
        // quadratic: halfway into the sponge adds a quarter of the max
        let p2 = SimParams {
            sponge_width: 4,
            ..p
        };
        let b = damping_profile(&p2);
        assert!((b[2] - (0.01 + 0.25 * MAX_SPONGE_DAMPING)).abs() < 1e-12);
    }

    #[test]
    fn zero_sponge_width_gives_flat_profile() {
        let p = SimParams {
            sponge_width: 0,
            damping: 0.3,
            ..SimParams::default()
        };
        assert!(damping_profile(&p).iter().all(|&a| a == 0.3));
    }

    #[test]
    fn rhs_vanishes_for_parallel_spin_and_field() {
        let d = llg_rhs(Vec3::Z, Vec3::Z * 3.0, 1.5, 0.2);
        assert_eq!(d, Vec3::ZERO);
    }

    #[test]
    fn damping_term_pulls_spin_towards_field() {
        // S along x, H along z: damping component of dS/dt must point along +z.
        let d = llg_rhs(Vec3::X, Vec3::Z, 1.0, 0.5);
        assert!(d.z > 0.0);
        // precession about +z with the -γ S×H sign moves +x towards +y
        assert!(d.y > 0.0);
    }

    #[test]
    fn step_keeps_unit_norm() {
        let p = SimParams {
            n_sites: 16,
            ..SimParams::default()
        };
        let mut c = Chain::random(&p, 3);
        let mut scratch = HeunScratch::new(&p);
        for _ in 0..200 {
            step_heun(&mut c, &p, &mut scratch);
            assert!(c.max_norm_error() < 1e-10);
        }
    }

    #[test]
    fn scratch_refreshes_profile_when_damping_changes() {
        let mut p = SimParams::default();
        let mut c = Chain::random(&p, 1);
        let mut scratch = HeunScratch::new(&p);
        step_heun(&mut c, &p, &mut scratch);
        assert!((scratch.profile()[5] - 0.4).abs() < 1e-12);

        p.damping = 0.0005;
        step_heun(&mut c, &p, &mut scratch);
        assert!((scratch.profile()[5] - 0.0005).abs() < 1e-12);
    }
}
