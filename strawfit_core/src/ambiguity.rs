//! Left/right ambiguity resolution.
//!
//! A straw measures a drift distance, not the side of the wire the track
//! passed on. Each annealing stage is bound to one resolver which assigns
//! the sign of every active hit before the stage refits.
//!
//! # Strategies
//!
//! - **Fixed**: keeps the input ambiguities
//! - **Hit**: per hit, from the trajectory prediction with the hit removed
//! - **Panel**: jointly for all hits of a panel, allowing a common offset
//! - **Poca**: the sign of the plain closest approach
//!
//! All strategies depend only on the trajectory and the hit measurements, so
//! resolving twice without a refit gives the same assignment.

use std::collections::BTreeMap;

use strawfit_env::PanelId;
use tracing::trace;

use crate::config::{AmbigParams, AmbigStrategy};
use crate::fit_result::FitResult;
use crate::hit::TrackHit;
use crate::kalrep::KalRep;

/// Ambiguity resolver bound to one annealing stage.
#[derive(Debug, Clone, PartialEq)]
pub enum AmbigResolver {
    Fixed,
    Hit {
        min_drift: f64,
    },
    Panel {
        min_drift: f64,
        max_panel_hits: usize,
        panel_track_error: f64,
    },
    Poca,
}

impl AmbigResolver {
    pub fn new(strategy: AmbigStrategy, params: &AmbigParams) -> Self {
        match strategy {
            AmbigStrategy::Fixed => Self::Fixed,
            AmbigStrategy::Hit => Self::Hit {
                min_drift: params.min_drift,
            },
            AmbigStrategy::Panel => Self::Panel {
                min_drift: params.min_drift,
                max_panel_hits: params.max_panel_hits,
                panel_track_error: params.panel_track_error,
            },
            AmbigStrategy::Poca => Self::Poca,
        }
    }

    pub fn strategy(&self) -> AmbigStrategy {
        match self {
            Self::Fixed => AmbigStrategy::Fixed,
            Self::Hit { .. } => AmbigStrategy::Hit,
            Self::Panel { .. } => AmbigStrategy::Panel,
            Self::Poca => AmbigStrategy::Poca,
        }
    }

    /// Assigns the ambiguity of every active hit of `result`.
    pub fn resolve(&self, result: &mut FitResult) {
        let krep = result.krep.as_ref();
        let hits = &mut result.hits;
        match self {
            Self::Fixed => {}
            Self::Hit { min_drift } => resolve_hits(hits, krep, *min_drift),
            Self::Panel {
                min_drift,
                max_panel_hits,
                panel_track_error,
            } => resolve_panels(hits, krep, *min_drift, *max_panel_hits, *panel_track_error),
            Self::Poca => {
                for hit in hits.iter_mut().filter(|h| h.active) {
                    if let Some(poca) = hit.poca() {
                        let ambig = sign_of(poca.doca);
                        hit.set_ambig(ambig);
                    }
                }
            }
        }
    }
}

/// Sign as an ambiguity; exactly zero maps to 0.
pub(crate) fn sign_of(x: f64) -> i32 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Best estimate of the trajectory DOCA at a hit, unbiased by the hit itself
/// when a valid fit exists.
fn doca_estimate(krep: Option<&KalRep>, pos: usize, hit: &TrackHit) -> Option<f64> {
    match krep.filter(|k| k.fit_valid()) {
        Some(k) => k.excluded_doca(pos, hit),
        None => hit.poca().map(|p| p.doca),
    }
}

fn resolve_hit(hit: &mut TrackHit, doca: f64, min_drift: f64) {
    if doca.abs() < min_drift {
        hit.set_ambig(0);
    } else {
        hit.set_ambig(sign_of(doca));
    }
}

fn resolve_hits(hits: &mut [TrackHit], krep: Option<&KalRep>, min_drift: f64) {
    for pos in 0..hits.len() {
        if !hits[pos].active {
            continue;
        }
        if let Some(doca) = doca_estimate(krep, pos, &hits[pos]) {
            resolve_hit(&mut hits[pos], doca, min_drift);
        }
    }
}

/// One hit of a panel being resolved.
struct PanelHit {
    pos: usize,
    doca: f64,
    radius: f64,
    var: f64,
    free: bool,
}

fn resolve_panels(
    hits: &mut [TrackHit],
    krep: Option<&KalRep>,
    min_drift: f64,
    max_panel_hits: usize,
    panel_track_error: f64,
) {
    let mut panels: BTreeMap<PanelId, Vec<PanelHit>> = BTreeMap::new();
    for (pos, hit) in hits.iter().enumerate() {
        if !hit.active {
            continue;
        }
        let Some(doca) = doca_estimate(krep, pos, hit) else {
            continue;
        };
        let radius = hit.drift().radius;
        panels.entry(hit.straw.panel).or_default().push(PanelHit {
            pos,
            doca,
            radius,
            var: hit.drift().radius_err.powi(2) + hit.ext_err.powi(2),
            free: radius >= min_drift,
        });
    }

    let track_var = panel_track_error * panel_track_error;
    for (panel, members) in panels {
        if members.len() > max_panel_hits {
            trace!("Panel {} has {} hits, resolving per hit", panel, members.len());
            for m in &members {
                resolve_hit(&mut hits[m.pos], m.doca, min_drift);
            }
            continue;
        }

        let free: Vec<&PanelHit> = members.iter().filter(|m| m.free).collect();
        let mut best: Option<(f64, u32)> = None;
        for mask in 0..(1u32 << free.len()) {
            let chisq = panel_chisq(&members, mask, track_var);
            if best.map_or(true, |(b, _)| chisq < b) {
                best = Some((chisq, mask));
            }
        }
        let Some((_, mask)) = best else {
            continue;
        };

        let mut bit = 0;
        for m in &members {
            if m.free {
                let ambig = if mask & (1 << bit) != 0 { 1 } else { -1 };
                hits[m.pos].set_ambig(ambig);
                bit += 1;
            } else {
                hits[m.pos].set_ambig(0);
            }
        }
    }
}

/// χ² of a panel for one assignment of the free hits, after fitting a
/// common offset constrained by the track error.
fn panel_chisq(members: &[PanelHit], mask: u32, track_var: f64) -> f64 {
    let mut bit = 0;
    let resid: Vec<(f64, f64)> = members
        .iter()
        .map(|m| {
            if m.free {
                let ambig = if mask & (1 << bit) != 0 { 1.0 } else { -1.0 };
                bit += 1;
                (m.doca - ambig * m.radius, m.var)
            } else {
                (m.doca, m.var + m.radius * m.radius)
            }
        })
        .collect();

    let sum_w: f64 = resid.iter().map(|(_, v)| 1.0 / v).sum();
    let sum_wr: f64 = resid.iter().map(|(r, v)| r / v).sum();
    let offset = sum_wr / (sum_w + 1.0 / track_var);

    resid.iter().map(|(r, v)| (r - offset).powi(2) / v).sum::<f64>() + offset * offset / track_var
}
