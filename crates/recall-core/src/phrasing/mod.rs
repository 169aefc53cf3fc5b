//! Choosing which phrasing of a concept to present.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::PhrasingConfig;
use crate::types::Phrasing;

/// Why a phrasing was (or was not) chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SelectionReason {
    /// The concept's designated phrasing.
    Canonical,
    /// Fewest attempts, then oldest attempt, then creation order.
    LeastSeen,
    /// Uniform pick.
    Random,
    /// No active phrasing; the concept must not be presented.
    None,
}

/// Result of [`select_phrasing`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhrasingSelection<'a> {
    pub phrasing: Option<&'a Phrasing>,
    pub reason: SelectionReason,
}

/// Pick one phrasing among `variants`.
///
/// Inactive variants are ignored. A canonical id that does not resolve to an
/// active variant falls through to the configured policy.
pub fn select_phrasing<'a, R: Rng + ?Sized>(
    variants: &'a [Phrasing],
    canonical_phrasing_id: Option<&str>,
    config: &PhrasingConfig,
    rng: &mut R,
) -> PhrasingSelection<'a> {
    let active: Vec<&Phrasing> = variants.iter().filter(|p| p.is_active()).collect();

    if active.is_empty() {
        return PhrasingSelection {
            phrasing: None,
            reason: SelectionReason::None,
        };
    }

    if let Some(canonical) =
        canonical_phrasing_id.and_then(|id| active.iter().copied().find(|p| p.id == id))
    {
        return PhrasingSelection {
            phrasing: Some(canonical),
            reason: SelectionReason::Canonical,
        };
    }

    if !config.prefer_least_seen {
        return PhrasingSelection {
            phrasing: active.choose(rng).copied(),
            reason: SelectionReason::Random,
        };
    }

    // `None` sorts before any timestamp: never-attempted comes first.
    let least_seen = active
        .into_iter()
        .min_by_key(|p| (p.attempt_count, p.last_attempted_at, p.creation_order));

    PhrasingSelection {
        phrasing: least_seen,
        reason: SelectionReason::LeastSeen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Concept;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn variants(counts: &[u32]) -> Vec<Phrasing> {
        let now = Utc::now();
        let concept = Concept::new("alice", "Osmosis", now);
        counts
            .iter()
            .enumerate()
            .map(|(i, count)| {
                let mut p = Phrasing::new(&concept, format!("variant {}", i), i as u32, now);
                p.attempt_count = *count;
                if *count > 0 {
                    p.last_attempted_at = Some(now - Duration::hours(i as i64));
                }
                p
            })
            .collect()
    }

    #[test]
    fn test_least_seen_picks_unseen() {
        let v = variants(&[10, 1, 0]);
        let mut rng = StdRng::seed_from_u64(0);
        let selection = select_phrasing(&v, None, &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.reason, SelectionReason::LeastSeen);
        assert_eq!(selection.phrasing.unwrap().id, v[2].id);
    }

    #[test]
    fn test_canonical_overrides_counts() {
        let v = variants(&[10, 1, 0]);
        let mut rng = StdRng::seed_from_u64(0);
        let selection = select_phrasing(&v, Some(&v[0].id), &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.reason, SelectionReason::Canonical);
        assert_eq!(selection.phrasing.unwrap().id, v[0].id);
    }

    #[test]
    fn test_inactive_canonical_falls_through() {
        let mut v = variants(&[10, 1, 0]);
        v[0].archived_at = Some(Utc::now());
        let mut rng = StdRng::seed_from_u64(0);
        let selection = select_phrasing(&v, Some(&v[0].id), &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.reason, SelectionReason::LeastSeen);
        assert_eq!(selection.phrasing.unwrap().id, v[2].id);
    }

    #[test]
    fn test_ties_break_on_last_attempt_then_creation_order() {
        let mut v = variants(&[2, 2, 2]);
        // variant 1 attempted earliest.
        v[1].last_attempted_at = Some(Utc::now() - Duration::days(3));
        let mut rng = StdRng::seed_from_u64(0);
        let selection = select_phrasing(&v, None, &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.phrasing.unwrap().id, v[1].id);

        let v = variants(&[0, 0, 0]);
        let selection = select_phrasing(&v, None, &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.phrasing.unwrap().id, v[0].id);
    }

    #[test]
    fn test_random_uses_injected_rng() {
        let v = variants(&[5, 5, 5, 5, 5]);
        let config = PhrasingConfig {
            prefer_least_seen: false,
        };

        let a = select_phrasing(&v, None, &config, &mut StdRng::seed_from_u64(11));
        let b = select_phrasing(&v, None, &config, &mut StdRng::seed_from_u64(11));
        assert_eq!(a.reason, SelectionReason::Random);
        assert_eq!(a.phrasing.unwrap().id, b.phrasing.unwrap().id);
    }

    #[test]
    fn test_no_active_variants() {
        let mut v = variants(&[1, 2]);
        let now = Utc::now();
        v[0].deleted_at = Some(now);
        v[1].archived_at = Some(now);

        let mut rng = StdRng::seed_from_u64(0);
        let selection = select_phrasing(&v, Some(&v[0].id), &PhrasingConfig::default(), &mut rng);
        assert_eq!(selection.reason, SelectionReason::None);
        assert!(selection.phrasing.is_none());
        assert!(select_phrasing(&[], None, &PhrasingConfig::default(), &mut rng)
            .phrasing
            .is_none());
    }
}
