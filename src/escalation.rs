//! Pure proxy-escalation algorithm.
//!
//! Given the bid currently standing on a listing and the set of proxy bids
//! competing for it, [`escalate`] computes which automatic bids get placed
//! and which bid ends up on top. It is a pure function of its inputs — no
//! storage, no locks, no clock — so the contest rules can be tested in
//! isolation from the engine.
//!
//! Contest rules
//! -------------
//! Every eligible proxy is ranked by raw power: higher ceiling beats lower
//! ceiling, and between equal ceilings the earlier-created proxy wins. The
//! strongest proxy takes the standing bid; everyone else is escalated to the
//! highest amount they were willing to defend against the winner. Final
//! amounts are assigned top-down:
//!
//! * winner: one increment above the runner-up's ceiling, capped at its own
//!   ceiling (so two equal ceilings drive the winner all the way to its cap),
//! * each weaker contender: one increment below the contender above it,
//!   capped at its own ceiling.
//!
//! Amounts strictly decrease down the ranking, so no two generated bids are
//! ever equal, and bids are emitted weakest-first so the ledger stays
//! strictly increasing. A proxy never bids above its ceiling, below the
//! listing floor, or against its own standing bid.

use crate::types::{Amount, ProxyBid, UserId};

/// The bid a contest starts from: either the incoming manual bid or the
/// listing's current highest bid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StandingBid {
    pub bidder: UserId,
    pub amount: Amount,
}

/// One automatic bid produced by the contest, to be appended to the ledger
/// and folded into the owning proxy's `current_bid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratedBid {
    pub bidder: UserId,
    pub amount: Amount,
}

/// Outcome of one escalation contest.
#[derive(Clone, Debug, Default)]
pub struct Escalation {
    /// Automatic bids in the order they must be appended (strictly
    /// increasing amounts; the last one is the new standing bid).
    pub generated: Vec<GeneratedBid>,
    /// The bid standing after the contest; `None` only when there was no
    /// seed bid and no proxy could open at the floor.
    pub standing: Option<StandingBid>,
}

impl Escalation {
    fn unchanged(standing: Option<StandingBid>) -> Self {
        Self {
            generated: Vec::new(),
            standing,
        }
    }
}

/// Resolve a proxy contest.
///
/// * `standing` — the seed bid (manual bid just admitted, or the listing's
///   current highest); `None` when the listing has no bids yet.
/// * `floor_price` — opening minimum when there is no standing bid.
/// * `increment` — the configured minimum step; never zero.
/// * `proxies` — every proxy on the listing; ineligible ones are filtered
///   here.
/// * `exclude` — bidder whose proxies sit this contest out entirely (the
///   manual bidder during bid admission: their own ceiling never competes
///   against their own manual bid).
pub fn escalate(
    standing: Option<StandingBid>,
    floor_price: Amount,
    increment: Amount,
    proxies: &[ProxyBid],
    exclude: Option<UserId>,
) -> Escalation {
    // Minimum amount the next bid must reach.
    let min_next = match standing {
        Some(s) => s.amount.saturating_add(increment),
        None => floor_price,
    };

    // Rank eligible contenders: strongest first.
    let mut contenders: Vec<&ProxyBid> = proxies
        .iter()
        .filter(|p| Some(p.bidder) != exclude)
        .filter(|p| p.max_amount >= min_next)
        .collect();
    if contenders.is_empty() {
        return Escalation::unchanged(standing);
    }
    contenders.sort_by(|a, b| {
        b.max_amount
            .cmp(&a.max_amount)
            .then(a.created_at.cmp(&b.created_at))
    });

    let winner = contenders[0];

    // The standing bidder's own proxy winning an uncontested ranking means
    // nothing changed: it must not outbid itself.
    if contenders.len() == 1
        && matches!(standing, Some(s) if s.bidder == winner.bidder)
    {
        return Escalation::unchanged(standing);
    }

    // Assign final amounts top-down: the winner pays one increment over the
    // runner-up's ceiling (capped at its own), every weaker contender lands
    // one increment below the contender above it (capped at its own
    // ceiling). Amounts strictly decrease down the ranking.
    let mut finals: Vec<Amount> = Vec::with_capacity(contenders.len());
    for (rank, contender) in contenders.iter().enumerate() {
        let amount = if rank == 0 {
            match contenders.get(1) {
                Some(runner_up) if runner_up.max_amount == winner.max_amount => winner.max_amount,
                Some(runner_up) => winner
                    .max_amount
                    .min(runner_up.max_amount.saturating_add(increment)),
                None => min_next,
            }
        } else {
            contender
                .max_amount
                .min(finals[rank - 1].saturating_sub(increment))
        };
        finals.push(amount);
    }

    // Emit weakest-first so the ledger stays strictly increasing. Drop
    // contenders that cannot legally reach their assigned amount.
    let mut generated = Vec::new();
    let mut baseline = standing.map(|s| s.amount);
    for (contender, &amount) in contenders.iter().zip(finals.iter()).rev() {
        if baseline.is_none() && amount < floor_price {
            continue;
        }
        if matches!(baseline, Some(b) if amount <= b) {
            continue;
        }
        if amount <= contender.current_bid {
            continue;
        }
        generated.push(GeneratedBid {
            bidder: contender.bidder,
            amount,
        });
        baseline = Some(amount);
    }

    let standing = match generated.last() {
        Some(top) => Some(StandingBid {
            bidder: top.bidder,
            amount: top.amount,
        }),
        None => standing,
    };

    Escalation { generated, standing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crate::types::ListingId;

    const INC: Amount = 1;
    const FLOOR: Amount = 100;

    fn proxy(bidder: UserId, max: Amount, age_rank: i64) -> ProxyBid {
        // Lower age_rank = created earlier.
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        ProxyBid {
            listing_id: ListingId::new(),
            bidder,
            max_amount: max,
            current_bid: 0,
            created_at: base + Duration::seconds(age_rank),
            updated_at: base + Duration::seconds(age_rank),
        }
    }

    fn standing(bidder: UserId, amount: Amount) -> Option<StandingBid> {
        Some(StandingBid { bidder, amount })
    }

    #[test]
    fn no_proxies_leaves_standing_untouched() {
        let m = UserId::new();
        let out = escalate(standing(m, 200), FLOOR, INC, &[], None);
        assert!(out.generated.is_empty());
        assert_eq!(out.standing, standing(m, 200));
    }

    #[test]
    fn single_proxy_outbids_manual_by_one_increment() {
        // Spec scenario: A holds max=500, B bids 200 manually -> A stands at 201.
        let a = UserId::new();
        let b = UserId::new();
        let out = escalate(standing(b, 200), FLOOR, INC, &[proxy(a, 500, 0)], None);
        assert_eq!(out.generated, vec![GeneratedBid { bidder: a, amount: 201 }]);
        assert_eq!(out.standing, standing(a, 201));
    }

    #[test]
    fn manual_bid_above_every_ceiling_stands() {
        let a = UserId::new();
        let b = UserId::new();
        let out = escalate(standing(b, 600), FLOOR, INC, &[proxy(a, 500, 0)], None);
        assert!(out.generated.is_empty());
        assert_eq!(out.standing, standing(b, 600));
    }

    #[test]
    fn higher_ceiling_wins_at_runner_up_cap_plus_increment() {
        let a = UserId::new();
        let c = UserId::new();
        let m = UserId::new();
        let out = escalate(
            standing(m, 100),
            FLOOR,
            INC,
            &[proxy(a, 500, 0), proxy(c, 300, 1)],
            None,
        );
        assert_eq!(
            out.generated,
            vec![
                GeneratedBid { bidder: c, amount: 300 },
                GeneratedBid { bidder: a, amount: 301 },
            ]
        );
        assert_eq!(out.standing, standing(a, 301));
    }

    #[test]
    fn equal_ceilings_tie_break_on_creation_time() {
        // First-created proxy ends at its own cap, the later one exactly one
        // increment below; no two amounts collide.
        let first = UserId::new();
        let later = UserId::new();
        let m = UserId::new();
        let out = escalate(
            standing(m, 200),
            FLOOR,
            INC,
            &[proxy(later, 500, 5), proxy(first, 500, 1)],
            None,
        );
        assert_eq!(
            out.generated,
            vec![
                GeneratedBid { bidder: later, amount: 499 },
                GeneratedBid { bidder: first, amount: 500 },
            ]
        );
        assert_eq!(out.standing, standing(first, 500));
    }

    #[test]
    fn three_way_contest_keeps_amounts_distinct_and_increasing() {
        let a = UserId::new();
        let b = UserId::new();
        let d = UserId::new();
        let m = UserId::new();
        let out = escalate(
            standing(m, 100),
            FLOOR,
            INC,
            &[proxy(a, 500, 0), proxy(b, 500, 1), proxy(d, 300, 2)],
            None,
        );
        assert_eq!(
            out.generated,
            vec![
                GeneratedBid { bidder: d, amount: 300 },
                GeneratedBid { bidder: b, amount: 499 },
                GeneratedBid { bidder: a, amount: 500 },
            ]
        );
        // Strictly increasing, all within caps.
        let amounts: Vec<_> = out.generated.iter().map(|g| g.amount).collect();
        assert!(amounts.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(out.standing, standing(a, 500));
    }

    #[test]
    fn excluded_bidder_never_competes_against_themselves() {
        // The manual bidder's own ceiling sits the contest out.
        let m = UserId::new();
        let out = escalate(standing(m, 200), FLOOR, INC, &[proxy(m, 900, 0)], Some(m));
        assert!(out.generated.is_empty());
        assert_eq!(out.standing, standing(m, 200));
    }

    #[test]
    fn proxy_opens_at_floor_on_bidless_listing() {
        let a = UserId::new();
        let out = escalate(None, FLOOR, INC, &[proxy(a, 500, 0)], None);
        assert_eq!(
            out.generated,
            vec![GeneratedBid { bidder: a, amount: FLOOR }]
        );
        assert_eq!(out.standing, standing(a, FLOOR));
    }

    #[test]
    fn two_proxies_on_bidless_listing_contest_from_the_floor() {
        let a = UserId::new();
        let c = UserId::new();
        let out = escalate(None, FLOOR, INC, &[proxy(a, 500, 0), proxy(c, 300, 1)], None);
        assert_eq!(
            out.generated,
            vec![
                GeneratedBid { bidder: c, amount: 300 },
                GeneratedBid { bidder: a, amount: 301 },
            ]
        );
    }

    #[test]
    fn below_minimum_ceiling_is_inert() {
        let a = UserId::new();
        let m = UserId::new();
        let out = escalate(standing(m, 200), FLOOR, INC, &[proxy(a, 150, 0)], None);
        assert!(out.generated.is_empty());
        assert_eq!(out.standing, standing(m, 200));
    }

    #[test]
    fn standing_owner_proxy_never_outbids_itself() {
        // The highest bidder raising their own ceiling changes nothing
        // until someone challenges it.
        let q = UserId::new();
        let out = escalate(standing(q, 200), FLOOR, INC, &[proxy(q, 800, 0)], None);
        assert!(out.generated.is_empty());
        assert_eq!(out.standing, standing(q, 200));
    }

    #[test]
    fn standing_owner_proxy_defends_against_challenger() {
        // Q stands at 200 with ceiling 800; a new proxy P at 300 challenges.
        // P is pushed to its cap, Q defends one increment above it.
        let q = UserId::new();
        let p = UserId::new();
        let mut q_proxy = proxy(q, 800, 0);
        q_proxy.current_bid = 200;
        let out = escalate(
            standing(q, 200),
            FLOOR,
            INC,
            &[q_proxy, proxy(p, 300, 1)],
            None,
        );
        assert_eq!(
            out.generated,
            vec![
                GeneratedBid { bidder: p, amount: 300 },
                GeneratedBid { bidder: q, amount: 301 },
            ]
        );
        assert_eq!(out.standing, standing(q, 301));
    }

    #[test]
    fn generated_bids_never_exceed_ceilings() {
        let bidders: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
        let caps = [350u64, 275, 900, 901];
        let proxies: Vec<ProxyBid> = bidders
            .iter()
            .zip(caps.iter())
            .enumerate()
            .map(|(i, (b, &cap))| proxy(*b, cap, i as i64))
            .collect();
        let m = UserId::new();
        let out = escalate(standing(m, 120), FLOOR, INC, &proxies, None);
        for bid in &out.generated {
            let cap = proxies
                .iter()
                .find(|p| p.bidder == bid.bidder)
                .map(|p| p.max_amount)
                .unwrap();
            assert!(bid.amount <= cap, "bid {} over cap {}", bid.amount, cap);
        }
        // Highest ceiling wins, one increment above the runner-up cap.
        assert_eq!(out.standing, standing(bidders[3], 901));
    }
}
