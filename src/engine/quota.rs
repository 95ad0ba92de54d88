//! Fair-share quota calculation.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::{ReviewerId, RoundId};

/// Additional assignments each reviewer should receive so that final loads
/// differ by at most one.
///
/// `workloads` holds each target reviewer's existing load; `eligible_work`
/// is the number of assignments to hand out. Reviewers already above the
/// fair share get zero and the share is recomputed over the rest, so the
/// quotas always sum to `eligible_work`. Remainder units go to the smallest
/// quotas first, ties by reviewer ID.
pub fn compute_quotas(
    round_id: RoundId,
    eligible_work: u64,
    workloads: &[(ReviewerId, u64)],
) -> Result<BTreeMap<ReviewerId, u64>> {
    if workloads.is_empty() {
        return Err(Error::InsufficientReviewers { round_id });
    }

    let mut sorted: Vec<(ReviewerId, u64)> = workloads.to_vec();
    sorted.sort_by_key(|&(id, load)| (load, id));

    let mut quotas: BTreeMap<ReviewerId, u64> = sorted.iter().map(|&(id, _)| (id, 0)).collect();

    // Drop the heaviest reviewer while it sits above the current share.
    let mut active = sorted.len();
    let mut total: u64 = sorted.iter().map(|&(_, load)| load).sum::<u64>() + eligible_work;
    let share = loop {
        let share = total / active as u64;
        let (_, heaviest) = sorted[active - 1];
        if heaviest <= share || active == 1 {
            break share;
        }
        total -= heaviest;
        active -= 1;
    };
    let remainder = total - share * active as u64;

    let mut assigned: Vec<(u64, ReviewerId)> = sorted[..active]
        .iter()
        .map(|&(id, load)| (share - load, id))
        .collect();
    assigned.sort();
    for (i, (quota, id)) in assigned.into_iter().enumerate() {
        let bonus = u64::from((i as u64) < remainder);
        quotas.insert(id, quota + bonus);
    }

    Ok(quotas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn reviewer(n: u128) -> ReviewerId {
        ReviewerId(Uuid::from_u128(n))
    }

    #[test]
    fn even_split_from_zero() {
        let quotas = compute_quotas(
            RoundId::new(),
            6,
            &[(reviewer(1), 0), (reviewer(2), 0), (reviewer(3), 0)],
        )
        .unwrap();
        assert_eq!(quotas.values().copied().collect::<Vec<_>>(), vec![2, 2, 2]);
    }

    #[test]
    fn remainder_goes_to_lowest_ids_on_ties() {
        let quotas = compute_quotas(
            RoundId::new(),
            5,
            &[(reviewer(3), 0), (reviewer(1), 0), (reviewer(2), 0)],
        )
        .unwrap();
        assert_eq!(quotas[&reviewer(1)], 2);
        assert_eq!(quotas[&reviewer(2)], 2);
        assert_eq!(quotas[&reviewer(3)], 1);
    }

    #[test]
    fn overloaded_reviewer_gets_nothing_and_sum_is_exact() {
        let workloads = [(reviewer(1), 10), (reviewer(2), 0), (reviewer(3), 1)];
        let quotas = compute_quotas(RoundId::new(), 4, &workloads).unwrap();
        assert_eq!(quotas[&reviewer(1)], 0);
        assert_eq!(quotas.values().sum::<u64>(), 4);
        let finals: Vec<u64> = workloads[1..]
            .iter()
            .map(|(id, load)| load + quotas[id])
            .collect();
        assert!(finals.iter().max().unwrap() - finals.iter().min().unwrap() <= 1);
    }

    #[test]
    fn no_reviewers_is_an_error() {
        let err = compute_quotas(RoundId::new(), 3, &[]).unwrap_err();
        assert!(matches!(err, Error::InsufficientReviewers { .. }));
    }

    #[test]
    fn zero_work_yields_zero_quotas() {
        let quotas = compute_quotas(RoundId::new(), 0, &[(reviewer(1), 3), (reviewer(2), 5)]).unwrap();
        assert!(quotas.values().all(|&q| q == 0));
    }
}
