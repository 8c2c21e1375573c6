use crate::core::filters::is_compatible;
use crate::models::{Buyer, Listing, MatchOutcome};
use std::collections::BTreeSet;

/// Computes the desired relationship set for an anchor entity against the
/// tenant's counterpart population.
///
/// Pure and side-effect free: the caller supplies the candidate population
/// and commits the result to the local relation cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct Matcher;

impl Matcher {
    pub fn new() -> Self {
        Self
    }

    /// Desired buyer ids for a listing anchor.
    pub fn desired_buyers_for_listing(&self, listing: &Listing, candidates: &[Buyer]) -> MatchOutcome {
        let total_candidates = candidates.len();
        let desired: BTreeSet<String> = candidates
            .iter()
            .filter(|buyer| is_compatible(listing, buyer))
            .map(|buyer| buyer.external_id.clone())
            .collect();

        tracing::debug!(
            tenant_id = %listing.tenant_id,
            listing_id = %listing.external_id,
            candidates = total_candidates,
            matched = desired.len(),
            "computed desired buyers for listing"
        );

        MatchOutcome {
            desired,
            total_candidates,
        }
    }

    /// Desired listing ids for a buyer anchor.
    pub fn desired_listings_for_buyer(&self, buyer: &Buyer, candidates: &[Listing]) -> MatchOutcome {
        let total_candidates = candidates.len();
        let desired: BTreeSet<String> = candidates
            .iter()
            .filter(|listing| is_compatible(listing, buyer))
            .map(|listing| listing.external_id.clone())
            .collect();

        tracing::debug!(
            tenant_id = %buyer.tenant_id,
            buyer_id = %buyer.external_id,
            candidates = total_candidates,
            matched = desired.len(),
            "computed desired listings for buyer"
        );

        MatchOutcome {
            desired,
            total_candidates,
        }
    }
}
