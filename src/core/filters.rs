use crate::models::{Buyer, Listing, ListingStatus};

/// The shared compatibility predicate between a listing and a buyer.
///
/// Both evaluation directions of the matcher delegate here, so
/// listing-side and buyer-side results agree by construction.
///
/// A buyer with no desired zones matches nothing (conservative default),
/// and a zero budget excludes every priced listing.
#[inline]
pub fn is_compatible(listing: &Listing, buyer: &Buyer) -> bool {
    // Never match across tenants.
    if listing.tenant_id != buyer.tenant_id {
        return false;
    }

    // Only active inventory is matchable.
    if listing.status != ListingStatus::Active {
        return false;
    }

    // Zone comparison is case-insensitive, mirroring how zones are stored
    // in the remote CRM's free-text custom fields.
    if !buyer
        .desired_zones
        .iter()
        .any(|z| z.eq_ignore_ascii_case(&listing.zone))
    {
        return false;
    }

    if buyer.max_budget < listing.price {
        return false;
    }

    if buyer.min_rooms > listing.rooms || buyer.min_area > listing.area {
        return false;
    }

    let prefs = &buyer.amenity_prefs;
    let flags = &listing.amenities;
    prefs.balcony.accepts(flags.balcony)
        && prefs.garage.accepts(flags.garage)
        && prefs.patio.accepts(flags.patio)
        && prefs.pets_allowed.accepts(flags.pets_allowed)
}
