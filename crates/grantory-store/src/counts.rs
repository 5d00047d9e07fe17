//! Summary statistics over a namespace's collections.
//!
//! Counts are computed on demand from the current collections. Request
//! counts are derived from the grants themselves rather than the requests'
//! cached `has_grant` flag.

use std::collections::HashSet;

use crate::types::{Grant, Request, RequestCounts, TotalCount};

/// Partition requests by whether some grant references them.
pub fn requests_by_grant_presence<'a, R, G>(requests: R, grants: G) -> RequestCounts
where
    R: IntoIterator<Item = &'a Request>,
    G: IntoIterator<Item = &'a Grant>,
{
    let granted: HashSet<&str> = grants.into_iter().map(|g| g.request_id.as_str()).collect();
    let mut counts = RequestCounts::default();
    for request in requests {
        if granted.contains(request.id.as_str()) {
            counts.with_grant += 1;
        } else {
            counts.without_grant += 1;
        }
    }
    counts
}

/// Count the items of a collection.
pub fn total<I: IntoIterator>(items: I) -> TotalCount {
    TotalCount {
        total: items.into_iter().count() as u64,
    }
}
