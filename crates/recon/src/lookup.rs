use crate::model::OwnershipResult;

/// IP ownership lookup as the engine sees it.
///
/// Implementations never fail: every problem is folded into the returned
/// [`OwnershipResult`] so the pipeline degrades to "no ownership data".
pub trait OwnershipLookup {
    fn resolve(&self, ip: &str) -> OwnershipResult;
}

impl<F> OwnershipLookup for F
where
    F: Fn(&str) -> OwnershipResult,
{
    fn resolve(&self, ip: &str) -> OwnershipResult {
        self(ip)
    }
}

/// Lookup that knows nothing. Used when the registry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl OwnershipLookup for NoLookup {
    fn resolve(&self, _ip: &str) -> OwnershipResult {
        OwnershipResult::none()
    }
}
