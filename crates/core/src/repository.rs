//! Read-side contract for the customer table.

use std::sync::Arc;

use crate::error::AudienceResult;
use crate::types::CustomerRecord;

/// Source of customer snapshots. The core accepts whatever sequence it is
/// given and never mutates it.
pub trait CustomerSource: Send + Sync {
    fn fetch_all(&self) -> AudienceResult<Vec<CustomerRecord>>;
}

impl CustomerSource for Vec<CustomerRecord> {
    fn fetch_all(&self) -> AudienceResult<Vec<CustomerRecord>> {
        Ok(self.clone())
    }
}

impl<T: CustomerSource + ?Sized> CustomerSource for Arc<T> {
    fn fetch_all(&self) -> AudienceResult<Vec<CustomerRecord>> {
        (**self).fetch_all()
    }
}
