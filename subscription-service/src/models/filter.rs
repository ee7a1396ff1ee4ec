//! Listing filter and the page limits storage enforces on it.

use uuid::Uuid;

/// Filter parameters for listing subscriptions.
///
/// `page` is 1-based. Paging fields are ignored by unpaginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    pub user_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Default and maximum page size for paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    default_size: i64,
    max_size: i64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: 10,
            max_size: 100,
        }
    }
}

impl PageLimits {
    pub fn new(default_size: i64, max_size: i64) -> Result<Self, String> {
        if default_size <= 0 || max_size <= 0 {
            return Err(format!(
                "page sizes must be positive (default {}, max {})",
                default_size, max_size
            ));
        }
        if default_size > max_size {
            return Err(format!(
                "default page size {} exceeds max page size {}",
                default_size, max_size
            ));
        }
        Ok(Self {
            default_size,
            max_size,
        })
    }

    pub fn default_size(&self) -> i64 {
        self.default_size
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    /// Resolve the filter's paging into `(limit, offset)`.
    pub fn resolve(&self, filter: &SubscriptionFilter) -> (i64, i64) {
        let limit = match filter.page_size {
            Some(size) if size > 0 => size.min(self.max_size),
            _ => self.default_size,
        };
        let page = match filter.page {
            Some(page) if page > 0 => page,
            _ => 1,
        };
        (limit, (page - 1).saturating_mul(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(page: Option<i64>, page_size: Option<i64>) -> SubscriptionFilter {
        SubscriptionFilter {
            page,
            page_size,
            ..Default::default()
        }
    }

    #[test]
    fn missing_paging_uses_first_page_with_default_size() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(&filter(None, None)), (10, 0));
    }

    #[test]
    fn page_size_is_capped_at_max() {
        let limits = PageLimits::new(10, 50).unwrap();
        assert_eq!(limits.resolve(&filter(Some(3), Some(500))), (50, 100));
    }

    #[test]
    fn non_positive_values_fall_back_to_defaults() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(&filter(Some(0), Some(-5))), (10, 0));
        assert_eq!(limits.resolve(&filter(Some(-2), Some(0))), (10, 0));
    }

    #[test]
    fn explicit_page_computes_offset() {
        let limits = PageLimits::default();
        assert_eq!(limits.resolve(&filter(Some(4), Some(25))), (25, 75));
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(PageLimits::new(0, 10).is_err());
        assert!(PageLimits::new(20, 10).is_err());
        assert!(PageLimits::new(10, 10).is_ok());
    }
}
