use serde::{Deserialize, Serialize};

use tradepost_core::{DomainError, DomainResult};

/// Fulfillment state of a ledger line (and, rolled up, of a purchase).
///
/// Stored as smallint 0/1, the convention inherited from the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    #[default]
    Pending,
    Complete,
}

impl FulfillmentStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            FulfillmentStatus::Pending => 0,
            FulfillmentStatus::Complete => 1,
        }
    }

    pub fn from_i16(value: i16) -> DomainResult<Self> {
        match value {
            0 => Ok(FulfillmentStatus::Pending),
            1 => Ok(FulfillmentStatus::Complete),
            other => Err(DomainError::validation(format!(
                "invalid fulfillment status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FulfillmentStatus::Pending => write!(f, "pending"),
            FulfillmentStatus::Complete => write!(f, "complete"),
        }
    }
}

/// Roll line statuses up to the purchase level: a purchase is complete iff
/// every one of its lines is complete. An empty iterator (no lines) stays
/// pending; checkout never creates such a purchase.
pub fn rollup(line_statuses: impl IntoIterator<Item = FulfillmentStatus>) -> FulfillmentStatus {
    let mut saw_any = false;
    for status in line_statuses {
        saw_any = true;
        if status == FulfillmentStatus::Pending {
            return FulfillmentStatus::Pending;
        }
    }
    if saw_any {
        FulfillmentStatus::Complete
    } else {
        FulfillmentStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollup_is_complete_only_when_all_lines_are() {
        use FulfillmentStatus::{Complete, Pending};

        assert_eq!(rollup([Pending, Pending]), Pending);
        assert_eq!(rollup([Complete, Pending]), Pending);
        assert_eq!(rollup([Complete, Complete]), Complete);
        assert_eq!(rollup([]), Pending);
    }

    #[test]
    fn smallint_mapping_roundtrips() {
        assert_eq!(FulfillmentStatus::from_i16(0).unwrap(), FulfillmentStatus::Pending);
        assert_eq!(FulfillmentStatus::from_i16(1).unwrap(), FulfillmentStatus::Complete);
        assert!(FulfillmentStatus::from_i16(2).is_err());
    }
}
