use std::fmt;
use std::str::FromStr;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{PipelineError, Result};
use crate::table::Table;

/// The fixed, enumerable set of aggregates one run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateName {
    CustomersByAge,
    CustomersByGender,
    PurchaseSumBySubscriptionGender,
    CustomersByInteractionType,
    CustomersByPurchaseTime,
    ProductPurchaseFrequency,
    PurchaseAmountByYearMonth,
    TotalItemPrices,
    TotalPriceByProductMaterial,
    UniqueProductCount,
}

impl AggregateName {
    pub const ALL: [AggregateName; 10] = [
        AggregateName::CustomersByAge,
        AggregateName::CustomersByGender,
        AggregateName::PurchaseSumBySubscriptionGender,
        AggregateName::CustomersByInteractionType,
        AggregateName::CustomersByPurchaseTime,
        AggregateName::ProductPurchaseFrequency,
        AggregateName::PurchaseAmountByYearMonth,
        AggregateName::TotalItemPrices,
        AggregateName::TotalPriceByProductMaterial,
        AggregateName::UniqueProductCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateName::CustomersByAge => "customers_by_age",
            AggregateName::CustomersByGender => "customers_by_gender",
            AggregateName::PurchaseSumBySubscriptionGender => {
                "purchase_sum_by_subscription_gender"
            }
            AggregateName::CustomersByInteractionType => "customers_by_interaction_type",
            AggregateName::CustomersByPurchaseTime => "customers_by_purchase_time",
            AggregateName::ProductPurchaseFrequency => "product_purchase_frequency",
            AggregateName::PurchaseAmountByYearMonth => "purchase_amount_by_year_month",
            AggregateName::TotalItemPrices => "total_item_prices",
            AggregateName::TotalPriceByProductMaterial => "total_price_by_product_material",
            AggregateName::UniqueProductCount => "unique_product_count",
        }
    }
}

impl fmt::Display for AggregateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        AggregateName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| PipelineError::NotFound(format!("aggregate '{s}'")))
    }
}

/// Named aggregate outputs of one run. Each slot is written at most once,
/// so workers can fill it concurrently without further coordination.
#[derive(Debug, Default)]
pub struct ResultSet {
    slots: DashMap<AggregateName, Table>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: AggregateName, table: Table) -> Result<()> {
        match self.slots.entry(name) {
            Entry::Occupied(_) => Err(PipelineError::DuplicateResult(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(table);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: AggregateName) -> Option<Table> {
        self.slots.get(&name).map(|t| t.value().clone())
    }

    pub fn contains(&self, name: AggregateName) -> bool {
        self.slots.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn missing(&self) -> Vec<AggregateName> {
        AggregateName::ALL
            .into_iter()
            .filter(|n| !self.contains(*n))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Fail with the names of every empty slot.
    pub fn ensure_complete(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Incomplete(
                missing.iter().map(|n| n.to_string()).collect(),
            ))
        }
    }

    /// Filled slots in the fixed name order.
    pub fn into_ordered(self) -> Vec<(AggregateName, Table)> {
        let mut entries: Vec<_> = self.slots.into_iter().collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }
}
