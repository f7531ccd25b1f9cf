//! Fund envelopes, budget line items and the entities that own or receive money.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FundStatus {
    Active,
    Inactive,
    Deleted,
}

impl FundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundStatus::Active => "ACTIVE",
            FundStatus::Inactive => "INACTIVE",
            FundStatus::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for FundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FundStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(FundStatus::Active),
            "INACTIVE" => Ok(FundStatus::Inactive),
            "DELETED" => Ok(FundStatus::Deleted),
            other => Err(LedgerError::Storage(format!("unknown fund status {}", other))),
        }
    }
}

/// Authorization envelope: a ceiling plus three running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub amount: BigDecimal,
    pub allocated: BigDecimal,
    pub disbursed: BigDecimal,
    pub utilized: BigDecimal,
    pub currency: String,
    pub status: FundStatus,
    pub entity_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fund {
    pub fn new(name: impl Into<String>, code: impl Into<String>, amount: BigDecimal, entity_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            code: code.into(),
            amount,
            allocated: BigDecimal::from(0),
            disbursed: BigDecimal::from(0),
            utilized: BigDecimal::from(0),
            currency: "KES".to_string(),
            status: FundStatus::Active,
            entity_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// allocated + disbursed + utilized
    pub fn committed(&self) -> BigDecimal {
        &self.allocated + &self.disbursed + &self.utilized
    }

    pub fn available(&self) -> BigDecimal {
        &self.amount - self.committed()
    }
}

/// Optional sub-allocation inside a fund with its own utilization ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLineItem {
    pub id: Uuid,
    pub fund_id: Uuid,
    pub name: String,
    pub code: String,
    pub amount: BigDecimal,
    pub utilized: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetLineItem {
    pub fn new(fund_id: Uuid, name: impl Into<String>, code: impl Into<String>, amount: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            fund_id,
            name: name.into(),
            code: code.into(),
            amount,
            utilized: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> BigDecimal {
        &self.amount - &self.utilized
    }
}

/// Organization or department acting as source or destination of funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub code: String,
    pub is_active: bool,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            entity_type: entity_type.into(),
            code: code.into(),
            is_active: true,
        }
    }
}
