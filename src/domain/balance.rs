//! Balance accounting over fund and budget line item aggregates.
//!
//! Everything here is pure: callers pass the freshest copies they hold (under lock
//! when completing) and persist the returned aggregates themselves.
//!
//! | Type         | Fund                 | Line item            |
//! |--------------|----------------------|----------------------|
//! | ALLOCATION   | allocated += amount  | utilized += amount   |
//! | DISBURSEMENT | disbursed += amount  | -                    |
//! | EXPENDITURE  | utilized += amount   | utilized += amount   |
//! | RETURNS      | allocated -= amount  | -                    |

use bigdecimal::BigDecimal;
use chrono::Utc;

use crate::domain::{BudgetLineItem, Fund, TransactionType};
use crate::error::{LedgerError, LedgerResult};

/// Aggregates after a delta has been applied and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedDelta {
    pub fund: Fund,
    pub line_item: Option<BudgetLineItem>,
}

/// Creation-time hint: DISBURSEMENT and EXPENDITURE must fit in the available balance.
///
/// The authoritative check happens again in [`apply_delta`] at completion.
pub fn ensure_available(
    fund: &Fund,
    transaction_type: TransactionType,
    amount: &BigDecimal,
) -> LedgerResult<()> {
    if !transaction_type.draws_down() {
        return Ok(());
    }

    let available = fund.available();
    if amount > &available {
        return Err(LedgerError::InsufficientBalance {
            available,
            requested: amount.clone(),
        });
    }

    Ok(())
}

pub fn apply_delta(
    fund: &Fund,
    line_item: Option<&BudgetLineItem>,
    transaction_type: TransactionType,
    amount: &BigDecimal,
) -> LedgerResult<AppliedDelta> {
    let mut fund = fund.clone();
    let mut line_item = line_item.cloned();

    match transaction_type {
        TransactionType::Allocation => {
            fund.allocated += amount.clone();
            if let Some(item) = line_item.as_mut() {
                item.utilized += amount.clone();
            }
        }
        TransactionType::Disbursement => {
            fund.disbursed += amount.clone();
        }
        TransactionType::Expenditure => {
            fund.utilized += amount.clone();
            if let Some(item) = line_item.as_mut() {
                item.utilized += amount.clone();
            }
        }
        TransactionType::Returns => {
            if amount > &fund.allocated {
                return Err(LedgerError::InvariantViolation(format!(
                    "return of {} exceeds allocated {} on fund {}",
                    amount, fund.allocated, fund.id
                )));
            }
            fund.allocated -= amount.clone();
        }
    }

    check_fund(&fund)?;
    if let Some(item) = &line_item {
        check_line_item(item)?;
    }

    let now = Utc::now();
    fund.updated_at = now;
    if let Some(item) = line_item.as_mut() {
        item.updated_at = now;
    }

    Ok(AppliedDelta { fund, line_item })
}

/// Non-negative totals and `allocated + disbursed + utilized <= amount`.
pub fn check_fund(fund: &Fund) -> LedgerResult<()> {
    let zero = BigDecimal::from(0);
    for (name, total) in [
        ("allocated", &fund.allocated),
        ("disbursed", &fund.disbursed),
        ("utilized", &fund.utilized),
    ] {
        if total < &zero {
            return Err(LedgerError::InvariantViolation(format!(
                "fund {} {} would become negative ({})",
                fund.id, name, total
            )));
        }
    }

    let committed = fund.committed();
    if committed > fund.amount {
        return Err(LedgerError::InvariantViolation(format!(
            "fund {} would commit {} against a ceiling of {}",
            fund.id, committed, fund.amount
        )));
    }

    Ok(())
}

/// `utilized <= amount` for the line item.
pub fn check_line_item(item: &BudgetLineItem) -> LedgerResult<()> {
    if item.utilized > item.amount {
        return Err(LedgerError::InvariantViolation(format!(
            "budget line item {} would utilize {} against a ceiling of {}",
            item.id, item.utilized, item.amount
        )));
    }

    Ok(())
}
