// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for the gamification economy engine.

use crate::base::Currency;
use thiserror::Error;

/// Engine operation errors.
///
/// Every validation failure is returned synchronously with its specific
/// kind; multi-step operations roll back in full before returning one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Referenced profile, catalog entry, or leaderboard does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Catalog entry is inactive or outside its availability window
    #[error("not available")]
    NotAvailable,

    /// Profile does not meet the item's level or tier requirement
    #[error("level or tier requirement not met")]
    RequirementNotMet,

    /// Finite stock is smaller than the requested quantity
    #[error("out of stock")]
    OutOfStock,

    /// Per-user purchase limit would be exceeded
    #[error("purchase limit exceeded")]
    LimitExceeded,

    /// A debit would drive the balance below zero
    #[error("insufficient {currency} balance")]
    InsufficientBalance { currency: Currency },

    /// Operation exceeded its budget waiting on a profile serialization point.
    /// Retryable; no state was changed.
    #[error("operation timed out")]
    Timeout,

    /// A catalog or definition id is already registered
    #[error("conflicting registration")]
    Conflict,

    /// Idempotency key `(profile, source, source_id)` was already consumed
    #[error("duplicate event")]
    DuplicateEvent,

    /// Amount, increment, or quantity is zero (or rounds to zero)
    #[error("invalid amount")]
    InvalidAmount,
}

#[cfg(test)]
mod tests {
    use super::EngineError;
    use crate::base::Currency;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            EngineError::NotFound("profile").to_string(),
            "profile not found"
        );
        assert_eq!(EngineError::NotAvailable.to_string(), "not available");
        assert_eq!(
            EngineError::RequirementNotMet.to_string(),
            "level or tier requirement not met"
        );
        assert_eq!(EngineError::OutOfStock.to_string(), "out of stock");
        assert_eq!(
            EngineError::LimitExceeded.to_string(),
            "purchase limit exceeded"
        );
        assert_eq!(
            EngineError::InsufficientBalance {
                currency: Currency::Coins
            }
            .to_string(),
            "insufficient coins balance"
        );
        assert_eq!(EngineError::Timeout.to_string(), "operation timed out");
        assert_eq!(
            EngineError::Conflict.to_string(),
            "conflicting registration"
        );
        assert_eq!(EngineError::DuplicateEvent.to_string(), "duplicate event");
        assert_eq!(EngineError::InvalidAmount.to_string(), "invalid amount");
    }

    #[test]
    fn errors_are_cloneable() {
        let error = EngineError::InsufficientBalance {
            currency: Currency::Gems,
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
