use thiserror::Error;

/// Crate-wide error taxonomy. Every variant maps to exactly one wire
/// `ERROR.code` from spec.md §6, via [`EngineError::wire_code`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("auth failed")]
    AuthFailed,

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("no price reference available for market order")]
    NoPriceReference,

    #[error("unknown product: {0}")]
    InvalidProduct(String),

    #[error("invalid quantity")]
    InvalidQuantity,

    #[error("duplicate client order id: {0}")]
    DuplicateOrderId(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("insufficient inventory")]
    InsufficientInventory,

    #[error("team not authorized to produce this product")]
    UnauthorizedProduction,

    #[error("no recipe on file for this product")]
    InvalidRecipe,

    #[error("insufficient ingredients for production")]
    InsufficientIngredients,

    #[error("offer expired")]
    OfferExpired,

    #[error("offer already taken")]
    OfferTaken,

    #[error("offer not found")]
    OfferNotFound,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("engine queue full")]
    ServiceUnavailable,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The fixed wire code from spec.md §6. Internal-only variants that
    /// have no dedicated wire code fall back to the closest documented one.
    pub fn wire_code(&self) -> &'static str {
        match self {
            EngineError::AuthFailed => "AUTH_FAILED",
            EngineError::InvalidOrder(_) | EngineError::NoPriceReference => "INVALID_ORDER",
            EngineError::InvalidProduct(_) => "INVALID_PRODUCT",
            EngineError::InvalidQuantity => "INVALID_QUANTITY",
            EngineError::DuplicateOrderId(_) => "DUPLICATE_ORDER_ID",
            EngineError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            EngineError::InsufficientInventory => "INSUFFICIENT_INVENTORY",
            EngineError::UnauthorizedProduction => "UNAUTHORIZED_PRODUCTION",
            EngineError::InvalidRecipe => "INVALID_ORDER",
            EngineError::InsufficientIngredients => "INSUFFICIENT_INVENTORY",
            EngineError::OfferExpired => "OFFER_EXPIRED",
            EngineError::OfferTaken | EngineError::OfferNotFound => "OFFER_TAKEN",
            EngineError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            EngineError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            EngineError::Storage(_) | EngineError::Internal(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_spec_list() {
        assert_eq!(EngineError::AuthFailed.wire_code(), "AUTH_FAILED");
        assert_eq!(EngineError::NoPriceReference.wire_code(), "INVALID_ORDER");
        assert_eq!(EngineError::OfferTaken.wire_code(), "OFFER_TAKEN");
    }
}
