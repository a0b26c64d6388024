use crate::domain::catalog::Product;
use crate::entity::Lite;
use crate::operations::OperationError;
use crate::store::StoreError;

// ============================================================================
// Order Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order should be new")]
    NotNew,

    #[error("There are not enough {product} in stock")]
    InsufficientStock { product: Lite<Product> },

    #[error("Unknown product: {0}")]
    UnknownProduct(Lite<Product>),

    #[error("Invalid quantity {quantity} for {product}")]
    InvalidQuantity { product: Lite<Product>, quantity: u32 },

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<OrderError> for OperationError {
    fn from(error: OrderError) -> Self {
        match error {
            OrderError::Operation(e) => e,
            OrderError::Store(e) => OperationError::Store(e),
            other => OperationError::domain(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_insufficient_stock_names_product() {
        let product: Lite<Product> = Lite::new(Uuid::now_v7(), "Chang");
        let err = OrderError::InsufficientStock { product };
        assert_eq!(err.to_string(), "There are not enough Chang in stock");
    }

    #[test]
    fn test_business_errors_become_line_local() {
        let product: Lite<Product> = Lite::new(Uuid::now_v7(), "Chang");
        let op: OperationError = OrderError::InsufficientStock { product }.into();
        assert!(op.is_line_local());

        let op: OperationError = OrderError::Store(StoreError::Unavailable("down".into())).into();
        assert!(!op.is_line_local());
    }
}
