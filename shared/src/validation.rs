//! Validation utilities for stock and project inputs

use rust_decimal::Decimal;

use crate::types::UNIT_COST_SCALE;

// ============================================================================
// Quantity and Cost Validations
// ============================================================================

/// Validate that a movement quantity is strictly positive
pub fn validate_positive_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity must be greater than zero");
    }
    Ok(())
}

/// Validate that a unit cost is not negative and fits the stored precision
pub fn validate_unit_cost(cost: Decimal) -> Result<(), &'static str> {
    if cost < Decimal::ZERO {
        return Err("Unit cost cannot be negative");
    }
    if cost.normalize().scale() > UNIT_COST_SCALE {
        return Err("Unit cost cannot have more than 4 decimal places");
    }
    Ok(())
}

/// Validate min/max stock levels
pub fn validate_levels(min_level: Option<i64>, max_level: Option<i64>) -> Result<(), &'static str> {
    if min_level.is_some_and(|m| m < 0) || max_level.is_some_and(|m| m < 0) {
        return Err("Stock levels cannot be negative");
    }
    if let (Some(min), Some(max)) = (min_level, max_level) {
        if min > max {
            return Err("Minimum level cannot exceed maximum level");
        }
    }
    Ok(())
}

// ============================================================================
// Identifier Validations
// ============================================================================

/// Validate an item code: non-blank, at most 50 characters, no inner whitespace
pub fn validate_item_code(code: &str) -> Result<(), &'static str> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err("Item code cannot be blank");
    }
    if trimmed.chars().count() > 50 {
        return Err("Item code cannot exceed 50 characters");
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err("Item code cannot contain whitespace");
    }
    Ok(())
}

/// Validate the actor recorded on usage records
pub fn validate_actor(actor: &str) -> Result<(), &'static str> {
    if actor.trim().is_empty() {
        return Err("Issuing user is required");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive_quantity() {
        assert!(validate_positive_quantity(1).is_ok());
        assert!(validate_positive_quantity(0).is_err());
        assert!(validate_positive_quantity(-3).is_err());
    }

    #[test]
    fn test_validate_unit_cost() {
        assert!(validate_unit_cost(Decimal::ZERO).is_ok());
        assert!(validate_unit_cost(Decimal::new(-1, 2)).is_err());
        assert!(validate_unit_cost(Decimal::new(50001, 4)).is_ok());
        assert!(validate_unit_cost(Decimal::new(500005, 5)).is_err());
        // Trailing zeros do not count
        assert!(validate_unit_cost(Decimal::new(5000000, 6)).is_ok());
    }

    #[test]
    fn test_validate_levels() {
        assert!(validate_levels(None, None).is_ok());
        assert!(validate_levels(Some(5), Some(5)).is_ok());
        assert!(validate_levels(Some(6), Some(5)).is_err());
        assert!(validate_levels(Some(-1), None).is_err());
    }

    #[test]
    fn test_validate_item_code() {
        assert!(validate_item_code("100").is_ok());
        assert!(validate_item_code("WIRE-ER70S-6").is_ok());
        assert!(validate_item_code("   ").is_err());
        assert!(validate_item_code("10 0").is_err());
        assert!(validate_item_code(&"X".repeat(51)).is_err());
    }

    #[test]
    fn test_validate_actor() {
        assert!(validate_actor("storeman").is_ok());
        assert!(validate_actor(" ").is_err());
    }
}
