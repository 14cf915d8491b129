use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fulfillment progress of an order, distinct from its payment state.
///
/// pending -> processing -> shipped -> delivered, with cancelled reachable
/// from any non-terminal state. Delivered and cancelled are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Whether `next` is a legal step from this state.
    pub fn can_transition(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Processing)
            | (Self::Processing, Self::Shipped)
            | (Self::Shipped, Self::Delivered) => true,
            (from, Self::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Payment state of an order.
///
/// pending -> paid | failed. A failed attempt may still succeed later
/// through a fresh gateway round trip, so failed -> paid stays open.
/// paid only ever moves to refunded; nothing regresses to pending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn can_transition(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Paid | Self::Failed) => true,
            (Self::Failed, Self::Paid | Self::Failed) => true,
            (Self::Paid, Self::Refunded) => true,
            _ => false,
        }
    }
}

/// Shipping options with their fixed costs in minor currency units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
pub enum ShippingMethod {
    #[sea_orm(string_value = "standard")]
    Standard,
    #[sea_orm(string_value = "express")]
    Express,
}

impl ShippingMethod {
    pub const fn cost(self) -> i64 {
        match self {
            Self::Standard => 30_000,
            Self::Express => 50_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Express => "express",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfillment_happy_path() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Delivered));
    }

    #[test]
    fn fulfillment_no_skipping_or_regressing() {
        assert!(!OrderStatus::Pending.can_transition(OrderStatus::Shipped));
        assert!(!OrderStatus::Pending.can_transition(OrderStatus::Delivered));
        assert!(!OrderStatus::Processing.can_transition(OrderStatus::Pending));
        assert!(!OrderStatus::Shipped.can_transition(OrderStatus::Processing));
        assert!(!OrderStatus::Delivered.can_transition(OrderStatus::Shipped));
    }

    #[test]
    fn cancel_reachable_from_non_terminal_only() {
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Processing.can_transition(OrderStatus::Cancelled));
        assert!(OrderStatus::Shipped.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Cancelled));
    }

    #[test]
    fn terminal_states_stay_terminal() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert!(!OrderStatus::Delivered.can_transition(next));
            assert!(!OrderStatus::Cancelled.can_transition(next));
        }
    }

    #[test]
    fn payment_from_pending() {
        assert!(PaymentStatus::Pending.can_transition(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition(PaymentStatus::Failed));
        assert!(!PaymentStatus::Pending.can_transition(PaymentStatus::Refunded));
    }

    #[test]
    fn payment_failed_can_retry() {
        assert!(PaymentStatus::Failed.can_transition(PaymentStatus::Paid));
        assert!(PaymentStatus::Failed.can_transition(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition(PaymentStatus::Pending));
    }

    #[test]
    fn paid_never_regresses() {
        assert!(!PaymentStatus::Paid.can_transition(PaymentStatus::Pending));
        assert!(!PaymentStatus::Paid.can_transition(PaymentStatus::Failed));
        assert!(!PaymentStatus::Paid.can_transition(PaymentStatus::Paid));
        assert!(PaymentStatus::Paid.can_transition(PaymentStatus::Refunded));
    }

    #[test]
    fn refunded_is_terminal() {
        for next in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert!(!PaymentStatus::Refunded.can_transition(next));
        }
    }

    #[test]
    fn shipping_costs() {
        assert_eq!(ShippingMethod::Standard.cost(), 30_000);
        assert_eq!(ShippingMethod::Express.cost(), 50_000);
    }
}
