use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem};
use crate::status::ShippingMethod;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub address_id: Uuid,
    pub shipping_method: ShippingMethod,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentTokenResponse {
    pub token: String,
    pub payment_url: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentCallbackRequest {
    pub token: String,
    pub ref_id: String,
    /// Gateway-reported outcome; anything but "success" is a failure.
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentCallbackResponse {
    pub order_id: Uuid,
    pub ref_id: String,
}
