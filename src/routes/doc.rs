use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{AddToCartRequest, CartItemView, CartView, UpdateCartItemRequest},
        orders::{
            CheckoutRequest, OrderList, OrderWithItems, PaymentCallbackRequest,
            PaymentCallbackResponse, PaymentTokenResponse,
        },
    },
    models::{Address, Order, OrderItem, Product, ProductVariant},
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, orders, params},
    status::{OrderStatus, PaymentStatus, ShippingMethod},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::view_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::create_payment_token,
        orders::payment_callback,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::delete_order
    ),
    components(
        schemas(
            Product,
            ProductVariant,
            Address,
            Order,
            OrderItem,
            OrderStatus,
            PaymentStatus,
            ShippingMethod,
            AddToCartRequest,
            UpdateCartItemRequest,
            CartItemView,
            CartView,
            CheckoutRequest,
            OrderList,
            OrderWithItems,
            PaymentTokenResponse,
            PaymentCallbackRequest,
            PaymentCallbackResponse,
            admin::UpdateOrderStatusRequest,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<CartView>,
            ApiResponse<Order>,
            ApiResponse<OrderList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<PaymentTokenResponse>,
            ApiResponse<PaymentCallbackResponse>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order and payment endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
