use std::sync::Arc;

use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set, Statement};
use serial_test::serial;
use uuid::Uuid;

use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::{AddToCartRequest, UpdateCartItemRequest},
        orders::{CheckoutRequest, PaymentCallbackRequest},
    },
    entity::{addresses, product_variants, products, users},
    error::AppError,
    middleware::auth::AuthUser,
    payment::InMemoryGateway,
    routes::admin::UpdateOrderStatusRequest,
    routes::params::{OrderListQuery, Pagination},
    services::{admin_service, cart_service, order_service, payment_service},
    state::AppState,
    status::{OrderStatus, PaymentStatus, ShippingMethod},
};

// Integration flow: cart merging and live pricing -> checkout freezing ->
// token/callback reconciliation -> admin transitions and stock restoration.
#[tokio::test]
#[serial]
async fn cart_checkout_payment_and_admin_flow() -> anyhow::Result<()> {
    // Allow skipping when no DB is configured in the environment.
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let (state, gateway) = setup_state(&database_url).await?;

    let user_id = create_user(&state, "user", "user@example.com").await?;
    let admin_id = create_user(&state, "admin", "admin@example.com").await?;
    let stranger_id = create_user(&state, "user", "stranger@example.com").await?;

    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let auth_stranger = AuthUser {
        user_id: stranger_id,
        role: "user".into(),
    };

    let product = create_product(&state, "Tonal Tee", 100_000).await?;
    let variant = create_variant(&state, product.id, "black", "M", 100_000, 10).await?;
    let address = create_address(&state, user_id).await?;
    let stranger_address = create_address(&state, stranger_id).await?;

    // Adding the same product twice merges into one line.
    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 2,
        },
    )
    .await?;
    let view = cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 3,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.items_count, 5);
    assert_eq!(view.total_price, 500_000);

    // Cart totals follow the catalog price; nothing is frozen yet.
    set_product_price(&state, product.id, 120_000).await?;
    let view = cart_service::view_cart(&state, &auth_user).await?.data.unwrap();
    assert_eq!(view.total_price, 600_000);

    // Replace the quantity outright.
    let line_id = view.items[0].id;
    let view = cart_service::update_cart_item(
        &state,
        &auth_user,
        line_id,
        UpdateCartItemRequest { quantity: 1 },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(view.total_price, 120_000);

    // A line id from another user's cart is invisible.
    let err = cart_service::update_cart_item(
        &state,
        &auth_stranger,
        line_id,
        UpdateCartItemRequest { quantity: 2 },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Checkout against someone else's address is refused.
    let err = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: stranger_address.id,
            shipping_method: ShippingMethod::Express,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // Checkout: totals freeze, stock is reserved, the cart empties.
    set_product_price(&state, product.id, 100_000).await?;
    let checkout = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Express,
        },
    )
    .await?
    .data
    .unwrap();
    let order = checkout.order;
    assert_eq!(order.total_price, 150_000);
    assert_eq!(order.shipping_cost, 50_000);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(checkout.items.len(), 1);
    assert_eq!(checkout.items[0].price, 100_000);
    assert_eq!(checkout.items[0].variant_id, Some(variant.id));
    assert_eq!(variant_stock(&state, variant.id).await?, 9);

    let view = cart_service::view_cart(&state, &auth_user).await?.data.unwrap();
    assert!(view.items.is_empty());

    let err = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Express,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));

    // Later catalog changes never touch the frozen order.
    set_product_price(&state, product.id, 200_000).await?;
    let fetched = order_service::get_order(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.items[0].price, 100_000);
    assert_eq!(fetched.order.total_price, 150_000);

    // The order is invisible to other users.
    let err = order_service::get_order(&state, &auth_stranger, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Payment token issuance.
    let token_resp = payment_service::create_payment_token(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(token_resp.amount, 150_000);
    assert!(token_resp.payment_url.contains(&token_resp.token));

    let err = payment_service::create_payment_token(&state, &auth_stranger, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // Unknown token callbacks are dropped.
    let err = payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token: "no-such-token".into(),
            ref_id: "REF-0".into(),
            status: "success".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Gateway reports failure: payment_status flips, fulfillment stays put.
    let err = payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token: token_resp.token.clone(),
            ref_id: "REF-1".into(),
            status: "failed".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::PaymentFailed));
    let fetched = order_service::get_order(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.payment_status, PaymentStatus::Failed);
    assert_eq!(fetched.order.status, OrderStatus::Pending);

    // Success after failure settles the order; one transient outage is retried.
    gateway.set_transient_failures(1);
    let confirmed = payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token: token_resp.token.clone(),
            ref_id: "REF-1".into(),
            status: "success".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(confirmed.order_id, order.id);
    assert_eq!(confirmed.ref_id, "REF-1");
    assert_eq!(gateway.verify_calls(), 2);

    let fetched = order_service::get_order(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.payment_status, PaymentStatus::Paid);
    assert_eq!(fetched.order.status, OrderStatus::Processing);
    assert!(fetched.order.payment_date.is_some());
    assert_eq!(fetched.order.payment_ref_id.as_deref(), Some("REF-1"));

    // Duplicate delivery: same answer, no re-verification, no state change.
    let duplicate = payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token: token_resp.token.clone(),
            ref_id: "REF-2".into(),
            status: "success".into(),
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(duplicate.ref_id, "REF-1");
    assert_eq!(gateway.verify_calls(), 2);

    // A paid order refuses a fresh token and keeps the old one.
    let err = payment_service::create_payment_token(&state, &auth_user, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyPaid));
    let fetched = order_service::get_order(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.payment_token, Some(token_resp.token.clone()));

    // Fulfillment transitions are admin-only and validated.
    let err = admin_service::update_order_status(
        &state,
        &auth_user,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let updated = admin_service::update_order_status(
        &state,
        &auth_admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Shipped,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(updated.status, OrderStatus::Shipped);

    let err = admin_service::update_order_status(
        &state,
        &auth_admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Processing,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Cancelling gives the reserved stock back, exactly once.
    let cancelled = admin_service::update_order_status(
        &state,
        &auth_admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(variant_stock(&state, variant.id).await?, 10);

    let err = admin_service::update_order_status(
        &state,
        &auth_admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    assert_eq!(variant_stock(&state, variant.id).await?, 10);

    Ok(())
}

#[tokio::test]
#[serial]
async fn verification_stock_and_deletion_edges() -> anyhow::Result<()> {
    let database_url =
        match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
            Ok(url) => url,
            Err(_) => {
                eprintln!(
                    "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
                );
                return Ok(());
            }
        };

    let (state, gateway) = setup_state(&database_url).await?;

    let user_id = create_user(&state, "user", "edge-user@example.com").await?;
    let admin_id = create_user(&state, "admin", "edge-admin@example.com").await?;
    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };

    let product = create_product(&state, "Denim Jacket", 100_000).await?;
    let variant = create_variant(&state, product.id, "indigo", "L", 100_000, 10).await?;
    let premium = create_variant(&state, product.id, "ecru", "L", 140_000, 3).await?;
    let address = create_address(&state, user_id).await?;

    // Gateway rejects the reference id: verification error, payment failed.
    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 1,
        },
    )
    .await?;
    let order = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Standard,
        },
    )
    .await?
    .data
    .unwrap()
    .order;
    assert_eq!(order.total_price, 130_000);

    let token = payment_service::create_payment_token(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap()
        .token;

    gateway.set_verify_result(false);
    let err = payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token: token.clone(),
            ref_id: "REF-X".into(),
            status: "success".into(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::VerificationFailed));
    let fetched = order_service::get_order(&state, &auth_user, order.id)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.order.payment_status, PaymentStatus::Failed);

    gateway.set_verify_result(true);
    payment_service::payment_callback(
        &state,
        PaymentCallbackRequest {
            token,
            ref_id: "REF-X".into(),
            status: "success".into(),
        },
    )
    .await?;

    // Deleting is reserved for orders that never started processing.
    let err = admin_service::delete_order(&state, &auth_admin, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Pending order deletion returns the reserved stock.
    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: None,
            quantity: 2,
        },
    )
    .await?;
    let pending = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Standard,
        },
    )
    .await?
    .data
    .unwrap()
    .order;
    assert_eq!(variant_stock(&state, variant.id).await?, 7);

    admin_service::delete_order(&state, &auth_admin, pending.id).await?;
    assert_eq!(variant_stock(&state, variant.id).await?, 9);
    let err = admin_service::get_order_admin(&state, &auth_admin, pending.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    // Checkout larger than stock rolls everything back.
    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: Some(variant.id),
            quantity: 50,
        },
    )
    .await?;
    let before = order_service::list_orders(
        &state,
        &auth_user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            sort_order: None,
        },
    )
    .await?
    .data
    .unwrap()
    .items
    .len();

    let err = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Standard,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::OutOfStock(_)));
    assert_eq!(variant_stock(&state, variant.id).await?, 9);

    let after = order_service::list_orders(
        &state,
        &auth_user,
        OrderListQuery {
            pagination: Pagination {
                page: None,
                per_page: None,
            },
            status: None,
            sort_order: None,
        },
    )
    .await?
    .data
    .unwrap()
    .items
    .len();
    assert_eq!(before, after);
    let view = cart_service::view_cart(&state, &auth_user).await?.data.unwrap();
    assert_eq!(view.items.len(), 1);

    // A line pinned to a variant prices and reserves that variant.
    cart_service::clear_cart(&state, &auth_user).await?;
    let view = cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product.id,
            variant_id: Some(premium.id),
            quantity: 2,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(view.total_price, 280_000);

    let checkout = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            address_id: address.id,
            shipping_method: ShippingMethod::Standard,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(checkout.order.total_price, 310_000);
    assert_eq!(checkout.items[0].variant_id, Some(premium.id));
    assert_eq!(checkout.items[0].price, 140_000);
    assert_eq!(variant_stock(&state, premium.id).await?, 1);
    assert_eq!(variant_stock(&state, variant.id).await?, 9);

    Ok(())
}

async fn setup_state(database_url: &str) -> anyhow::Result<(AppState, InMemoryGateway)> {
    let orm = create_orm_conn(database_url).await?;
    run_migrations(&orm).await?;
    let pool = create_pool(database_url).await?;

    // Clean tables between runs
    let backend = orm.get_database_backend();
    orm.execute(Statement::from_string(
        backend,
        "TRUNCATE TABLE order_items, orders, cart_items, carts, addresses, audit_logs, product_variants, products, users RESTART IDENTITY CASCADE",
    ))
    .await?;

    let gateway = InMemoryGateway::new();
    let config = AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        payment_gateway_url: "https://gateway.test/pay".into(),
        payment_callback_url: "http://127.0.0.1/api/orders/payment-callback".into(),
    };
    let state = AppState {
        pool,
        orm,
        config,
        gateway: Arc::new(gateway.clone()),
    };
    Ok((state, gateway))
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = users::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(email.to_string()),
        password_hash: Set("external".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_product(
    state: &AppState,
    name: &str,
    price: i64,
) -> anyhow::Result<products::Model> {
    let product = products::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

async fn create_variant(
    state: &AppState,
    product_id: Uuid,
    color: &str,
    size: &str,
    price: i64,
    stock: i32,
) -> anyhow::Result<product_variants::Model> {
    let variant = product_variants::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        color: Set(color.into()),
        size: Set(size.into()),
        price: Set(price),
        stock: Set(stock),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(variant)
}

async fn create_address(state: &AppState, user_id: Uuid) -> anyhow::Result<addresses::Model> {
    let address = addresses::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        full_name: Set("Test Customer".into()),
        phone_number: Set("09120000000".into()),
        province: Set("Tehran".into()),
        city: Set("Tehran".into()),
        postal_code: Set("1234567890".into()),
        address_line: Set("No. 1, Example St.".into()),
        is_default: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(address)
}

async fn set_product_price(state: &AppState, product_id: Uuid, price: i64) -> anyhow::Result<()> {
    let product = products::Entity::find_by_id(product_id)
        .one(&state.orm)
        .await?
        .expect("product exists");
    let mut active: products::ActiveModel = product.into();
    active.price = Set(price);
    active.update(&state.orm).await?;
    Ok(())
}

async fn variant_stock(state: &AppState, variant_id: Uuid) -> anyhow::Result<i32> {
    let variant = product_variants::Entity::find_by_id(variant_id)
        .one(&state.orm)
        .await?
        .expect("variant exists");
    Ok(variant.stock)
}
