use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{CheckoutRequest, OrderList, OrderWithItems},
    entity::{
        addresses::Entity as Addresses,
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{Column as CartCol, Entity as Carts},
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        product_variants::{Column as VariantCol, Entity as ProductVariants},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    state::AppState,
    status::{OrderStatus, PaymentStatus},
};

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

struct PricedLine {
    product_id: Uuid,
    variant_id: Uuid,
    quantity: i32,
    unit_price: i64,
}

/// Convert the caller's cart into an immutable order. One transaction:
/// order + items are written together, each line's variant stock is
/// reserved under a row lock, and the cart is emptied. The cart row itself
/// is locked so two concurrent checkouts cannot both convert it.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: CheckoutRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let txn = state.orm.begin().await?;

    let address = Addresses::find_by_id(payload.address_id).one(&txn).await?;
    let address = match address {
        Some(a) if a.user_id == user.user_id => a,
        _ => return Err(AppError::Forbidden),
    };

    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let Some(cart) = cart else {
        return Err(AppError::EmptyCart);
    };

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
    let mut subtotal: i64 = 0;
    for line in &lines {
        if line.quantity < 1 {
            return Err(AppError::BadRequest("Cart has invalid quantity".into()));
        }
        let product = Products::find_by_id(line.product_id).one(&txn).await?;
        let product = match product {
            Some(p) if p.is_active => p,
            _ => return Err(AppError::BadRequest("product no longer available".into())),
        };

        // the line's own variant, or the first active one that can cover it
        let variant = match line.variant_id {
            Some(vid) => {
                ProductVariants::find_by_id(vid)
                    .lock(LockType::Update)
                    .one(&txn)
                    .await?
            }
            None => {
                ProductVariants::find()
                    .filter(VariantCol::ProductId.eq(line.product_id))
                    .filter(VariantCol::IsActive.eq(true))
                    .filter(VariantCol::Stock.gte(line.quantity))
                    .order_by_asc(VariantCol::CreatedAt)
                    .lock(LockType::Update)
                    .one(&txn)
                    .await?
            }
        };
        let variant = variant.ok_or(AppError::OutOfStock(line.product_id))?;
        if !variant.is_active || variant.stock < line.quantity {
            return Err(AppError::OutOfStock(line.product_id));
        }

        let unit_price = if line.variant_id.is_some() {
            variant.price
        } else {
            product.price
        };
        subtotal += unit_price * line.quantity as i64;
        priced.push(PricedLine {
            product_id: line.product_id,
            variant_id: variant.id,
            quantity: line.quantity,
            unit_price,
        });
    }

    let shipping_cost = payload.shipping_method.cost();
    let total_price = subtotal + shipping_cost;

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        address_id: Set(Some(address.id)),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::Pending),
        total_price: Set(total_price),
        shipping_method: Set(payload.shipping_method),
        shipping_cost: Set(shipping_cost),
        payment_token: Set(None),
        payment_ref_id: Set(None),
        payment_date: Set(None),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items: Vec<OrderItem> = Vec::with_capacity(priced.len());
    for line in &priced {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            variant_id: Set(Some(line.variant_id)),
            quantity: Set(line.quantity),
            price: Set(line.unit_price),
            created_at: NotSet,
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));

        ProductVariants::update_many()
            .col_expr(
                VariantCol::Stock,
                Expr::col(VariantCol::Stock).sub(line.quantity),
            )
            .filter(VariantCol::Id.eq(line.variant_id))
            .exec(&txn)
            .await?;
    }

    // the cart's job is done; the next checkout starts from an empty cart
    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id, "total_price": total_price })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    tracing::info!(order_id = %order.id, total = total_price, "order created");

    Ok(ApiResponse::success(
        "Checkout success",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub(crate) fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        address_id: model.address_id,
        status: model.status,
        payment_status: model.payment_status,
        total_price: model.total_price,
        shipping_method: model.shipping_method,
        shipping_cost: model.shipping_cost,
        payment_token: model.payment_token,
        payment_ref_id: model.payment_ref_id,
        payment_date: model.payment_date.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub(crate) fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        variant_id: model.variant_id,
        quantity: model.quantity,
        price: model.price,
        subtotal: model.price * model.quantity as i64,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
