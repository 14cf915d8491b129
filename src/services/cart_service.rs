use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    SqlErr,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartItemView, CartView, UpdateCartItemRequest},
    entity::{
        cart_items::{self, Column as CartItemCol, Entity as CartItems},
        carts::{self, Column as CartCol, Entity as Carts},
        product_variants::{self, Column as VariantCol, Entity as ProductVariants},
        products::{self, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Product, ProductVariant},
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn view_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let view = load_cart_view(state, user).await?;
    Ok(ApiResponse::success("OK", view, Some(Meta::empty())))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }

    let product = Products::find_by_id(payload.product_id).one(&state.orm).await?;
    let product = match product {
        Some(p) if p.is_active => p,
        _ => return Err(AppError::BadRequest("product not available".into())),
    };

    if let Some(variant_id) = payload.variant_id {
        let variant = ProductVariants::find_by_id(variant_id).one(&state.orm).await?;
        let purchasable =
            variant.is_some_and(|v| v.product_id == product.id && v.is_active && v.stock > 0);
        if !purchasable {
            return Err(AppError::BadRequest("selected variant is not in stock".into()));
        }
    } else {
        let in_stock = ProductVariants::find()
            .filter(VariantCol::ProductId.eq(product.id))
            .filter(VariantCol::IsActive.eq(true))
            .filter(VariantCol::Stock.gt(0))
            .count(&state.orm)
            .await?;
        if in_stock == 0 {
            return Err(AppError::BadRequest("product is out of stock".into()));
        }
    }

    let cart = get_or_create_cart(state, user).await?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product.id))
        .one(&state.orm)
        .await?;

    match existing {
        Some(line) => increment_line(state, line.id, payload.quantity).await?,
        None => {
            let fresh = cart_items::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                variant_id: Set(payload.variant_id),
                quantity: Set(payload.quantity),
                created_at: NotSet,
            };
            match fresh.insert(&state.orm).await {
                Ok(_) => {}
                // lost the (cart, product) insert race; fold into the winner's line
                Err(err) if is_unique_violation(&err) => {
                    let line = CartItems::find()
                        .filter(CartItemCol::CartId.eq(cart.id))
                        .filter(CartItemCol::ProductId.eq(product.id))
                        .one(&state.orm)
                        .await?
                        .ok_or(AppError::NotFound)?;
                    increment_line(state, line.id, payload.quantity).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_add",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product.id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let view = load_cart_view(state, user).await?;
    Ok(ApiResponse::success("Added to cart", view, Some(Meta::empty())))
}

pub async fn update_cart_item(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartView>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }

    let line = find_owned_line(state, user, item_id).await?;
    let mut active: cart_items::ActiveModel = line.into();
    active.quantity = Set(payload.quantity);
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let view = load_cart_view(state, user).await?;
    Ok(ApiResponse::success("Cart updated", view, Some(Meta::empty())))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<ApiResponse<CartView>> {
    let line = find_owned_line(state, user, item_id).await?;
    CartItems::delete_by_id(line.id).exec(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "item_id": item_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    let view = load_cart_view(state, user).await?;
    Ok(ApiResponse::success(
        "Removed from cart",
        view,
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
    {
        CartItems::delete_many()
            .filter(CartItemCol::CartId.eq(cart.id))
            .exec(&state.orm)
            .await?;
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_clear",
        Some("cart_items"),
        None,
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Cart cleared",
        CartView {
            items: Vec::new(),
            total_price: 0,
            items_count: 0,
        },
        Some(Meta::empty()),
    ))
}

/// Assemble the live-priced view. A user without a cart row sees an empty
/// cart; nothing is created by reading.
async fn load_cart_view(state: &AppState, user: &AuthUser) -> AppResult<CartView> {
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?;
    let Some(cart) = cart else {
        return Ok(CartView {
            items: Vec::new(),
            total_price: 0,
            items_count: 0,
        });
    };

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .find_also_related(Products)
        .order_by_desc(CartItemCol::CreatedAt)
        .all(&state.orm)
        .await?;

    let variant_ids: Vec<Uuid> = rows
        .iter()
        .filter_map(|(item, _)| item.variant_id)
        .collect();
    let variants = if variant_ids.is_empty() {
        Vec::new()
    } else {
        ProductVariants::find()
            .filter(VariantCol::Id.is_in(variant_ids))
            .all(&state.orm)
            .await?
    };

    let mut items = Vec::with_capacity(rows.len());
    let mut total_price: i64 = 0;
    let mut items_count: i32 = 0;
    for (item, product) in rows {
        let product = product.ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("cart line {} has no product", item.id))
        })?;
        let variant = item
            .variant_id
            .and_then(|vid| variants.iter().find(|v| v.id == vid).cloned());
        let unit_price = variant.as_ref().map_or(product.price, |v| v.price);
        let subtotal = unit_price * item.quantity as i64;
        total_price += subtotal;
        items_count += item.quantity;
        items.push(CartItemView {
            id: item.id,
            product: product_from_entity(product),
            variant: variant.map(variant_from_entity),
            quantity: item.quantity,
            subtotal,
        });
    }

    Ok(CartView {
        items,
        total_price,
        items_count,
    })
}

async fn get_or_create_cart(state: &AppState, user: &AuthUser) -> AppResult<carts::Model> {
    if let Some(cart) = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&state.orm)
        .await?
    {
        return Ok(cart);
    }

    let fresh = carts::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        created_at: NotSet,
        updated_at: NotSet,
    };
    match fresh.insert(&state.orm).await {
        Ok(cart) => Ok(cart),
        // another request created it first; reuse that row
        Err(err) if is_unique_violation(&err) => Carts::find()
            .filter(CartCol::UserId.eq(user.user_id))
            .one(&state.orm)
            .await?
            .ok_or(AppError::NotFound),
        Err(err) => Err(err.into()),
    }
}

async fn find_owned_line(
    state: &AppState,
    user: &AuthUser,
    item_id: Uuid,
) -> AppResult<cart_items::Model> {
    let found = CartItems::find_by_id(item_id)
        .find_also_related(Carts)
        .one(&state.orm)
        .await?;
    match found {
        Some((line, Some(cart))) if cart.user_id == user.user_id => Ok(line),
        _ => Err(AppError::NotFound),
    }
}

async fn increment_line(state: &AppState, line_id: Uuid, by: i32) -> AppResult<()> {
    CartItems::update_many()
        .col_expr(
            CartItemCol::Quantity,
            Expr::col(CartItemCol::Quantity).add(by),
        )
        .filter(CartItemCol::Id.eq(line_id))
        .exec(&state.orm)
        .await?;
    Ok(())
}

fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

pub(crate) fn product_from_entity(model: products::Model) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub(crate) fn variant_from_entity(model: product_variants::Model) -> ProductVariant {
    ProductVariant {
        id: model.id,
        product_id: model.product_id,
        color: model.color,
        size: model.size,
        price: model.price,
        stock: model.stock,
        is_in_stock: model.stock > 0,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
