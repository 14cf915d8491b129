use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::orders::{PaymentCallbackRequest, PaymentCallbackResponse, PaymentTokenResponse},
    entity::orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    payment::verify_with_retry,
    response::{ApiResponse, Meta},
    state::AppState,
    status::{OrderStatus, PaymentStatus},
};

/// Issue a fresh gateway token for an order and remember it as the lookup
/// key for the callback. Regenerating a token for an unpaid order is fine
/// (retry-payment flow); a paid order keeps its token untouched.
pub async fn create_payment_token(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<PaymentTokenResponse>> {
    let order = Orders::find_by_id(order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id {
        ensure_admin(user)?;
    }
    if order.payment_status == PaymentStatus::Paid {
        return Err(AppError::AlreadyPaid);
    }

    let amount = order.total_price;
    let token = state
        .gateway
        .generate_token(order.id, amount, &state.config.payment_callback_url)
        .await?;
    let payment_url = state.gateway.payment_url(&token);

    let mut active: OrderActive = order.into();
    active.payment_token = Set(Some(token.clone()));
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "payment_token_issued",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id, "amount": amount })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment token issued",
        PaymentTokenResponse {
            token,
            payment_url,
            amount,
        },
        Some(Meta::empty()),
    ))
}

/// Reconcile an inbound gateway callback with exactly one order. The
/// gateway delivers at least once and in no particular order, so a
/// callback for an already-paid order is answered with the stored outcome
/// and changes nothing.
pub async fn payment_callback(
    state: &AppState,
    payload: PaymentCallbackRequest,
) -> AppResult<ApiResponse<PaymentCallbackResponse>> {
    let order = Orders::find()
        .filter(OrderCol::PaymentToken.eq(payload.token.clone()))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    if order.payment_status == PaymentStatus::Paid {
        let ref_id = order
            .payment_ref_id
            .clone()
            .unwrap_or_else(|| payload.ref_id.clone());
        return Ok(already_confirmed(order.id, ref_id));
    }

    if payload.status != "success" {
        mark_payment_failed(state, order.id).await?;
        return Err(AppError::PaymentFailed);
    }

    // Verification goes over the wire; do it before taking any row lock.
    let verified = verify_with_retry(state.gateway.as_ref(), &payload.token, &payload.ref_id).await?;
    if !verified {
        mark_payment_failed(state, order.id).await?;
        return Err(AppError::VerificationFailed);
    }

    let txn = state.orm.begin().await?;
    let order = Orders::find_by_id(order.id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    // a concurrent duplicate may have settled the order while we verified
    if order.payment_status == PaymentStatus::Paid {
        let ref_id = order
            .payment_ref_id
            .clone()
            .unwrap_or_else(|| payload.ref_id.clone());
        txn.commit().await?;
        return Ok(already_confirmed(order.id, ref_id));
    }
    if !order.payment_status.can_transition(PaymentStatus::Paid) {
        return Err(AppError::BadRequest(
            "order cannot be paid in its current state".into(),
        ));
    }

    let order_id = order.id;
    let advance = order.status.can_transition(OrderStatus::Processing);
    let mut active: OrderActive = order.into();
    active.payment_status = Set(PaymentStatus::Paid);
    if advance {
        active.status = Set(OrderStatus::Processing);
    }
    active.payment_ref_id = Set(Some(payload.ref_id.clone()));
    active.payment_date = Set(Some(Utc::now().into()));
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;
    txn.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        None,
        "payment_confirmed",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order_id, "ref_id": payload.ref_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }
    tracing::info!(order_id = %order_id, ref_id = %payload.ref_id, "payment confirmed");

    Ok(ApiResponse::success(
        "Payment confirmed",
        PaymentCallbackResponse {
            order_id,
            ref_id: payload.ref_id,
        },
        Some(Meta::empty()),
    ))
}

fn already_confirmed(order_id: Uuid, ref_id: String) -> ApiResponse<PaymentCallbackResponse> {
    ApiResponse::success(
        "Payment already confirmed",
        PaymentCallbackResponse { order_id, ref_id },
        Some(Meta::empty()),
    )
}

async fn mark_payment_failed(state: &AppState, order_id: Uuid) -> AppResult<()> {
    let txn = state.orm.begin().await?;
    let Some(order) = Orders::find_by_id(order_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
    else {
        return Ok(());
    };

    if order.payment_status.can_transition(PaymentStatus::Failed) {
        let mut active: OrderActive = order.into();
        active.payment_status = Set(PaymentStatus::Failed);
        active.updated_at = Set(Utc::now().into());
        active.update(&txn).await?;
        txn.commit().await?;
        tracing::info!(order_id = %order_id, "payment marked failed");
    }
    Ok(())
}
