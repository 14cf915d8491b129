use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub payment_gateway_url: String,
    pub payment_callback_url: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let payment_gateway_url = env::var("PAYMENT_GATEWAY_URL")
            .unwrap_or_else(|_| "https://sep.shaparak.ir/OnlinePG/SendToken".to_string());
        let payment_callback_url = env::var("PAYMENT_CALLBACK_URL")
            .unwrap_or_else(|_| format!("http://{host}:{port}/api/orders/payment-callback"));
        Ok(Self {
            port,
            database_url,
            host,
            payment_gateway_url,
            payment_callback_url,
        })
    }
}
