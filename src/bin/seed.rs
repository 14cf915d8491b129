use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, create_pool, run_migrations},
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let pool = create_pool(&config.database_url).await?;

    let admin_id = ensure_user(&pool, "admin@example.com", "admin").await?;
    let user_id = ensure_user(&pool, "user@example.com", "user").await?;
    ensure_address(&pool, user_id).await?;
    seed_catalog(&pool).await?;

    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    Ok(())
}

async fn ensure_user(pool: &sqlx::PgPool, email: &str, role: &str) -> anyhow::Result<Uuid> {
    // Credentials live with the identity provider; the row only anchors FKs.
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, 'external', $3)
        ON CONFLICT (email) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(role)
    .fetch_optional(pool)
    .await?;

    let user_id = match row {
        Some((id,)) => id,
        None => {
            let existing: (Uuid,) = sqlx::query_as("SELECT id FROM users WHERE email = $1")
                .bind(email)
                .fetch_one(pool)
                .await?;
            existing.0
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn ensure_address(pool: &sqlx::PgPool, user_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO addresses (id, user_id, full_name, phone_number, province, city, postal_code, address_line, is_default)
        SELECT $1, $2, 'Sample Customer', '09120000000', 'Tehran', 'Tehran', '1234567890', 'No. 1, Example St.', TRUE
        WHERE NOT EXISTS (SELECT 1 FROM addresses WHERE user_id = $2)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .execute(pool)
    .await?;

    println!("Ensured default address");
    Ok(())
}

async fn seed_catalog(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let products = vec![
        ("Linen Shirt", "Breathable summer shirt", 450_000_i64),
        ("Denim Jacket", "Classic mid-weight jacket", 1_200_000),
        ("Wool Scarf", "Hand-woven winter scarf", 300_000),
    ];

    for (name, desc, price) in products {
        let product_id = Uuid::new_v4();
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO products (id, name, description, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(product_id)
        .bind(name)
        .bind(desc)
        .bind(price)
        .fetch_optional(pool)
        .await?;

        let Some((product_id,)) = inserted else {
            continue;
        };

        for (color, size, stock) in [("black", "M", 20), ("black", "L", 15), ("white", "M", 10)] {
            sqlx::query(
                r#"
                INSERT INTO product_variants (id, product_id, color, size, price, stock)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (product_id, color, size) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(product_id)
            .bind(color)
            .bind(size)
            .bind(price)
            .bind(stock)
            .execute(pool)
            .await?;
        }
    }

    println!("Seeded catalog");
    Ok(())
}
