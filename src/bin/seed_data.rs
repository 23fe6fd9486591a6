//! Seed data script - populates the product catalogue with a demo menu
//!
//! Run with: cargo run --bin seed-data
//!
//! Products are only inserted when the catalogue is empty, so running the
//! script twice is harmless.

use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::info;

use pos_api::{
    config,
    db,
    services::products::{NewProduct, ProductService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), false);

    info!("=== POS API Seed Data ===");
    info!("Connecting to database: {}", cfg.database_url);

    let pool = db::establish_connection_from_app_config(&cfg).await?;
    db::run_migrations(&pool).await?;
    let products = ProductService::new(Arc::new(pool));

    let existing = products.list_products().await?;
    if !existing.is_empty() {
        info!(
            "Catalogue already has {} products; nothing to do",
            existing.len()
        );
        return Ok(());
    }

    let menu = vec![
        ("Nasi Goreng", dec!(25000), "Mains"),
        ("Mie Ayam", dec!(20000), "Mains"),
        ("Sate Ayam", dec!(30000), "Mains"),
        ("Gado-Gado", dec!(18000), "Mains"),
        ("Es Teh Manis", dec!(5000), "Drinks"),
        ("Es Jeruk", dec!(8000), "Drinks"),
        ("Kopi Susu", dec!(15000), "Drinks"),
        ("Pisang Goreng", dec!(12000), "Snacks"),
    ];

    let mut created = 0usize;
    for (name, price, category) in menu {
        products
            .create_product(NewProduct {
                name: name.to_string(),
                price,
                category: Some(category.to_string()),
                image_url: None,
            })
            .await?;
        created += 1;
    }
    info!("  Created {} products", created);

    info!("\n=== Seed Data Complete ===");
    info!("Try these API calls:");
    info!("  curl http://{}:{}/api/v1/orders", cfg.host, cfg.port);
    info!("  curl http://{}:{}/api/v1/reports/sales", cfg.host, cfg.port);
    info!("");
    info!(
        "Or explore interactively at: http://{}:{}/swagger-ui",
        cfg.host, cfg.port
    );

    Ok(())
}
