//! Backend de turismo y reservaciones: lugares, promociones con cupones,
//! reservaciones con su ciclo de vida y notificaciones push.

mod api;
mod db;
mod services;

use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::db::MongoRepo;
use crate::services::ServicioNotificaciones;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "service": "turismo-reservas",
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("turismo_reservas=debug,mongodb=info")),
        )
        .init();

    let repo = MongoRepo::init().await.map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Error inicializando MongoDB: {}", e),
        )
    })?;

    // Los índices no son fatales: sin ellos el servicio arranca degradado
    if let Err(e) = repo.create_indexes().await {
        tracing::warn!(error = %e, "No se pudieron crear los índices");
    }

    let notificaciones = ServicioNotificaciones::new(repo.clone());

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    tracing::info!(address = %bind_address, "Servidor iniciando");

    let repo_data = web::Data::new(repo);
    let notificaciones_data = web::Data::new(notificaciones);

    HttpServer::new(move || {
        App::new()
            .app_data(repo_data.clone())
            .app_data(notificaciones_data.clone())
            .wrap(Logger::default())
            .configure(api::init_routes)
            .route("/", web::get().to(health))
    })
    .bind(bind_address.as_str())?
    .run()
    .await
}
