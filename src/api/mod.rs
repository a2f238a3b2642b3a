pub mod errors;
pub mod estadisticas;
pub mod evento;
pub mod favorito;
pub mod lugar;
pub mod notificacion;
pub mod promocion;
pub mod reservacion;
pub mod usuario;

pub use errors::{AppError, AppResult, ErrorResponse};

use actix_web::web;

/// Registra todas las rutas de la API
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    usuario::routes(cfg);
    lugar::routes(cfg);
    promocion::routes(cfg);
    reservacion::routes(cfg);
    notificacion::routes(cfg);
    estadisticas::routes(cfg);
    evento::routes(cfg);
    favorito::routes(cfg);
}
