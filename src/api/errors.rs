//! # Manejo de errores
//!
//! Taxonomía de errores de la aplicación y su traducción a respuestas HTTP.
//! Los errores 4xx devuelven `{"error": mensaje}` tal como lo espera el
//! cliente móvil; los 5xx ocultan el detalle y lo dejan en el log.

use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Entrada malformada o fuera de rango
    #[error("Error de validación: {0}")]
    Validation(String),

    /// La operación no es válida para el estado actual de la entidad
    /// (promoción inactiva o expirada, reservación no completada, transición
    /// fuera del grafo de estados)
    #[error("Estado inválido: {0}")]
    EstadoInvalido(String),

    /// Cancelación repetida de una reservación ya cancelada
    #[error("Ya cancelada: {0}")]
    YaCancelada(String),

    /// El ledger de cupones no admite un uso más
    #[error("Cupones agotados: {0}")]
    CuponesAgotados(String),

    /// Entidad referenciada inexistente
    #[error("No encontrado: {0}")]
    NotFound(String),

    /// Token de acceso ausente, inválido o sin el rol requerido
    #[error("No autorizado: {0}")]
    Unauthorized(String),

    /// Recurso duplicado (email registrado, favorito repetido)
    #[error("Conflicto: {0}")]
    Conflict(String),

    /// Error de base de datos con contexto de operación
    #[error("Error de base de datos en operación '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: mongodb::error::Error,
    },

    /// Error interno genérico
    #[error("Error interno: {0}")]
    Internal(String),
}

impl AppError {
    pub fn database(operation: &str, source: mongodb::error::Error) -> Self {
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        match self {
            Self::Validation(msg)
            | Self::EstadoInvalido(msg)
            | Self::YaCancelada(msg)
            | Self::CuponesAgotados(msg) => {
                tracing::warn!(error = %self, "Solicitud rechazada");
                HttpResponse::BadRequest().json(ErrorResponse { error: msg.clone() })
            }
            Self::NotFound(msg) => {
                tracing::info!(error = %msg, "Recurso no encontrado");
                HttpResponse::NotFound().json(ErrorResponse { error: msg.clone() })
            }
            Self::Unauthorized(msg) => {
                tracing::warn!(error = %msg, "Acceso no autorizado");
                HttpResponse::Unauthorized().json(ErrorResponse { error: msg.clone() })
            }
            Self::Conflict(msg) => {
                tracing::warn!(error = %msg, "Conflicto de recurso");
                HttpResponse::Conflict().json(ErrorResponse { error: msg.clone() })
            }
            Self::Database { operation, source } => {
                tracing::error!(
                    operation = %operation,
                    error = %source,
                    "Database error occurred"
                );
                HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Error interno del servidor".to_string(),
                })
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Error interno del servidor".to_string(),
                })
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Detecta el choque con un índice único (código de error 11000 del servidor)
pub fn es_clave_duplicada(e: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        *e.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref we)) if we.code == 11000
    )
}

// Conversión automática desde mongodb::error::Error
impl From<mongodb::error::Error> for AppError {
    fn from(error: mongodb::error::Error) -> Self {
        Self::Database {
            operation: "database_operation".to_string(),
            source: error,
        }
    }
}

// Conversión desde errores de ObjectId
impl From<mongodb::bson::oid::Error> for AppError {
    fn from(e: mongodb::bson::oid::Error) -> Self {
        Self::Validation(format!("Identificador inválido: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_generico_no_es_clave_duplicada() {
        let error = mongodb::error::Error::custom("cualquier otra cosa");
        assert!(!es_clave_duplicada(&error));
    }
}
