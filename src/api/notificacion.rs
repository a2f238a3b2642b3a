//! # API de Notificaciones
//!
//! Bandeja del usuario autenticado: listar, contar no leídas, marcar como
//! leída (una o todas) y borrar. El token resuelve al dueño; nadie ve la
//! bandeja de otro.

use actix_web::{delete, get, put, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::{doc, oid::ObjectId};
use serde::Deserialize;
use serde_json::json;

use super::usuario::usuario_autenticado;
use super::{AppError, AppResult};
use crate::db::MongoRepo;

#[derive(Deserialize)]
struct FiltroNotificaciones {
    leida: Option<bool>,
    limit: Option<i64>,
}

#[get("/notificaciones")]
async fn listar_notificaciones(
    repo: web::Data<MongoRepo>,
    query: web::Query<FiltroNotificaciones>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let mut filter = doc! { "userId": id };
    if let Some(leida) = query.leida {
        filter.insert("leida", leida);
    }

    let limit = query.limit.unwrap_or(50).clamp(1, 200);

    let mut cursor = repo
        .notificaciones()
        .find(filter)
        .sort(doc! { "fecha": -1 })
        .limit(limit)
        .await
        .map_err(|e| AppError::database("listar_notificaciones", e))?;

    let mut results = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let notificacion = cursor.deserialize_current().map_err(|e| {
            AppError::Internal(format!("Error deserializando notificación: {}", e))
        })?;
        results.push(notificacion);
    }

    Ok(HttpResponse::Ok().json(results))
}

#[get("/notificaciones/no-leidas")]
async fn contar_no_leidas(
    repo: web::Data<MongoRepo>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let total = repo
        .notificaciones()
        .count_documents(doc! { "userId": id, "leida": false })
        .await
        .map_err(|e| AppError::database("contar_no_leidas", e))?;

    Ok(HttpResponse::Ok().json(json!({ "noLeidas": total })))
}

/// Marca una notificación como leída. Idempotente: repetirla no cambia nada.
#[put("/notificaciones/{id}/leida")]
async fn marcar_leida(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de notificación inválido".to_string()))?;

    let result = repo
        .notificaciones()
        .update_one(
            doc! { "_id": id, "userId": user_id, "leida": false },
            doc! { "$set": {
                "leida": true,
                "fechaLeida": MongoRepo::current_timestamp(),
            }},
        )
        .await
        .map_err(|e| AppError::database("marcar_leida", e))?;

    // Si no casó como no-leída puede ser que ya estaba leída; eso no es error
    if result.matched_count == 0 {
        let existe = repo
            .notificaciones()
            .count_documents(doc! { "_id": id, "userId": user_id })
            .await
            .map_err(|e| AppError::database("verificar_notificacion", e))?;
        if existe == 0 {
            return Err(AppError::NotFound(
                "Notificación no encontrada".to_string(),
            ));
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[put("/notificaciones/leer-todas")]
async fn marcar_todas_leidas(
    repo: web::Data<MongoRepo>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let result = repo
        .notificaciones()
        .update_many(
            doc! { "userId": user_id, "leida": false },
            doc! { "$set": {
                "leida": true,
                "fechaLeida": MongoRepo::current_timestamp(),
            }},
        )
        .await
        .map_err(|e| AppError::database("marcar_todas_leidas", e))?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "modificadas": result.modified_count,
    })))
}

#[delete("/notificaciones/{id}")]
async fn eliminar_notificacion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de notificación inválido".to_string()))?;

    let result = repo
        .notificaciones()
        .delete_one(doc! { "_id": id, "userId": user_id })
        .await
        .map_err(|e| AppError::database("eliminar_notificacion", e))?;

    if result.deleted_count == 0 {
        return Err(AppError::NotFound(
            "Notificación no encontrada".to_string(),
        ));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(listar_notificaciones);
    cfg.service(contar_no_leidas);
    cfg.service(marcar_todas_leidas);
    cfg.service(marcar_leida);
    cfg.service(eliminar_notificacion);
}
