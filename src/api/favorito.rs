//! # API de Favoritos
//!
//! Lugares marcados por el usuario. La unicidad usuario+lugar la garantiza
//! el índice único de la colección.

use actix_web::{delete, get, post, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::{doc, oid::ObjectId};
use serde::Deserialize;
use serde_json::json;

use super::errors::es_clave_duplicada;
use super::usuario::usuario_autenticado;
use super::{AppError, AppResult};
use crate::db::{Favorito, MongoRepo};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NuevoFavorito {
    lugar_id: String,
}

#[post("/favoritos")]
async fn agregar_favorito(
    repo: web::Data<MongoRepo>,
    data: web::Json<NuevoFavorito>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let usuario_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let lugar_id = ObjectId::parse_str(&data.lugar_id)
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    repo.lugares()
        .find_one(doc! { "_id": lugar_id })
        .await
        .map_err(|e| AppError::database("buscar_lugar", e))?
        .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;

    let favorito = Favorito {
        id: None,
        usuario_id,
        lugar_id,
        created_at: MongoRepo::current_timestamp(),
    };

    let result = repo.favoritos().insert_one(favorito).await;
    match result {
        Ok(r) => Ok(HttpResponse::Created().json(json!({
            "id": r.inserted_id.as_object_id().map(|o| o.to_hex()).unwrap_or_default(),
        }))),
        // El índice único convierte el duplicado en un error de escritura
        Err(e) if es_clave_duplicada(&e) => Err(AppError::Conflict(
            "El lugar ya está en favoritos".to_string(),
        )),
        Err(e) => Err(AppError::database("agregar_favorito", e)),
    }
}

#[get("/favoritos")]
async fn listar_favoritos(
    repo: web::Data<MongoRepo>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let usuario_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let mut cursor = repo
        .favoritos()
        .find(doc! { "usuarioId": usuario_id })
        .sort(doc! { "createdAt": -1 })
        .await
        .map_err(|e| AppError::database("listar_favoritos", e))?;

    let mut results = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let favorito = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando favorito: {}", e)))?;
        results.push(favorito);
    }

    Ok(HttpResponse::Ok().json(results))
}

#[delete("/favoritos/{lugarId}")]
async fn quitar_favorito(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let usuario_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let lugar_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let result = repo
        .favoritos()
        .delete_one(doc! { "usuarioId": usuario_id, "lugarId": lugar_id })
        .await
        .map_err(|e| AppError::database("quitar_favorito", e))?;

    if result.deleted_count == 0 {
        return Err(AppError::NotFound("Favorito no encontrado".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(agregar_favorito);
    cfg.service(listar_favoritos);
    cfg.service(quitar_favorito);
}
