//! # API de Eventos
//!
//! Agenda personal del usuario: recordatorios de visitas con fecha y lugar
//! opcional.

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId, Document};
use serde::Deserialize;
use serde_json::json;

use super::usuario::usuario_autenticado;
use super::{AppError, AppResult};
use crate::db::{Evento, MongoRepo};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrearEvento {
    title: String,
    /// YYYY-MM-DD
    date: String,
    place_id: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActualizarEvento {
    title: Option<String>,
    /// YYYY-MM-DD
    date: Option<String>,
    notes: Option<String>,
}

impl ActualizarEvento {
    fn como_set(&self) -> Document {
        let mut set = doc! {};
        if let Some(title) = &self.title {
            set.insert("title", title.trim());
        }
        if let Some(date) = &self.date {
            set.insert("date", date);
        }
        if let Some(notes) = &self.notes {
            set.insert("notes", notes);
        }
        set
    }
}

#[post("/eventos")]
async fn crear_evento(
    repo: web::Data<MongoRepo>,
    data: web::Json<CrearEvento>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    if data.title.trim().is_empty() {
        return Err(AppError::Validation("El título es requerido".to_string()));
    }
    NaiveDate::parse_from_str(&data.date, "%Y-%m-%d")
        .map_err(|_| AppError::Validation("Formato de fecha inválido, use YYYY-MM-DD".to_string()))?;

    let place_id = match &data.place_id {
        Some(pid) => Some(
            ObjectId::parse_str(pid)
                .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?,
        ),
        None => None,
    };

    let evento = Evento {
        id: None,
        title: data.title.trim().to_string(),
        date: data.date.clone(),
        user_id,
        place_id,
        notes: data.notes.clone(),
        created_at: MongoRepo::current_timestamp(),
    };

    let result = repo
        .eventos()
        .insert_one(evento)
        .await
        .map_err(|e| AppError::database("crear_evento", e))?;

    Ok(HttpResponse::Created().json(json!({
        "id": result.inserted_id.as_object_id().map(|o| o.to_hex()).unwrap_or_default(),
    })))
}

#[get("/eventos")]
async fn listar_eventos(
    repo: web::Data<MongoRepo>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let mut cursor = repo
        .eventos()
        .find(doc! { "userId": user_id })
        .sort(doc! { "date": 1 })
        .await
        .map_err(|e| AppError::database("listar_eventos", e))?;

    let mut results = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let evento = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando evento: {}", e)))?;
        results.push(evento);
    }

    Ok(HttpResponse::Ok().json(results))
}

/// Edición parcial de un evento propio
#[put("/eventos/{id}")]
async fn actualizar_evento(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<ActualizarEvento>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    if let Some(title) = &data.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("El título es requerido".to_string()));
        }
    }
    if let Some(date) = &data.date {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            AppError::Validation("Formato de fecha inválido, use YYYY-MM-DD".to_string())
        })?;
    }

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de evento inválido".to_string()))?;

    let set = data.como_set();
    if set.is_empty() {
        return Err(AppError::Validation("Nada que actualizar".to_string()));
    }

    let result = repo
        .eventos()
        .update_one(doc! { "_id": id, "userId": user_id }, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("actualizar_evento", e))?;

    if result.matched_count == 0 {
        return Err(AppError::NotFound("Evento no encontrado".to_string()));
    }

    let evento = repo
        .eventos()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_evento", e))?
        .ok_or(AppError::NotFound("Evento no encontrado".to_string()))?;

    Ok(HttpResponse::Ok().json(evento))
}

#[delete("/eventos/{id}")]
async fn eliminar_evento(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de evento inválido".to_string()))?;

    let result = repo
        .eventos()
        .delete_one(doc! { "_id": id, "userId": user_id })
        .await
        .map_err(|e| AppError::database("eliminar_evento", e))?;

    if result.deleted_count == 0 {
        return Err(AppError::NotFound("Evento no encontrado".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(crear_evento);
    cfg.service(listar_eventos);
    cfg.service(actualizar_evento);
    cfg.service(eliminar_evento);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actualizacion_vacia_no_produce_set() {
        let data = ActualizarEvento {
            title: None,
            date: None,
            notes: None,
        };
        assert!(data.como_set().is_empty());
    }

    #[test]
    fn actualizacion_recorta_el_titulo() {
        let data = ActualizarEvento {
            title: Some("  Feria gastronómica  ".to_string()),
            date: Some("2026-09-12".to_string()),
            notes: None,
        };
        let set = data.como_set();
        assert_eq!(set.get_str("title").unwrap(), "Feria gastronómica");
        assert_eq!(set.get_str("date").unwrap(), "2026-09-12");
        assert_eq!(set.len(), 2);
    }
}
