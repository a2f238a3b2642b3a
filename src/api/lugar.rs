//! # API de Lugares
//!
//! CRUD de lugares turísticos, propiedad de la empresa que los publica.
//! Las reseñas viven embebidas dentro del lugar.

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::{doc, oid::ObjectId, to_bson, Document};
use serde::Deserialize;
use serde_json::json;

use super::usuario::{require_empresa, usuario_autenticado};
use super::{AppError, AppResult};
use crate::db::{Lugar, MongoRepo, Resena, RolUsuario};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrearLugar {
    nombre: String,
    dept: String,
    img: Option<String>,
    #[serde(default)]
    galeria: Vec<String>,
    descripcion: Option<String>,
    ubicacion: Option<String>,
    horario: Option<String>,
    precio: Option<String>,
    #[serde(default)]
    servicios: Vec<String>,
    contacto: Option<String>,
    web: Option<String>,
}

#[derive(Deserialize)]
struct ActualizarLugar {
    nombre: Option<String>,
    dept: Option<String>,
    img: Option<String>,
    galeria: Option<Vec<String>>,
    descripcion: Option<String>,
    ubicacion: Option<String>,
    horario: Option<String>,
    precio: Option<String>,
    servicios: Option<Vec<String>>,
    contacto: Option<String>,
    web: Option<String>,
}

impl ActualizarLugar {
    /// Documento `$set` con los campos presentes en la petición
    fn como_set(&self) -> Document {
        let mut set = doc! {};
        if let Some(nombre) = &self.nombre {
            set.insert("nombre", nombre.trim());
        }
        if let Some(dept) = &self.dept {
            set.insert("dept", dept.trim());
        }
        if let Some(img) = &self.img {
            set.insert("img", img);
        }
        if let Some(galeria) = &self.galeria {
            set.insert("galeria", galeria.clone());
        }
        if let Some(descripcion) = &self.descripcion {
            set.insert("descripcion", descripcion);
        }
        if let Some(ubicacion) = &self.ubicacion {
            set.insert("ubicacion", ubicacion);
        }
        if let Some(horario) = &self.horario {
            set.insert("horario", horario);
        }
        if let Some(precio) = &self.precio {
            set.insert("precio", precio);
        }
        if let Some(servicios) = &self.servicios {
            set.insert("servicios", servicios.clone());
        }
        if let Some(contacto) = &self.contacto {
            set.insert("contacto", contacto);
        }
        if let Some(web) = &self.web {
            set.insert("web", web);
        }
        set
    }
}

#[derive(Deserialize)]
struct FiltroLugares {
    dept: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct NuevaResena {
    texto: String,
    rating: i32,
}

#[post("/lugares")]
async fn crear_lugar(
    repo: web::Data<MongoRepo>,
    data: web::Json<CrearLugar>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    if data.nombre.trim().is_empty() {
        return Err(AppError::Validation("El nombre es requerido".to_string()));
    }
    if data.dept.trim().is_empty() {
        return Err(AppError::Validation("El departamento es requerido".to_string()));
    }

    let lugar = Lugar {
        id: None,
        nombre: data.nombre.trim().to_string(),
        dept: data.dept.trim().to_string(),
        img: data.img.clone(),
        galeria: data.galeria.clone(),
        rating: 0.0,
        descripcion: data.descripcion.clone(),
        ubicacion: data.ubicacion.clone(),
        horario: data.horario.clone(),
        precio: data.precio.clone(),
        servicios: data.servicios.clone(),
        contacto: data.contacto.clone(),
        web: data.web.clone(),
        resenas: Vec::new(),
        user_id: usuario.id,
        created_at: MongoRepo::current_timestamp(),
    };

    let result = repo
        .lugares()
        .insert_one(lugar)
        .await
        .map_err(|e| AppError::database("crear_lugar", e))?;

    Ok(HttpResponse::Created().json(json!({
        "id": result.inserted_id.as_object_id().map(|o| o.to_hex()).unwrap_or_default(),
    })))
}

#[get("/lugares")]
async fn listar_lugares(
    repo: web::Data<MongoRepo>,
    query: web::Query<FiltroLugares>,
) -> AppResult<impl Responder> {
    let mut filter = doc! {};
    if let Some(dept) = &query.dept {
        filter.insert("dept", dept);
    }
    if let Some(user_id) = &query.user_id {
        let oid = ObjectId::parse_str(user_id)
            .map_err(|_| AppError::Validation("ID de empresa inválido".to_string()))?;
        filter.insert("userId", oid);
    }

    let mut cursor = repo
        .lugares()
        .find(filter)
        .await
        .map_err(|e| AppError::database("listar_lugares", e))?;

    let mut results = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let lugar = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando lugar: {}", e)))?;
        results.push(lugar);
    }

    Ok(HttpResponse::Ok().json(results))
}

#[get("/lugares/{id}")]
async fn obtener_lugar(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let lugar = repo
        .lugares()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("obtener_lugar", e))?
        .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;

    Ok(HttpResponse::Ok().json(lugar))
}

/// Edición parcial de un lugar. El admin puede editar cualquiera; la
/// empresa solo los suyos.
#[put("/lugares/{id}")]
async fn actualizar_lugar(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<ActualizarLugar>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    if let Some(nombre) = &data.nombre {
        if nombre.trim().is_empty() {
            return Err(AppError::Validation("El nombre es requerido".to_string()));
        }
    }
    if let Some(dept) = &data.dept {
        if dept.trim().is_empty() {
            return Err(AppError::Validation("El departamento es requerido".to_string()));
        }
    }

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let set = data.como_set();
    if set.is_empty() {
        return Err(AppError::Validation("Nada que actualizar".to_string()));
    }

    let mut filter = doc! { "_id": id };
    if usuario.role != RolUsuario::Admin {
        filter.insert("userId", usuario.id);
    }

    let result = repo
        .lugares()
        .update_one(filter, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("actualizar_lugar", e))?;

    if result.matched_count == 0 {
        return Err(AppError::NotFound("Lugar no encontrado".to_string()));
    }

    let lugar = repo
        .lugares()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_lugar", e))?
        .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;

    Ok(HttpResponse::Ok().json(lugar))
}

/// Agrega una reseña embebida al lugar
#[post("/lugares/{id}/reseñas")]
async fn agregar_resena(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<NuevaResena>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;

    if !(1..=5).contains(&data.rating) {
        return Err(AppError::Validation(
            "Rating debe estar entre 1 y 5".to_string(),
        ));
    }
    if data.texto.trim().is_empty() {
        return Err(AppError::Validation("El texto es requerido".to_string()));
    }

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let resena = Resena {
        usuario: usuario.name,
        texto: data.texto.trim().to_string(),
        rating: data.rating,
    };
    let resena_bson = to_bson(&resena)
        .map_err(|e| AppError::Internal(format!("Error serializando reseña: {}", e)))?;

    let result = repo
        .lugares()
        .update_one(doc! { "_id": id }, doc! { "$push": { "reseñas": resena_bson } })
        .await
        .map_err(|e| AppError::database("agregar_resena", e))?;

    if result.matched_count == 0 {
        return Err(AppError::NotFound("Lugar no encontrado".to_string()));
    }

    Ok(HttpResponse::Created().json(json!({ "success": true })))
}

/// Borra un lugar. El borrado no cascadea: reservaciones y favoritos que lo
/// referencien quedan con referencia colgante.
#[delete("/lugares/{id}")]
async fn eliminar_lugar(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let mut filter = doc! { "_id": id };
    // El admin puede borrar cualquier lugar; la empresa solo los suyos
    if usuario.role != RolUsuario::Admin {
        filter.insert("userId", usuario.id);
    }

    let result = repo
        .lugares()
        .delete_one(filter)
        .await
        .map_err(|e| AppError::database("eliminar_lugar", e))?;

    if result.deleted_count == 0 {
        return Err(AppError::NotFound("Lugar no encontrado".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(crear_lugar);
    cfg.service(listar_lugares);
    cfg.service(obtener_lugar);
    cfg.service(actualizar_lugar);
    cfg.service(agregar_resena);
    cfg.service(eliminar_lugar);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actualizacion_vacia_no_produce_set() {
        let data = ActualizarLugar {
            nombre: None,
            dept: None,
            img: None,
            galeria: None,
            descripcion: None,
            ubicacion: None,
            horario: None,
            precio: None,
            servicios: None,
            contacto: None,
            web: None,
        };
        assert!(data.como_set().is_empty());
    }

    #[test]
    fn actualizacion_solo_incluye_campos_presentes() {
        let data = ActualizarLugar {
            nombre: Some("  Ruta de las Flores  ".to_string()),
            dept: None,
            img: None,
            galeria: Some(vec!["a.jpg".to_string()]),
            descripcion: None,
            ubicacion: Some("Sonsonate".to_string()),
            horario: None,
            precio: None,
            servicios: None,
            contacto: None,
            web: None,
        };
        let set = data.como_set();
        assert_eq!(set.get_str("nombre").unwrap(), "Ruta de las Flores");
        assert_eq!(set.get_str("ubicacion").unwrap(), "Sonsonate");
        assert!(set.get_array("galeria").is_ok());
        assert_eq!(set.len(), 3);
        // lo ausente no se toca
        assert!(set.get("dept").is_none());
    }
}
