//! # API de Promociones
//!
//! CRUD de promociones y el endpoint de uso de cupones. El guard+incremento
//! del cupón no vive aquí: tanto esta ruta como la creación de reservaciones
//! delegan en [`MongoRepo::consumir_cupon`], la única operación del ledger.

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::{doc, oid::ObjectId, Bson};
use serde::Deserialize;
use serde_json::json;

use super::usuario::{require_empresa, usuario_autenticado};
use super::{AppError, AppResult};
use crate::db::{CategoriaPromocion, MongoRepo, Promocion, RolUsuario};
use crate::services::ServicioNotificaciones;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrearPromocion {
    place_id: String,
    titulo: String,
    descripcion: Option<String>,
    descuento: Option<f64>,
    precio_original: Option<f64>,
    precio_descuento: Option<f64>,
    /// timestamp unix; por defecto, ahora
    fecha_inicio: Option<i64>,
    fecha_fin: Option<i64>,
    categoria: Option<CategoriaPromocion>,
    imagen: Option<String>,
    cupones_disponibles: Option<i64>,
    condiciones: Option<String>,
    destacada: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActualizarPromocion {
    titulo: Option<String>,
    descripcion: Option<String>,
    descuento: Option<f64>,
    precio_original: Option<f64>,
    precio_descuento: Option<f64>,
    fecha_inicio: Option<i64>,
    // Some(None) limpia la fecha de fin
    #[serde(default, deserialize_with = "campo_anulable")]
    fecha_fin: Option<Option<i64>>,
    categoria: Option<CategoriaPromocion>,
    imagen: Option<String>,
    cupones_disponibles: Option<i64>,
    condiciones: Option<String>,
    destacada: Option<bool>,
    activa: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FiltroPromociones {
    empresa_id: Option<String>,
    place_id: Option<String>,
    categoria: Option<String>,
    activa: Option<bool>,
    destacada: Option<bool>,
    #[serde(default)]
    solo_activas: bool,
    page: Option<u64>,
    limit: Option<i64>,
}

/// Distingue "campo ausente" (None) de "campo en null" (Some(None))
fn campo_anulable<'de, D>(de: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Some(Option::<i64>::deserialize(de)?))
}

fn filtro_no_expirada(ahora: i64) -> Bson {
    Bson::Array(vec![
        Bson::Document(doc! { "fechaFin": null }),
        Bson::Document(doc! { "fechaFin": { "$gte": ahora } }),
    ])
}

#[get("/promociones")]
async fn listar_promociones(
    repo: web::Data<MongoRepo>,
    query: web::Query<FiltroPromociones>,
) -> AppResult<impl Responder> {
    let mut filter = doc! {};
    if let Some(empresa_id) = &query.empresa_id {
        filter.insert("empresaId", ObjectId::parse_str(empresa_id)
            .map_err(|_| AppError::Validation("ID de empresa inválido".to_string()))?);
    }
    if let Some(place_id) = &query.place_id {
        filter.insert("placeId", ObjectId::parse_str(place_id)
            .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?);
    }
    if let Some(categoria) = &query.categoria {
        filter.insert("categoria", categoria);
    }
    if let Some(activa) = query.activa {
        filter.insert("activa", activa);
    }
    if let Some(destacada) = query.destacada {
        filter.insert("destacada", destacada);
    }
    if query.solo_activas {
        filter.insert("$or", filtro_no_expirada(MongoRepo::current_timestamp()));
    }

    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let page = query.page.unwrap_or(1).max(1);
    let skip = (page - 1) * limit as u64;

    let total = repo
        .promociones()
        .count_documents(filter.clone())
        .await
        .map_err(|e| AppError::database("contar_promociones", e))?;

    let mut cursor = repo
        .promociones()
        .find(filter)
        .sort(doc! { "destacada": -1, "createdAt": -1 })
        .skip(skip)
        .limit(limit)
        .await
        .map_err(|e| AppError::database("listar_promociones", e))?;

    let mut promociones = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let promo = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando promoción: {}", e)))?;
        promociones.push(promo);
    }

    Ok(HttpResponse::Ok().json(json!({
        "promociones": promociones,
        "total": total,
        "pagina": page,
        "totalPaginas": (total + limit as u64 - 1) / limit as u64,
    })))
}

/// Promociones destacadas vigentes, para la portada del cliente
#[get("/promociones/destacadas")]
async fn promociones_destacadas(repo: web::Data<MongoRepo>) -> AppResult<impl Responder> {
    let filter = doc! {
        "activa": true,
        "destacada": true,
        "$or": filtro_no_expirada(MongoRepo::current_timestamp()),
    };

    let mut cursor = repo
        .promociones()
        .find(filter)
        .sort(doc! { "createdAt": -1 })
        .limit(10)
        .await
        .map_err(|e| AppError::database("promociones_destacadas", e))?;

    let mut promociones = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let promo = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando promoción: {}", e)))?;
        promociones.push(promo);
    }

    Ok(HttpResponse::Ok().json(promociones))
}

#[get("/promociones/{id}")]
async fn obtener_promocion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de promoción inválido".to_string()))?;

    let promo = repo
        .promociones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("obtener_promocion", e))?
        .ok_or(AppError::NotFound("Promoción no encontrada".to_string()))?;

    Ok(HttpResponse::Ok().json(promo))
}

#[post("/promociones")]
async fn crear_promocion(
    repo: web::Data<MongoRepo>,
    notificaciones: web::Data<ServicioNotificaciones>,
    data: web::Json<CrearPromocion>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    if data.titulo.trim().is_empty() {
        return Err(AppError::Validation("El título es requerido".to_string()));
    }
    let descuento = data.descuento.unwrap_or(0.0);
    if !(0.0..=100.0).contains(&descuento) {
        return Err(AppError::Validation(
            "El descuento debe estar entre 0 y 100".to_string(),
        ));
    }

    let place_id = ObjectId::parse_str(&data.place_id)
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    let lugar = repo
        .lugares()
        .find_one(doc! { "_id": place_id })
        .await
        .map_err(|e| AppError::database("buscar_lugar", e))?
        .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;

    if usuario.role != RolUsuario::Admin && lugar.user_id != usuario.id {
        return Err(AppError::Unauthorized(
            "El lugar no pertenece a esta empresa".to_string(),
        ));
    }

    let empresa_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let promocion = Promocion {
        id: None,
        empresa_id,
        place_id,
        titulo: data.titulo.trim().to_string(),
        descripcion: data.descripcion.clone(),
        lugar: lugar.nombre,
        descuento,
        precio_original: data.precio_original,
        precio_descuento: data.precio_descuento,
        fecha_inicio: data.fecha_inicio.unwrap_or_else(MongoRepo::current_timestamp),
        fecha_fin: data.fecha_fin,
        activa: true,
        categoria: data.categoria.unwrap_or(CategoriaPromocion::Otros),
        imagen: data.imagen.clone(),
        cupones_disponibles: data.cupones_disponibles.unwrap_or(-1),
        cupones_usados: 0,
        condiciones: data.condiciones.clone(),
        destacada: data.destacada.unwrap_or(false),
        created_at: MongoRepo::current_timestamp(),
    };

    let result = repo
        .promociones()
        .insert_one(&promocion)
        .await
        .map_err(|e| AppError::database("crear_promocion", e))?;

    let id = result
        .inserted_id
        .as_object_id()
        .ok_or_else(|| AppError::Internal("Insert sin ObjectId".to_string()))?;

    // Aviso a los clientes suscritos, fuera del camino de la respuesta
    let servicio = notificaciones.get_ref().clone();
    let mut creada = promocion;
    creada.id = Some(id);
    let para_notificar = creada.clone();
    tokio::spawn(async move {
        servicio.notificar_nueva_promocion(&para_notificar).await;
    });

    Ok(HttpResponse::Created().json(creada))
}

#[put("/promociones/{id}")]
async fn actualizar_promocion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<ActualizarPromocion>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de promoción inválido".to_string()))?;

    if let Some(descuento) = data.descuento {
        if !(0.0..=100.0).contains(&descuento) {
            return Err(AppError::Validation(
                "El descuento debe estar entre 0 y 100".to_string(),
            ));
        }
    }

    let mut set = doc! {};
    if let Some(titulo) = &data.titulo {
        set.insert("titulo", titulo);
    }
    if let Some(descripcion) = &data.descripcion {
        set.insert("descripcion", descripcion);
    }
    if let Some(descuento) = data.descuento {
        set.insert("descuento", descuento);
    }
    if let Some(precio) = data.precio_original {
        set.insert("precioOriginal", precio);
    }
    if let Some(precio) = data.precio_descuento {
        set.insert("precioDescuento", precio);
    }
    if let Some(inicio) = data.fecha_inicio {
        set.insert("fechaInicio", inicio);
    }
    if let Some(fin) = data.fecha_fin {
        set.insert("fechaFin", fin.map(Bson::Int64).unwrap_or(Bson::Null));
    }
    if let Some(categoria) = data.categoria {
        set.insert("categoria", categoria.as_str());
    }
    if let Some(imagen) = &data.imagen {
        set.insert("imagen", imagen);
    }
    if let Some(cupones) = data.cupones_disponibles {
        set.insert("cuponesDisponibles", cupones);
    }
    if let Some(condiciones) = &data.condiciones {
        set.insert("condiciones", condiciones);
    }
    if let Some(destacada) = data.destacada {
        set.insert("destacada", destacada);
    }
    if let Some(activa) = data.activa {
        set.insert("activa", activa);
    }

    if set.is_empty() {
        return Err(AppError::Validation("Nada que actualizar".to_string()));
    }

    let mut filter = doc! { "_id": id };
    if usuario.role != RolUsuario::Admin {
        filter.insert("empresaId", usuario.id);
    }

    let result = repo
        .promociones()
        .update_one(filter, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("actualizar_promocion", e))?;

    if result.matched_count == 0 {
        return Err(AppError::NotFound("Promoción no encontrada".to_string()));
    }

    let promo = repo
        .promociones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_promocion", e))?
        .ok_or(AppError::NotFound("Promoción no encontrada".to_string()))?;

    Ok(HttpResponse::Ok().json(promo))
}

/// Consume un cupón de la promoción.
///
/// Respuesta: `{"success": true, "cuponesRestantes": n | "Ilimitados"}`.
#[post("/promociones/{id}/usar-cupon")]
async fn usar_cupon(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de promoción inválido".to_string()))?;

    let restantes = repo.consumir_cupon(id).await?;

    let cupones_restantes = match restantes {
        Some(n) => json!(n),
        None => json!("Ilimitados"),
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cuponesRestantes": cupones_restantes,
    })))
}

#[delete("/promociones/{id}")]
async fn eliminar_promocion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de promoción inválido".to_string()))?;

    let mut filter = doc! { "_id": id };
    if usuario.role != RolUsuario::Admin {
        filter.insert("empresaId", usuario.id);
    }

    let result = repo
        .promociones()
        .delete_one(filter)
        .await
        .map_err(|e| AppError::database("eliminar_promocion", e))?;

    if result.deleted_count == 0 {
        return Err(AppError::NotFound("Promoción no encontrada".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    // Las rutas literales se registran antes que las dinámicas
    cfg.service(promociones_destacadas);
    cfg.service(listar_promociones);
    cfg.service(crear_promocion);
    cfg.service(usar_cupon);
    cfg.service(obtener_promocion);
    cfg.service(actualizar_promocion);
    cfg.service(eliminar_promocion);
}
