//! # API de Reservaciones
//!
//! Ciclo de vida completo de una reservación:
//! - Crear (cliente): valida lugar y promoción, congela precio y descuento,
//!   genera el código de confirmación y consume el cupón.
//! - Cambiar estado (empresa): transiciones sujetas al grafo de estados.
//! - Cancelar (cliente): solo reservaciones pendientes.
//! - Calificar (cliente): solo reservaciones completadas.
//! - Listados paginados por cliente y por empresa, estadísticas por periodo
//!   y búsqueda por código de confirmación.
//!
//! Las notificaciones que disparan estas operaciones son best-effort: se
//! lanzan con `tokio::spawn` y su fallo jamás afecta la respuesta.

use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::errors::es_clave_duplicada;
use super::estadisticas::{inicio_periodo, resumen_reservaciones};
use super::usuario::{require_empresa, usuario_autenticado};
use super::{AppError, AppResult};
use crate::db::{
    calcular_precio_final, generar_codigo_confirmacion, EstadoCupon, EstadoReservacion, Lugar,
    MetodoPago, MongoRepo, Promocion, Reservacion, RolUsuario, TipoServicio,
};
use crate::services::ServicioNotificaciones;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrearReservacion {
    place_id: String,
    promotion_id: Option<String>,
    /// YYYY-MM-DD
    fecha_reservacion: String,
    /// HH:MM
    hora_reservacion: String,
    numero_personas: i32,
    tipo_servicio: TipoServicio,
    descripcion: Option<String>,
    precio_original: f64,
    nombre_contacto: String,
    telefono_contacto: String,
    email_contacto: String,
    notas_especiales: Option<String>,
    metodo_pago: Option<MetodoPago>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CambioEstado {
    estado: String,
    notas_empresa: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Calificar {
    calificacion: i32,
    comentario_cliente: Option<String>,
}

#[derive(Deserialize)]
struct FiltroCliente {
    estado: Option<String>,
    page: Option<u64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FiltroEmpresa {
    estado: Option<String>,
    lugar_id: Option<String>,
    page: Option<u64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct FiltroPeriodo {
    periodo: Option<String>,
}

/// Datos del lugar que viajan junto a la reservación para mostrarla
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LugarResumen {
    id: String,
    nombre: String,
    ubicacion: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromocionResumen {
    id: String,
    titulo: String,
    descuento: f64,
}

/// Reservación lista para el cliente: ObjectIds en hexadecimal y, cuando se
/// pudieron resolver, lugar y promoción poblados
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReservacionResponse {
    id: String,
    user_id: String,
    place_id: String,
    promotion_id: Option<String>,
    fecha_reservacion: String,
    hora_reservacion: String,
    numero_personas: i32,
    tipo_servicio: TipoServicio,
    descripcion: Option<String>,
    precio_original: f64,
    descuento_aplicado: f64,
    precio_final: f64,
    estado: EstadoReservacion,
    nombre_contacto: String,
    telefono_contacto: String,
    email_contacto: String,
    notas_especiales: Option<String>,
    notas_empresa: Option<String>,
    fecha_creacion: i64,
    fecha_confirmacion: Option<i64>,
    fecha_cancelacion: Option<i64>,
    metodo_pago: MetodoPago,
    pagado: bool,
    calificacion: Option<i32>,
    comentario_cliente: Option<String>,
    codigo_confirmacion: String,
    lugar: Option<LugarResumen>,
    promocion: Option<PromocionResumen>,
}

impl From<Reservacion> for ReservacionResponse {
    fn from(r: Reservacion) -> Self {
        ReservacionResponse {
            id: r.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: r.user_id.to_hex(),
            place_id: r.place_id.to_hex(),
            promotion_id: r.promotion_id.map(|id| id.to_hex()),
            fecha_reservacion: r.fecha_reservacion,
            hora_reservacion: r.hora_reservacion,
            numero_personas: r.numero_personas,
            tipo_servicio: r.tipo_servicio,
            descripcion: r.descripcion,
            precio_original: r.precio_original,
            descuento_aplicado: r.descuento_aplicado,
            precio_final: r.precio_final,
            estado: r.estado,
            nombre_contacto: r.nombre_contacto,
            telefono_contacto: r.telefono_contacto,
            email_contacto: r.email_contacto,
            notas_especiales: r.notas_especiales,
            notas_empresa: r.notas_empresa,
            fecha_creacion: r.fecha_creacion,
            fecha_confirmacion: r.fecha_confirmacion,
            fecha_cancelacion: r.fecha_cancelacion,
            metodo_pago: r.metodo_pago,
            pagado: r.pagado,
            calificacion: r.calificacion,
            comentario_cliente: r.comentario_cliente,
            codigo_confirmacion: r.codigo_confirmacion,
            lugar: None,
            promocion: None,
        }
    }
}

fn validar_fecha(date_str: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| AppError::Validation("Formato de fecha inválido, use YYYY-MM-DD".to_string()))
}

fn validar_hora(time_str: &str) -> AppResult<NaiveTime> {
    NaiveTime::parse_from_str(time_str, "%H:%M")
        .map_err(|_| AppError::Validation("Formato de hora inválido, use HH:MM".to_string()))
}

fn validar_email(email: &str) -> bool {
    email.contains('@') && email.contains('.')
}

fn paginacion(page: Option<u64>, limit: Option<i64>) -> (u64, i64, u64) {
    let limit = limit.unwrap_or(20).clamp(1, 100);
    let page = page.unwrap_or(1).max(1);
    ((page - 1) * limit as u64, limit, page)
}

fn filtro_estado(estado: &Option<String>) -> AppResult<Option<EstadoReservacion>> {
    match estado {
        None => Ok(None),
        Some(s) => EstadoReservacion::parse(s)
            .map(Some)
            .ok_or(AppError::Validation("Estado no válido".to_string())),
    }
}

/// Resuelve en bloque los lugares y promociones referenciados por un lote de
/// reservaciones (dos consultas `$in`, no una por fila)
async fn adjuntar_detalles(
    repo: &MongoRepo,
    reservaciones: Vec<Reservacion>,
) -> AppResult<Vec<ReservacionResponse>> {
    let lugar_ids: Vec<ObjectId> = reservaciones.iter().map(|r| r.place_id).collect();
    let promo_ids: Vec<ObjectId> = reservaciones
        .iter()
        .filter_map(|r| r.promotion_id)
        .collect();

    let mut lugares: HashMap<ObjectId, Lugar> = HashMap::new();
    if !lugar_ids.is_empty() {
        let mut cursor = repo
            .lugares()
            .find(doc! { "_id": { "$in": lugar_ids } })
            .await
            .map_err(|e| AppError::database("buscar_lugares", e))?;
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
        {
            let lugar: Lugar = cursor
                .deserialize_current()
                .map_err(|e| AppError::Internal(format!("Error deserializando lugar: {}", e)))?;
            if let Some(id) = lugar.id {
                lugares.insert(id, lugar);
            }
        }
    }

    let mut promociones: HashMap<ObjectId, Promocion> = HashMap::new();
    if !promo_ids.is_empty() {
        let mut cursor = repo
            .promociones()
            .find(doc! { "_id": { "$in": promo_ids } })
            .await
            .map_err(|e| AppError::database("buscar_promociones", e))?;
        while cursor
            .advance()
            .await
            .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
        {
            let promo: Promocion = cursor.deserialize_current().map_err(|e| {
                AppError::Internal(format!("Error deserializando promoción: {}", e))
            })?;
            if let Some(id) = promo.id {
                promociones.insert(id, promo);
            }
        }
    }

    Ok(reservaciones
        .into_iter()
        .map(|r| {
            let lugar = lugares.get(&r.place_id).map(|l| LugarResumen {
                id: r.place_id.to_hex(),
                nombre: l.nombre.clone(),
                ubicacion: l.ubicacion.clone(),
            });
            let promocion = r.promotion_id.and_then(|pid| {
                promociones.get(&pid).map(|p| PromocionResumen {
                    id: pid.to_hex(),
                    titulo: p.titulo.clone(),
                    descuento: p.descuento,
                })
            });
            let mut resp = ReservacionResponse::from(r);
            resp.lugar = lugar;
            resp.promocion = promocion;
            resp
        })
        .collect())
}

async fn detalle_unico(
    repo: &MongoRepo,
    reservacion: Reservacion,
) -> AppResult<ReservacionResponse> {
    let mut detalles = adjuntar_detalles(repo, vec![reservacion]).await?;
    detalles
        .pop()
        .ok_or_else(|| AppError::Internal("Detalle vacío".to_string()))
}

/// Lugares que pertenecen a una empresa
async fn lugares_de_empresa(repo: &MongoRepo, empresa_id: ObjectId) -> AppResult<Vec<ObjectId>> {
    let mut cursor = repo
        .lugares()
        .find(doc! { "userId": empresa_id })
        .await
        .map_err(|e| AppError::database("lugares_de_empresa", e))?;

    let mut ids = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let lugar: Lugar = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando lugar: {}", e)))?;
        if let Some(id) = lugar.id {
            ids.push(id);
        }
    }
    Ok(ids)
}

async fn listar_con_paginacion(
    repo: &MongoRepo,
    filter: mongodb::bson::Document,
    skip: u64,
    limit: i64,
    page: u64,
) -> AppResult<HttpResponse> {
    let total = repo
        .reservaciones()
        .count_documents(filter.clone())
        .await
        .map_err(|e| AppError::database("contar_reservaciones", e))?;

    let mut cursor = repo
        .reservaciones()
        .find(filter)
        .sort(doc! { "fechaCreacion": -1 })
        .skip(skip)
        .limit(limit)
        .await
        .map_err(|e| AppError::database("listar_reservaciones", e))?;

    let mut reservaciones = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let reservacion = cursor.deserialize_current().map_err(|e| {
            AppError::Internal(format!("Error deserializando reservación: {}", e))
        })?;
        reservaciones.push(reservacion);
    }

    let detalles = adjuntar_detalles(repo, reservaciones).await?;

    Ok(HttpResponse::Ok().json(json!({
        "reservaciones": detalles,
        "total": total,
        "pagina": page,
        "totalPaginas": (total + limit as u64 - 1) / limit as u64,
    })))
}

/// Crea una nueva reservación.
///
/// El precio final y el descuento quedan congelados aquí; ediciones
/// posteriores de la promoción no los alteran. El cupón se consume después
/// de persistir la reservación: si esa segunda escritura falla, la
/// reservación sobrevive y el fallo solo se registra en el log.
#[post("/reservaciones")]
async fn crear_reservacion(
    repo: web::Data<MongoRepo>,
    notificaciones: web::Data<ServicioNotificaciones>,
    data: web::Json<CrearReservacion>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let user_id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    // Validaciones de entrada
    if data.nombre_contacto.trim().is_empty() {
        return Err(AppError::Validation(
            "El nombre de contacto es requerido".to_string(),
        ));
    }
    if !validar_email(&data.email_contacto) {
        return Err(AppError::Validation("Email de contacto inválido".to_string()));
    }
    if data.telefono_contacto.trim().is_empty() {
        return Err(AppError::Validation(
            "El teléfono de contacto es requerido".to_string(),
        ));
    }
    if data.numero_personas < 1 {
        return Err(AppError::Validation(
            "El número de personas debe ser mayor a 0".to_string(),
        ));
    }
    if data.precio_original < 0.0 {
        return Err(AppError::Validation(
            "El precio original no puede ser negativo".to_string(),
        ));
    }
    validar_fecha(&data.fecha_reservacion)?;
    validar_hora(&data.hora_reservacion)?;

    let place_id = ObjectId::parse_str(&data.place_id)
        .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;

    repo.lugares()
        .find_one(doc! { "_id": place_id })
        .await
        .map_err(|e| AppError::database("buscar_lugar", e))?
        .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;

    // Promoción opcional: debe existir, estar activa y no haber expirado
    let mut promotion_id = None;
    let mut descuento_aplicado = 0.0;
    if let Some(pid) = &data.promotion_id {
        let pid = ObjectId::parse_str(pid)
            .map_err(|_| AppError::Validation("ID de promoción inválido".to_string()))?;

        let promocion = repo
            .promociones()
            .find_one(doc! { "_id": pid })
            .await
            .map_err(|e| AppError::database("buscar_promocion", e))?
            .ok_or(AppError::NotFound("Promoción no encontrada".to_string()))?;

        match promocion.estado_cupon(MongoRepo::current_timestamp()) {
            EstadoCupon::Inactiva => {
                return Err(AppError::EstadoInvalido(
                    "Promoción no está activa".to_string(),
                ))
            }
            EstadoCupon::Expirada => {
                return Err(AppError::EstadoInvalido("Promoción ha expirado".to_string()))
            }
            // Agotada no bloquea la creación: el ledger decide al consumir
            EstadoCupon::Agotada | EstadoCupon::Disponible(_) => {}
        }

        descuento_aplicado = promocion.descuento;
        promotion_id = Some(pid);
    }

    let precio_final = calcular_precio_final(data.precio_original, descuento_aplicado);

    let mut reservacion = Reservacion {
        id: None,
        user_id,
        place_id,
        promotion_id,
        fecha_reservacion: data.fecha_reservacion.clone(),
        hora_reservacion: data.hora_reservacion.clone(),
        numero_personas: data.numero_personas,
        tipo_servicio: data.tipo_servicio,
        descripcion: data.descripcion.clone(),
        precio_original: data.precio_original,
        descuento_aplicado,
        precio_final,
        estado: EstadoReservacion::Pendiente,
        nombre_contacto: data.nombre_contacto.trim().to_string(),
        telefono_contacto: data.telefono_contacto.trim().to_string(),
        email_contacto: data.email_contacto.clone(),
        notas_especiales: data.notas_especiales.clone(),
        notas_empresa: None,
        fecha_creacion: MongoRepo::current_timestamp(),
        fecha_confirmacion: None,
        fecha_cancelacion: None,
        metodo_pago: data.metodo_pago.unwrap_or_default(),
        pagado: false,
        calificacion: None,
        comentario_cliente: None,
        codigo_confirmacion: generar_codigo_confirmacion(),
    };

    let result = match repo.reservaciones().insert_one(&reservacion).await {
        Ok(r) => r,
        // Choque improbable del índice único sobre el código: regenerar una
        // vez y reintentar antes de rendirse
        Err(e) if es_clave_duplicada(&e) => {
            tracing::warn!(
                codigo = %reservacion.codigo_confirmacion,
                "Código de confirmación repetido, regenerando"
            );
            reservacion.codigo_confirmacion = generar_codigo_confirmacion();
            repo.reservaciones()
                .insert_one(&reservacion)
                .await
                .map_err(|e| AppError::database("crear_reservacion", e))?
        }
        Err(e) => return Err(AppError::database("crear_reservacion", e)),
    };

    let id = result
        .inserted_id
        .as_object_id()
        .ok_or_else(|| AppError::Internal("Insert sin ObjectId".to_string()))?;

    // Consumo del cupón: best-effort, fuera de la unidad atómica de la
    // reservación. Un fallo aquí deja el contador sin incrementar y solo
    // se reporta como warning.
    if let Some(pid) = promotion_id {
        if let Err(e) = repo.consumir_cupon(pid).await {
            tracing::warn!(
                reservacion = %id.to_hex(),
                promocion = %pid.to_hex(),
                error = %e,
                "No se pudo consumir el cupón de la promoción"
            );
        }
    }

    let mut persistida = reservacion;
    persistida.id = Some(id);

    // Aviso a la empresa, fuera del camino de la respuesta
    let servicio = notificaciones.get_ref().clone();
    let para_notificar = persistida.clone();
    tokio::spawn(async move {
        servicio.notificar_nueva_reservacion(&para_notificar).await;
    });

    let detalle = detalle_unico(repo.get_ref(), persistida).await?;
    Ok(HttpResponse::Created().json(detalle))
}

#[get("/reservaciones/cliente/{userId}")]
async fn reservaciones_cliente(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    query: web::Query<FiltroCliente>,
) -> AppResult<impl Responder> {
    let user_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de usuario inválido".to_string()))?;

    let mut filter = doc! { "userId": user_id };
    if let Some(estado) = filtro_estado(&query.estado)? {
        filter.insert("estado", estado.as_str());
    }

    let (skip, limit, page) = paginacion(query.page, query.limit);
    listar_con_paginacion(repo.get_ref(), filter, skip, limit, page).await
}

#[get("/reservaciones/empresa/{empresaId}")]
async fn reservaciones_empresa(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    query: web::Query<FiltroEmpresa>,
) -> AppResult<impl Responder> {
    let empresa_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de empresa inválido".to_string()))?;

    let lugar_ids = lugares_de_empresa(repo.get_ref(), empresa_id).await?;

    let mut filter = doc! { "placeId": { "$in": lugar_ids } };
    if let Some(lugar_id) = &query.lugar_id {
        let oid = ObjectId::parse_str(lugar_id)
            .map_err(|_| AppError::Validation("ID de lugar inválido".to_string()))?;
        filter.insert("placeId", oid);
    }
    if let Some(estado) = filtro_estado(&query.estado)? {
        filter.insert("estado", estado.as_str());
    }

    let (skip, limit, page) = paginacion(query.page, query.limit);
    listar_con_paginacion(repo.get_ref(), filter, skip, limit, page).await
}

/// Estadísticas de reservaciones de la empresa en un periodo
/// (`semana`, `mes` o `año`; por defecto `mes`)
#[get("/reservaciones/empresa/{empresaId}/estadisticas")]
async fn estadisticas_empresa(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    query: web::Query<FiltroPeriodo>,
) -> AppResult<impl Responder> {
    let empresa_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de empresa inválido".to_string()))?;

    let lugar_ids = lugares_de_empresa(repo.get_ref(), empresa_id).await?;

    let ahora = chrono::Utc::now();
    let desde = inicio_periodo(query.periodo.as_deref().unwrap_or("mes"), ahora);

    let mut cursor = repo
        .reservaciones()
        .find(doc! {
            "placeId": { "$in": lugar_ids },
            "fechaCreacion": { "$gte": desde },
        })
        .await
        .map_err(|e| AppError::database("estadisticas_empresa", e))?;

    let mut reservaciones = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let reservacion = cursor.deserialize_current().map_err(|e| {
            AppError::Internal(format!("Error deserializando reservación: {}", e))
        })?;
        reservaciones.push(reservacion);
    }

    Ok(HttpResponse::Ok().json(resumen_reservaciones(&reservaciones)))
}

#[get("/reservaciones/codigo/{codigo}")]
async fn reservacion_por_codigo(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let codigo = path.into_inner();

    let reservacion = repo
        .reservaciones()
        .find_one(doc! { "codigoConfirmacion": &codigo })
        .await
        .map_err(|e| AppError::database("reservacion_por_codigo", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    let detalle = detalle_unico(repo.get_ref(), reservacion).await?;
    Ok(HttpResponse::Ok().json(detalle))
}

#[get("/reservaciones/{id}")]
async fn obtener_reservacion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de reservación inválido".to_string()))?;

    let reservacion = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("obtener_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    let detalle = detalle_unico(repo.get_ref(), reservacion).await?;
    Ok(HttpResponse::Ok().json(detalle))
}

/// Cambia el estado de una reservación (ruta de la empresa).
///
/// Solo se aceptan aristas del grafo de estados; `completada → pendiente` y
/// cualquier otra salida de un estado terminal se rechazan.
#[put("/reservaciones/{id}/estado")]
async fn cambiar_estado(
    repo: web::Data<MongoRepo>,
    notificaciones: web::Data<ServicioNotificaciones>,
    path: web::Path<String>,
    data: web::Json<CambioEstado>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    require_empresa(&usuario)?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de reservación inválido".to_string()))?;

    let nuevo = EstadoReservacion::parse(&data.estado)
        .ok_or(AppError::Validation("Estado no válido".to_string()))?;

    let reservacion = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("buscar_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    // La reservación debe ser de un lugar de esta empresa
    if usuario.role != RolUsuario::Admin {
        let lugar = repo
            .lugares()
            .find_one(doc! { "_id": reservacion.place_id })
            .await
            .map_err(|e| AppError::database("buscar_lugar", e))?
            .ok_or(AppError::NotFound("Lugar no encontrado".to_string()))?;
        if lugar.user_id != usuario.id {
            return Err(AppError::Unauthorized(
                "La reservación no pertenece a esta empresa".to_string(),
            ));
        }
    }

    if !reservacion.estado.puede_transicionar(nuevo) {
        return Err(AppError::EstadoInvalido(format!(
            "Transición no permitida: {} → {}",
            reservacion.estado.as_str(),
            nuevo.as_str()
        )));
    }

    let ahora = MongoRepo::current_timestamp();
    let mut set = doc! { "estado": nuevo.as_str() };
    match nuevo {
        EstadoReservacion::Confirmada => {
            set.insert("fechaConfirmacion", ahora);
        }
        EstadoReservacion::Cancelada => {
            set.insert("fechaCancelacion", ahora);
        }
        _ => {}
    }
    if let Some(notas) = &data.notas_empresa {
        set.insert("notasEmpresa", notas);
    }

    // El estado leído viaja en el filtro: si otra petición ganó la carrera,
    // esta actualización no casa y se rechaza
    let result = repo
        .reservaciones()
        .update_one(
            doc! { "_id": id, "estado": reservacion.estado.as_str() },
            doc! { "$set": set },
        )
        .await
        .map_err(|e| AppError::database("cambiar_estado", e))?;

    if result.modified_count == 0 {
        return Err(AppError::Conflict(
            "La reservación fue modificada por otra operación".to_string(),
        ));
    }

    let actualizada = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    // Aviso al cliente, fuera del camino de la respuesta
    let servicio = notificaciones.get_ref().clone();
    let para_notificar = actualizada.clone();
    tokio::spawn(async move {
        servicio
            .notificar_cambio_estado(&para_notificar, nuevo)
            .await;
    });

    let detalle = detalle_unico(repo.get_ref(), actualizada).await?;
    Ok(HttpResponse::Ok().json(detalle))
}

/// Cancela una reservación (ruta del cliente).
///
/// Más estricta que el cambio de estado de la empresa: el cliente solo puede
/// cancelar reservaciones pendientes.
#[put("/reservaciones/{id}/cancelar")]
async fn cancelar_reservacion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de reservación inválido".to_string()))?;

    let reservacion = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("buscar_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    if usuario.role != RolUsuario::Admin && Some(reservacion.user_id) != usuario.id {
        return Err(AppError::Unauthorized(
            "La reservación no pertenece a este usuario".to_string(),
        ));
    }

    match reservacion.estado {
        EstadoReservacion::Cancelada => {
            return Err(AppError::YaCancelada(
                "Reservación ya está cancelada".to_string(),
            ))
        }
        EstadoReservacion::Completada => {
            return Err(AppError::EstadoInvalido(
                "No se puede cancelar una reservación completada".to_string(),
            ))
        }
        EstadoReservacion::Confirmada => {
            return Err(AppError::EstadoInvalido(
                "Solo se pueden cancelar reservaciones pendientes".to_string(),
            ))
        }
        EstadoReservacion::Pendiente => {}
    }

    let result = repo
        .reservaciones()
        .update_one(
            doc! { "_id": id, "estado": "pendiente" },
            doc! { "$set": {
                "estado": "cancelada",
                "fechaCancelacion": MongoRepo::current_timestamp(),
            }},
        )
        .await
        .map_err(|e| AppError::database("cancelar_reservacion", e))?;

    if result.modified_count == 0 {
        return Err(AppError::Conflict(
            "La reservación fue modificada por otra operación".to_string(),
        ));
    }

    let actualizada = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    let detalle = detalle_unico(repo.get_ref(), actualizada).await?;
    Ok(HttpResponse::Ok().json(detalle))
}

/// Califica una reservación completada. No cambia el estado.
#[put("/reservaciones/{id}/calificar")]
async fn calificar_reservacion(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<Calificar>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    // La calificación se valida antes que cualquier otra cosa
    if !(1..=5).contains(&data.calificacion) {
        return Err(AppError::Validation(
            "Calificación debe estar entre 1 y 5".to_string(),
        ));
    }

    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;

    let id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de reservación inválido".to_string()))?;

    let reservacion = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("buscar_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    if usuario.role != RolUsuario::Admin && Some(reservacion.user_id) != usuario.id {
        return Err(AppError::Unauthorized(
            "La reservación no pertenece a este usuario".to_string(),
        ));
    }

    if reservacion.estado != EstadoReservacion::Completada {
        return Err(AppError::EstadoInvalido(
            "Solo se pueden calificar reservaciones completadas".to_string(),
        ));
    }

    let mut set = doc! { "calificacion": data.calificacion };
    if let Some(comentario) = &data.comentario_cliente {
        set.insert("comentarioCliente", comentario);
    }

    repo.reservaciones()
        .update_one(doc! { "_id": id }, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("calificar_reservacion", e))?;

    let actualizada = repo
        .reservaciones()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_reservacion", e))?
        .ok_or(AppError::NotFound("Reservación no encontrada".to_string()))?;

    let detalle = detalle_unico(repo.get_ref(), actualizada).await?;
    Ok(HttpResponse::Ok().json(detalle))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    // Las rutas literales se registran antes que `/{id}`
    cfg.service(crear_reservacion);
    cfg.service(reservaciones_cliente);
    cfg.service(estadisticas_empresa);
    cfg.service(reservaciones_empresa);
    cfg.service(reservacion_por_codigo);
    cfg.service(cambiar_estado);
    cfg.service(cancelar_reservacion);
    cfg.service(calificar_reservacion);
    cfg.service(obtener_reservacion);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fecha_valida() {
        assert!(validar_fecha("2026-03-15").is_ok());
        assert!(validar_fecha("2026-3-5").is_err());
        assert!(validar_fecha("15/03/2026").is_err());
        assert!(validar_fecha("2026-13-01").is_err());
    }

    #[test]
    fn hora_valida() {
        assert!(validar_hora("09:30").is_ok());
        assert!(validar_hora("23:59").is_ok());
        assert!(validar_hora("24:00").is_err());
        assert!(validar_hora("9h30").is_err());
    }

    #[test]
    fn paginacion_con_defaults() {
        assert_eq!(paginacion(None, None), (0, 20, 1));
        assert_eq!(paginacion(Some(3), Some(10)), (20, 10, 3));
        // valores fuera de rango se acotan
        assert_eq!(paginacion(Some(0), Some(0)), (0, 1, 1));
        assert_eq!(paginacion(Some(1), Some(1_000)), (0, 100, 1));
    }

    #[test]
    fn filtro_de_estado() {
        assert_eq!(filtro_estado(&None).unwrap(), None);
        assert_eq!(
            filtro_estado(&Some("pendiente".to_string())).unwrap(),
            Some(EstadoReservacion::Pendiente)
        );
        assert!(filtro_estado(&Some("archivada".to_string())).is_err());
    }
}
