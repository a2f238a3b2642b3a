//! # Estadísticas de empresa
//!
//! Panel de la empresa: agregados de promociones, cupones, lugares y
//! reservaciones. La agregación corre en memoria sobre los documentos de la
//! empresa; las funciones de cálculo son puras para poder probarlas sin base
//! de datos.

use actix_web::{get, web, HttpResponse, Responder};
use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use mongodb::bson::{doc, oid::ObjectId};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use super::{AppError, AppResult};
use crate::db::{EstadoReservacion, Lugar, MongoRepo, Promocion, Reservacion};

/// Ventana mensual `[inicio, fin)` con su etiqueta `M/YY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MesBucket {
    pub inicio: i64,
    pub fin: i64,
    pub etiqueta: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumenReservaciones {
    pub total: u64,
    pub pendientes: u64,
    pub confirmadas: u64,
    pub canceladas: u64,
    pub completadas: u64,
    /// Suma de `precioFinal` de las reservaciones completadas
    pub ingresos: f64,
    /// Promedio de calificaciones redondeado a 1 decimal; 0 si no hay ninguna
    pub calificacion_promedio: f64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PuntoMensual {
    pub mes: String,
    pub total: i64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct PuntoReservaciones {
    pub mes: String,
    pub total: i64,
    /// Ingresos del mes: suma de `precioFinal` de las completadas
    pub ingresos: f64,
}

/// Las últimas `n` ventanas mensuales terminando en el mes de `ahora`,
/// en orden cronológico
pub fn ultimos_meses(ahora: DateTime<Utc>, n: u32) -> Vec<MesBucket> {
    let inicio_mes_actual = Utc
        .with_ymd_and_hms(ahora.year(), ahora.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(ahora);

    let mut buckets = Vec::with_capacity(n as usize);
    for i in (0..n).rev() {
        let inicio = inicio_mes_actual - Months::new(i);
        let fin = inicio + Months::new(1);
        buckets.push(MesBucket {
            inicio: inicio.timestamp(),
            fin: fin.timestamp(),
            etiqueta: format!("{}/{:02}", inicio.month(), inicio.year() % 100),
        });
    }
    buckets
}

/// Timestamp a partir del cual una reservación entra en el periodo pedido
/// (`semana`, `mes` o `año`; cualquier otro valor cae en `mes`)
pub fn inicio_periodo(periodo: &str, ahora: DateTime<Utc>) -> i64 {
    let delta = match periodo {
        "semana" => Duration::days(7),
        "año" => Duration::days(365),
        _ => Duration::days(30),
    };
    (ahora - delta).timestamp()
}

pub fn resumen_reservaciones(reservaciones: &[Reservacion]) -> ResumenReservaciones {
    let contar = |estado: EstadoReservacion| {
        reservaciones.iter().filter(|r| r.estado == estado).count() as u64
    };

    let ingresos = reservaciones
        .iter()
        .filter(|r| r.estado == EstadoReservacion::Completada)
        .map(|r| r.precio_final)
        .sum();

    // Solo cuentan las calificaciones de reservaciones completadas
    let calificaciones: Vec<i32> = reservaciones
        .iter()
        .filter(|r| r.estado == EstadoReservacion::Completada)
        .filter_map(|r| r.calificacion)
        .collect();
    let calificacion_promedio = if calificaciones.is_empty() {
        0.0
    } else {
        let suma: i32 = calificaciones.iter().sum();
        (suma as f64 / calificaciones.len() as f64 * 10.0).round() / 10.0
    };

    ResumenReservaciones {
        total: reservaciones.len() as u64,
        pendientes: contar(EstadoReservacion::Pendiente),
        confirmadas: contar(EstadoReservacion::Confirmada),
        canceladas: contar(EstadoReservacion::Cancelada),
        completadas: contar(EstadoReservacion::Completada),
        ingresos,
        calificacion_promedio,
    }
}

/// Reservaciones creadas dentro de cada ventana mensual, con los ingresos
/// de las completadas de ese mes
pub fn reservaciones_por_mes(
    reservaciones: &[Reservacion],
    meses: &[MesBucket],
) -> Vec<PuntoReservaciones> {
    meses
        .iter()
        .map(|mes| {
            let del_mes: Vec<&Reservacion> = reservaciones
                .iter()
                .filter(|r| r.fecha_creacion >= mes.inicio && r.fecha_creacion < mes.fin)
                .collect();
            PuntoReservaciones {
                mes: mes.etiqueta.clone(),
                total: del_mes.len() as i64,
                ingresos: del_mes
                    .iter()
                    .filter(|r| r.estado == EstadoReservacion::Completada)
                    .map(|r| r.precio_final)
                    .sum(),
            }
        })
        .collect()
}

/// Cupones usados por mes.
///
/// Los usos no guardan timestamp propio, así que el total de cada promoción
/// se atribuye completo al mes en que la promoción fue creada. Es una
/// aproximación: una promoción vieja que sigue consumiendo cupones los
/// acumula en su mes de origen.
pub fn cupones_por_mes(promociones: &[Promocion], meses: &[MesBucket]) -> Vec<PuntoMensual> {
    meses
        .iter()
        .map(|mes| PuntoMensual {
            mes: mes.etiqueta.clone(),
            total: promociones
                .iter()
                .filter(|p| p.created_at >= mes.inicio && p.created_at < mes.fin)
                .map(|p| p.cupones_usados)
                .sum(),
        })
        .collect()
}

/// Panel de estadísticas de una empresa: promociones, cupones, lugares con
/// sus favoritos y el resumen de reservaciones de los últimos 12 meses
#[get("/usuarios/empresas/{id}/estadisticas")]
async fn estadisticas_panel(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
) -> AppResult<impl Responder> {
    let empresa_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de empresa inválido".to_string()))?;

    let ahora = Utc::now();
    let meses = ultimos_meses(ahora, 12);

    // Promociones de la empresa
    let mut cursor = repo
        .promociones()
        .find(doc! { "empresaId": empresa_id })
        .await
        .map_err(|e| AppError::database("estadisticas_promociones", e))?;

    let mut promociones: Vec<Promocion> = Vec::new();
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

    let ts = ahora.timestamp();
    let activas = promociones
        .iter()
        .filter(|p| p.activa && p.fecha_fin.map_or(true, |fin| ts <= fin))
        .count();
    let destacadas = promociones.iter().filter(|p| p.destacada).count();
    let total_cupones_usados: i64 = promociones.iter().map(|p| p.cupones_usados).sum();

    let mut por_categoria: BTreeMap<&'static str, i64> = BTreeMap::new();
    for promo in &promociones {
        *por_categoria.entry(promo.categoria.as_str()).or_insert(0) += 1;
    }

    // Lugares de la empresa, cada uno con su conteo de favoritos
    let mut cursor = repo
        .lugares()
        .find(doc! { "userId": empresa_id })
        .await
        .map_err(|e| AppError::database("estadisticas_lugares", e))?;

    let mut lugares: Vec<Lugar> = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| AppError::Internal(format!("Error iterando cursor: {}", e)))?
    {
        let lugar = cursor
            .deserialize_current()
            .map_err(|e| AppError::Internal(format!("Error deserializando lugar: {}", e)))?;
        lugares.push(lugar);
    }

    let mut lugares_resumen = Vec::with_capacity(lugares.len());
    let mut lugar_ids = Vec::with_capacity(lugares.len());
    for lugar in &lugares {
        let id = match lugar.id {
            Some(id) => id,
            None => continue,
        };
        lugar_ids.push(id);
        let favoritos = repo
            .favoritos()
            .count_documents(doc! { "lugarId": id })
            .await
            .map_err(|e| AppError::database("contar_favoritos", e))?;
        lugares_resumen.push(json!({
            "id": id.to_hex(),
            "nombre": lugar.nombre,
            "rating": lugar.rating,
            "favoritos": favoritos,
        }));
    }

    // Reservaciones de los últimos 12 meses sobre los lugares de la empresa
    let desde = meses.first().map(|m| m.inicio).unwrap_or(0);
    let mut cursor = repo
        .reservaciones()
        .find(doc! {
            "placeId": { "$in": lugar_ids },
            "fechaCreacion": { "$gte": desde },
        })
        .await
        .map_err(|e| AppError::database("estadisticas_reservaciones", e))?;

    let mut reservaciones: Vec<Reservacion> = Vec::new();
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

    Ok(HttpResponse::Ok().json(json!({
        "promociones": {
            "total": promociones.len(),
            "activas": activas,
            "inactivas": promociones.len() - activas,
            "destacadas": destacadas,
            "cuponesUsados": total_cupones_usados,
            "porCategoria": por_categoria,
            "cuponesPorMes": cupones_por_mes(&promociones, &meses),
        },
        "lugares": lugares_resumen,
        "reservaciones": resumen_reservaciones(&reservaciones),
        "reservacionesPorMes": reservaciones_por_mes(&reservaciones, &meses),
    })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(estadisticas_panel);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MetodoPago, TipoServicio};

    fn reservacion(estado: EstadoReservacion, precio_final: f64, creada: i64) -> Reservacion {
        Reservacion {
            id: Some(ObjectId::new()),
            user_id: ObjectId::new(),
            place_id: ObjectId::new(),
            promotion_id: None,
            fecha_reservacion: "2026-03-15".to_string(),
            hora_reservacion: "19:00".to_string(),
            numero_personas: 2,
            tipo_servicio: TipoServicio::Comida,
            descripcion: None,
            precio_original: precio_final,
            descuento_aplicado: 0.0,
            precio_final,
            estado,
            nombre_contacto: "Ana".to_string(),
            telefono_contacto: "7777-7777".to_string(),
            email_contacto: "ana@ejemplo.com".to_string(),
            notas_especiales: None,
            notas_empresa: None,
            fecha_creacion: creada,
            fecha_confirmacion: None,
            fecha_cancelacion: None,
            metodo_pago: MetodoPago::Efectivo,
            pagado: false,
            calificacion: None,
            comentario_cliente: None,
            codigo_confirmacion: "RSV-000001AAA".to_string(),
        }
    }

    #[test]
    fn doce_ventanas_cronologicas() {
        let ahora = Utc.with_ymd_and_hms(2026, 8, 25, 12, 0, 0).unwrap();
        let meses = ultimos_meses(ahora, 12);
        assert_eq!(meses.len(), 12);
        assert_eq!(meses[0].etiqueta, "9/25");
        assert_eq!(meses[11].etiqueta, "8/26");
        // ventanas contiguas y sin huecos
        for par in meses.windows(2) {
            assert_eq!(par[0].fin, par[1].inicio);
        }
    }

    #[test]
    fn etiqueta_cruza_el_cambio_de_ano() {
        let ahora = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let meses = ultimos_meses(ahora, 3);
        let etiquetas: Vec<&str> = meses.iter().map(|m| m.etiqueta.as_str()).collect();
        assert_eq!(etiquetas, vec!["11/25", "12/25", "1/26"]);
    }

    #[test]
    fn periodos_relativos() {
        let ahora = Utc.with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap();
        let semana = inicio_periodo("semana", ahora);
        let mes = inicio_periodo("mes", ahora);
        let ano = inicio_periodo("año", ahora);
        assert_eq!(ahora.timestamp() - semana, 7 * 86_400);
        assert_eq!(ahora.timestamp() - mes, 30 * 86_400);
        assert_eq!(ahora.timestamp() - ano, 365 * 86_400);
        // periodo desconocido cae en mes
        assert_eq!(inicio_periodo("trimestre", ahora), mes);
    }

    #[test]
    fn resumen_cuenta_e_ingresa_solo_completadas() {
        let mut completada = reservacion(EstadoReservacion::Completada, 80.0, 100);
        completada.calificacion = Some(5);
        let mut otra = reservacion(EstadoReservacion::Completada, 20.0, 100);
        otra.calificacion = Some(4);
        // una calificación fuera de completada no entra en el promedio
        let mut cancelada = reservacion(EstadoReservacion::Cancelada, 70.0, 100);
        cancelada.calificacion = Some(1);
        let lote = vec![
            reservacion(EstadoReservacion::Pendiente, 50.0, 100),
            reservacion(EstadoReservacion::Confirmada, 60.0, 100),
            cancelada,
            completada,
            otra,
        ];

        let resumen = resumen_reservaciones(&lote);
        assert_eq!(resumen.total, 5);
        assert_eq!(resumen.pendientes, 1);
        assert_eq!(resumen.confirmadas, 1);
        assert_eq!(resumen.canceladas, 1);
        assert_eq!(resumen.completadas, 2);
        assert_eq!(resumen.ingresos, 100.0);
        assert_eq!(resumen.calificacion_promedio, 4.5);
    }

    #[test]
    fn resumen_sin_calificaciones() {
        let lote = vec![reservacion(EstadoReservacion::Pendiente, 50.0, 100)];
        assert_eq!(resumen_reservaciones(&lote).calificacion_promedio, 0.0);
    }

    #[test]
    fn reservaciones_agrupadas_por_ventana() {
        let ahora = Utc.with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap();
        let meses = ultimos_meses(ahora, 2);
        let lote = vec![
            reservacion(EstadoReservacion::Pendiente, 10.0, meses[0].inicio),
            reservacion(EstadoReservacion::Completada, 40.0, meses[0].inicio + 1),
            reservacion(EstadoReservacion::Pendiente, 10.0, meses[1].inicio),
            // fuera de las ventanas
            reservacion(EstadoReservacion::Pendiente, 10.0, meses[0].inicio - 1),
        ];

        let puntos = reservaciones_por_mes(&lote, &meses);
        assert_eq!(puntos[0].total, 2);
        assert_eq!(puntos[1].total, 1);
        // solo las completadas aportan ingresos
        assert_eq!(puntos[0].ingresos, 40.0);
        assert_eq!(puntos[1].ingresos, 0.0);
    }

    #[test]
    fn cupones_atribuidos_al_mes_de_creacion() {
        use crate::db::CategoriaPromocion;
        let ahora = Utc.with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap();
        let meses = ultimos_meses(ahora, 2);

        let promo = |created_at: i64, usados: i64| Promocion {
            id: Some(ObjectId::new()),
            empresa_id: ObjectId::new(),
            place_id: ObjectId::new(),
            titulo: "Promo".to_string(),
            descripcion: None,
            lugar: "Lugar".to_string(),
            descuento: 10.0,
            precio_original: None,
            precio_descuento: None,
            fecha_inicio: created_at,
            fecha_fin: None,
            activa: true,
            categoria: CategoriaPromocion::Comida,
            imagen: None,
            cupones_disponibles: -1,
            cupones_usados: usados,
            condiciones: None,
            destacada: false,
            created_at,
        };

        let promociones = vec![
            promo(meses[0].inicio, 3),
            promo(meses[0].inicio + 10, 2),
            promo(meses[1].inicio, 7),
        ];

        let puntos = cupones_por_mes(&promociones, &meses);
        assert_eq!(puntos[0].total, 5);
        assert_eq!(puntos[1].total, 7);
    }
}
