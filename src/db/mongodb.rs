//! # Repositorio MongoDB
//!
//! Envoltorio clonable sobre el cliente de MongoDB con una colección tipada
//! por entidad. Además de los accesores, este módulo concentra la única
//! operación de escritura compartida del ledger de cupones:
//! [`MongoRepo::consumir_cupon`].

use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database};
use std::env;

use crate::api::{AppError, AppResult};
use crate::db::models::{
    Evento, Favorito, Lugar, Notificacion, Promocion, Reservacion, Usuario,
};

#[derive(Debug, Clone)]
pub struct MongoRepo {
    pub client: Client,
    pub database: Database,
}

impl MongoRepo {
    pub async fn init() -> AppResult<MongoRepo> {
        let mongo_uri =
            env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let client = Client::with_uri_str(&mongo_uri)
            .await
            .map_err(|e| AppError::Internal(format!("Error conectando a MongoDB: {}", e)))?;

        let database_name =
            env::var("MONGODB_DATABASE").unwrap_or_else(|_| "turismo_reservas".to_string());

        let database = client.database(&database_name);

        // Test connection
        database
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| AppError::Internal(format!("Error validando conexión MongoDB: {}", e)))?;

        tracing::info!("Conexión a MongoDB establecida exitosamente");

        Ok(MongoRepo { client, database })
    }

    pub fn usuarios(&self) -> Collection<Usuario> {
        self.database.collection("usuarios")
    }

    pub fn lugares(&self) -> Collection<Lugar> {
        self.database.collection("lugares")
    }

    pub fn promociones(&self) -> Collection<Promocion> {
        self.database.collection("promociones")
    }

    pub fn reservaciones(&self) -> Collection<Reservacion> {
        self.database.collection("reservaciones")
    }

    pub fn notificaciones(&self) -> Collection<Notificacion> {
        self.database.collection("notificaciones")
    }

    pub fn eventos(&self) -> Collection<Evento> {
        self.database.collection("eventos")
    }

    pub fn favoritos(&self) -> Collection<Favorito> {
        self.database.collection("favoritos")
    }

    /// Crea los índices de todas las colecciones.
    ///
    /// El índice único sobre `codigoConfirmacion` es el que garantiza que un
    /// código de confirmación nunca se repita entre reservaciones.
    pub async fn create_indexes(&self) -> AppResult<()> {
        use mongodb::options::IndexOptions;
        use mongodb::IndexModel;

        let usuario_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
            IndexModel::builder()
                .keys(doc! { "accessToken": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        ];
        self.usuarios()
            .create_indexes(usuario_indexes)
            .await
            .map_err(|e| AppError::Internal(format!("Error creando índices usuarios: {}", e)))?;

        let lugar_indexes = vec![
            IndexModel::builder().keys(doc! { "userId": 1 }).build(),
            IndexModel::builder().keys(doc! { "dept": 1 }).build(),
        ];
        self.lugares()
            .create_indexes(lugar_indexes)
            .await
            .map_err(|e| AppError::Internal(format!("Error creando índices lugares: {}", e)))?;

        let promocion_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "empresaId": 1, "activa": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "placeId": 1, "activa": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "categoria": 1, "activa": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "fechaFin": 1, "activa": 1 })
                .build(),
        ];
        self.promociones()
            .create_indexes(promocion_indexes)
            .await
            .map_err(|e| AppError::Internal(format!("Error creando índices promociones: {}", e)))?;

        let reservacion_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "userId": 1, "estado": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "placeId": 1, "fechaReservacion": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "estado": 1, "fechaReservacion": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "codigoConfirmacion": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        ];
        self.reservaciones()
            .create_indexes(reservacion_indexes)
            .await
            .map_err(|e| {
                AppError::Internal(format!("Error creando índices reservaciones: {}", e))
            })?;

        let notificacion_indexes = vec![
            IndexModel::builder()
                .keys(doc! { "userId": 1, "leida": 1 })
                .build(),
            IndexModel::builder()
                .keys(doc! { "userId": 1, "tipo": 1 })
                .build(),
            IndexModel::builder().keys(doc! { "fecha": -1 }).build(),
        ];
        self.notificaciones()
            .create_indexes(notificacion_indexes)
            .await
            .map_err(|e| {
                AppError::Internal(format!("Error creando índices notificaciones: {}", e))
            })?;

        let favorito_indexes = vec![IndexModel::builder()
            .keys(doc! { "usuarioId": 1, "lugarId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build()];
        self.favoritos()
            .create_indexes(favorito_indexes)
            .await
            .map_err(|e| AppError::Internal(format!("Error creando índices favoritos: {}", e)))?;

        tracing::info!("Índices MongoDB creados exitosamente");
        Ok(())
    }

    /// Consume un cupón de la promoción de forma atómica.
    ///
    /// El guard (activa, no expirada, no agotada) viaja dentro del filtro del
    /// `find_one_and_update`, de modo que dos peticiones concurrentes no
    /// pueden sobrepasar `cuponesDisponibles`: el incremento y la
    /// comprobación son una sola escritura en el servidor.
    ///
    /// Devuelve los cupones restantes tras el incremento (`None` =
    /// ilimitados). Si el filtro no casa, se relee el documento para
    /// distinguir entre promoción inexistente, inactiva, expirada o agotada.
    pub async fn consumir_cupon(&self, promocion_id: ObjectId) -> AppResult<Option<i64>> {
        let ahora = Self::current_timestamp();

        let filtro = doc! {
            "_id": promocion_id,
            "activa": true,
            "$and": [
                { "$or": [
                    { "fechaFin": null },
                    { "fechaFin": { "$gte": ahora } },
                ]},
                { "$or": [
                    { "cuponesDisponibles": -1 },
                    { "$expr": { "$lt": ["$cuponesUsados", "$cuponesDisponibles"] } },
                ]},
            ],
        };

        let actualizada = self
            .promociones()
            .find_one_and_update(filtro, doc! { "$inc": { "cuponesUsados": 1 } })
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| AppError::Internal(format!("Error consumiendo cupón: {}", e)))?;

        if let Some(promo) = actualizada {
            tracing::debug!(
                promocion = %promocion_id.to_hex(),
                cupones_usados = promo.cupones_usados,
                "Cupón consumido"
            );
            return Ok(promo.cupones_restantes());
        }

        // El filtro no casó: releer para devolver el motivo exacto
        let promo = self
            .promociones()
            .find_one(doc! { "_id": promocion_id })
            .await
            .map_err(|e| AppError::Internal(format!("Error buscando promoción: {}", e)))?
            .ok_or(AppError::NotFound("Promoción no encontrada".to_string()))?;

        use crate::db::models::EstadoCupon;
        match promo.estado_cupon(ahora) {
            EstadoCupon::Inactiva => Err(AppError::EstadoInvalido(
                "Promoción no está activa".to_string(),
            )),
            EstadoCupon::Expirada => {
                Err(AppError::EstadoInvalido("Promoción ha expirado".to_string()))
            }
            EstadoCupon::Agotada => Err(AppError::CuponesAgotados(
                "No hay cupones disponibles".to_string(),
            )),
            // Carrera perdida contra otra escritura; reportar como agotada
            EstadoCupon::Disponible(_) => Err(AppError::CuponesAgotados(
                "No hay cupones disponibles".to_string(),
            )),
        }
    }

    // Función auxiliar para obtener timestamp actual
    pub fn current_timestamp() -> i64 {
        chrono::Utc::now().timestamp()
    }

    pub fn current_timestamp_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
