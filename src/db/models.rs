//! # Modelos de datos
//!
//! Registros persistidos en MongoDB (una colección por entidad) y la lógica
//! de dominio pura que los acompaña: el grafo de estados de una reservación,
//! el cálculo de precio con descuento y las reglas de uso de cupones.
//!
//! Los campos se serializan en camelCase para mantener el formato de
//! documento que consume el cliente móvil.

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Rol de un usuario dentro del sistema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolUsuario {
    User,
    Empresa,
    Admin,
}

impl RolUsuario {
    pub fn as_str(&self) -> &'static str {
        match self {
            RolUsuario::User => "user",
            RolUsuario::Empresa => "empresa",
            RolUsuario::Admin => "admin",
        }
    }
}

/// Preferencias de notificación por categoría
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenciasNotificaciones {
    pub promociones: bool,
    pub reservaciones: bool,
    pub generales: bool,
}

impl Default for PreferenciasNotificaciones {
    fn default() -> Self {
        PreferenciasNotificaciones {
            promociones: true,
            reservaciones: true,
            generales: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usuario {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub name: String,
    pub email: String,
    /// Digest SHA-256 en hexadecimal, nunca la contraseña en claro
    pub password: String,
    pub telefono: Option<String>,
    pub avatar: Option<String>,
    pub role: RolUsuario,
    /// Token de capacidad emitido por el servidor (uuid v4), regenerado en cada login
    pub access_token: String,
    pub push_token: Option<String>,
    pub notificaciones_activas: bool,
    pub preferencias_notificaciones: PreferenciasNotificaciones,
    pub created_at: i64, // timestamp unix
}

/// Reseña embebida dentro de un lugar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resena {
    pub usuario: String,
    pub texto: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lugar {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub nombre: String,
    pub dept: String,
    pub img: Option<String>,
    #[serde(default)]
    pub galeria: Vec<String>,
    #[serde(default)]
    pub rating: f64,
    pub descripcion: Option<String>,
    pub ubicacion: Option<String>,
    pub horario: Option<String>,
    pub precio: Option<String>,
    #[serde(default)]
    pub servicios: Vec<String>,
    pub contacto: Option<String>,
    pub web: Option<String>,
    #[serde(rename = "reseñas", default)]
    pub resenas: Vec<Resena>,
    /// Empresa propietaria del lugar
    pub user_id: Option<ObjectId>,
    pub created_at: i64, // timestamp unix
}

/// Categorías de promoción
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoriaPromocion {
    Comida,
    Entretenimiento,
    Hospedaje,
    Transporte,
    Cultura,
    Deportes,
    Otros,
}

impl CategoriaPromocion {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoriaPromocion::Comida => "Comida",
            CategoriaPromocion::Entretenimiento => "Entretenimiento",
            CategoriaPromocion::Hospedaje => "Hospedaje",
            CategoriaPromocion::Transporte => "Transporte",
            CategoriaPromocion::Cultura => "Cultura",
            CategoriaPromocion::Deportes => "Deportes",
            CategoriaPromocion::Otros => "Otros",
        }
    }
}

/// Resultado de evaluar si una promoción admite un cupón más
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstadoCupon {
    /// Usable; `None` significa cupones ilimitados
    Disponible(Option<i64>),
    Inactiva,
    Expirada,
    Agotada,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Promocion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub empresa_id: ObjectId,
    pub place_id: ObjectId,
    pub titulo: String,
    pub descripcion: Option<String>,
    /// Nombre del lugar tal como se muestra en la promoción
    pub lugar: String,
    /// Porcentaje de descuento (0-100)
    pub descuento: f64,
    pub precio_original: Option<f64>,
    pub precio_descuento: Option<f64>,
    pub fecha_inicio: i64, // timestamp unix
    pub fecha_fin: Option<i64>,
    pub activa: bool,
    pub categoria: CategoriaPromocion,
    pub imagen: Option<String>,
    /// -1 = ilimitados
    pub cupones_disponibles: i64,
    pub cupones_usados: i64,
    pub condiciones: Option<String>,
    pub destacada: bool,
    pub created_at: i64, // timestamp unix
}

impl Promocion {
    /// Cupones que quedan por usar; `None` cuando son ilimitados
    pub fn cupones_restantes(&self) -> Option<i64> {
        if self.cupones_disponibles == -1 {
            None
        } else {
            Some((self.cupones_disponibles - self.cupones_usados).max(0))
        }
    }

    /// Evalúa la usabilidad de la promoción en el instante `ahora`.
    ///
    /// La expiración se calcula siempre en lectura; una promoción vencida
    /// nunca se desactiva por escrito.
    pub fn estado_cupon(&self, ahora: i64) -> EstadoCupon {
        if !self.activa {
            return EstadoCupon::Inactiva;
        }
        if let Some(fin) = self.fecha_fin {
            if ahora > fin {
                return EstadoCupon::Expirada;
            }
        }
        if self.cupones_disponibles != -1 && self.cupones_usados >= self.cupones_disponibles {
            return EstadoCupon::Agotada;
        }
        EstadoCupon::Disponible(self.cupones_restantes())
    }
}

/// Estado del ciclo de vida de una reservación
///
/// Grafo permitido:
///
/// ```text
/// pendiente ──→ confirmada ──→ completada
///     │              │
///     └──────┬───────┘
///            ↓
///        cancelada
/// ```
///
/// `cancelada` y `completada` son terminales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstadoReservacion {
    Pendiente,
    Confirmada,
    Cancelada,
    Completada,
}

impl EstadoReservacion {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoReservacion::Pendiente => "pendiente",
            EstadoReservacion::Confirmada => "confirmada",
            EstadoReservacion::Cancelada => "cancelada",
            EstadoReservacion::Completada => "completada",
        }
    }

    pub fn parse(s: &str) -> Option<EstadoReservacion> {
        match s {
            "pendiente" => Some(EstadoReservacion::Pendiente),
            "confirmada" => Some(EstadoReservacion::Confirmada),
            "cancelada" => Some(EstadoReservacion::Cancelada),
            "completada" => Some(EstadoReservacion::Completada),
            _ => None,
        }
    }

    pub fn es_terminal(&self) -> bool {
        matches!(
            self,
            EstadoReservacion::Cancelada | EstadoReservacion::Completada
        )
    }

    /// Tabla de transiciones del grafo de estados.
    ///
    /// Cualquier arista fuera de la tabla se rechaza, incluida toda salida
    /// desde un estado terminal.
    pub fn puede_transicionar(&self, destino: EstadoReservacion) -> bool {
        use EstadoReservacion::*;
        matches!(
            (self, destino),
            (Pendiente, Confirmada)
                | (Pendiente, Cancelada)
                | (Confirmada, Completada)
                | (Confirmada, Cancelada)
        )
    }
}

/// Tipo de servicio reservado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TipoServicio {
    Comida,
    Hospedaje,
    Entretenimiento,
    Transporte,
    Otros,
}

/// Método de pago de una reservación
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetodoPago {
    Efectivo,
    Tarjeta,
    Transferencia,
    Otro,
}

impl Default for MetodoPago {
    fn default() -> Self {
        MetodoPago::Efectivo
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservacion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub place_id: ObjectId,
    pub promotion_id: Option<ObjectId>,
    /// Fecha del servicio (YYYY-MM-DD)
    pub fecha_reservacion: String,
    /// Hora del servicio (HH:MM)
    pub hora_reservacion: String,
    pub numero_personas: i32,
    pub tipo_servicio: TipoServicio,
    pub descripcion: Option<String>,
    pub precio_original: f64,
    /// Porcentaje de descuento congelado al crear; no se recalcula aunque
    /// la promoción cambie después
    pub descuento_aplicado: f64,
    pub precio_final: f64,
    pub estado: EstadoReservacion,
    // Datos de contacto capturados al crear, no derivados del usuario
    pub nombre_contacto: String,
    pub telefono_contacto: String,
    pub email_contacto: String,
    pub notas_especiales: Option<String>,
    pub notas_empresa: Option<String>,
    pub fecha_creacion: i64, // timestamp unix
    pub fecha_confirmacion: Option<i64>,
    pub fecha_cancelacion: Option<i64>,
    pub metodo_pago: MetodoPago,
    pub pagado: bool,
    /// Calificación 1-5, solo tras completarse
    pub calificacion: Option<i32>,
    pub comentario_cliente: Option<String>,
    /// Código legible único, generado una sola vez al crear
    pub codigo_confirmacion: String,
}

/// Calcula el precio final aplicando un porcentaje de descuento.
///
/// Invariante: `precio_final == original - original * descuento / 100`
/// en el momento de la creación.
pub fn calcular_precio_final(precio_original: f64, descuento: f64) -> f64 {
    precio_original - precio_original * descuento / 100.0
}

/// Construye un código de confirmación a partir de sus piezas.
///
/// Formato: `RSV-` + últimos 6 dígitos del timestamp en milisegundos +
/// sufijo alfanumérico en mayúsculas.
pub fn formatear_codigo_confirmacion(ahora_ms: i64, sufijo: &str) -> String {
    let digitos = format!("{:06}", ahora_ms.rem_euclid(1_000_000));
    format!("RSV-{}{}", digitos, sufijo.to_uppercase())
}

/// Genera un código de confirmación nuevo con sufijo aleatorio
pub fn generar_codigo_confirmacion() -> String {
    let ahora_ms = chrono::Utc::now().timestamp_millis();
    let aleatorio = uuid::Uuid::new_v4().simple().to_string();
    formatear_codigo_confirmacion(ahora_ms, &aleatorio[..3])
}

/// Tipo de notificación
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipoNotificacion {
    Promocion,
    Reservacion,
    General,
    Sistema,
}

/// Referencias estructuradas al origen de una notificación
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatosNotificacion {
    pub promocion_id: Option<ObjectId>,
    pub reservacion_id: Option<ObjectId>,
    pub lugar_id: Option<ObjectId>,
    pub empresa_id: Option<ObjectId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notificacion {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: ObjectId,
    pub tipo: TipoNotificacion,
    pub titulo: String,
    pub mensaje: String,
    #[serde(default)]
    pub datos: DatosNotificacion,
    pub leida: bool,
    /// true solo si el envío push al gateway tuvo éxito
    pub enviada: bool,
    pub fecha: i64, // timestamp unix
    pub fecha_leida: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evento {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub title: String,
    /// Fecha del evento (YYYY-MM-DD)
    pub date: String,
    pub user_id: ObjectId,
    pub place_id: Option<ObjectId>,
    pub notes: Option<String>,
    pub created_at: i64, // timestamp unix
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Favorito {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub usuario_id: ObjectId,
    pub lugar_id: ObjectId,
    pub created_at: i64, // timestamp unix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn promocion_base() -> Promocion {
        Promocion {
            id: Some(ObjectId::new()),
            empresa_id: ObjectId::new(),
            place_id: ObjectId::new(),
            titulo: "2x1 en pupusas".to_string(),
            descripcion: None,
            lugar: "Pupusería El Mirador".to_string(),
            descuento: 20.0,
            precio_original: Some(10.0),
            precio_descuento: Some(8.0),
            fecha_inicio: 1_000,
            fecha_fin: None,
            activa: true,
            categoria: CategoriaPromocion::Comida,
            imagen: None,
            cupones_disponibles: -1,
            cupones_usados: 0,
            condiciones: None,
            destacada: false,
            created_at: 1_000,
        }
    }

    #[test]
    fn precio_final_con_descuento() {
        assert_eq!(calcular_precio_final(100.0, 20.0), 80.0);
        assert_eq!(calcular_precio_final(100.0, 0.0), 100.0);
        assert_eq!(calcular_precio_final(100.0, 100.0), 0.0);
        assert_eq!(calcular_precio_final(0.0, 50.0), 0.0);
    }

    #[test]
    fn transiciones_permitidas() {
        use EstadoReservacion::*;
        assert!(Pendiente.puede_transicionar(Confirmada));
        assert!(Pendiente.puede_transicionar(Cancelada));
        assert!(Confirmada.puede_transicionar(Completada));
        assert!(Confirmada.puede_transicionar(Cancelada));
    }

    #[test]
    fn transiciones_rechazadas() {
        use EstadoReservacion::*;
        // pendiente no salta directo a completada
        assert!(!Pendiente.puede_transicionar(Completada));
        // los estados terminales no tienen salidas
        for destino in [Pendiente, Confirmada, Cancelada, Completada] {
            assert!(!Completada.puede_transicionar(destino));
            assert!(!Cancelada.puede_transicionar(destino));
        }
        // una reservación completada jamás vuelve a pendiente
        assert!(!Completada.puede_transicionar(Pendiente));
        // tampoco hay auto-transiciones
        assert!(!Pendiente.puede_transicionar(Pendiente));
        assert!(!Confirmada.puede_transicionar(Confirmada));
    }

    #[test]
    fn estados_terminales() {
        assert!(!EstadoReservacion::Pendiente.es_terminal());
        assert!(!EstadoReservacion::Confirmada.es_terminal());
        assert!(EstadoReservacion::Cancelada.es_terminal());
        assert!(EstadoReservacion::Completada.es_terminal());
    }

    #[test]
    fn parse_de_estado() {
        assert_eq!(
            EstadoReservacion::parse("pendiente"),
            Some(EstadoReservacion::Pendiente)
        );
        assert_eq!(
            EstadoReservacion::parse("completada"),
            Some(EstadoReservacion::Completada)
        );
        assert_eq!(EstadoReservacion::parse("Pendiente"), None);
        assert_eq!(EstadoReservacion::parse("archivada"), None);
    }

    #[test]
    fn cupon_ilimitado_siempre_disponible() {
        let mut promo = promocion_base();
        promo.cupones_usados = 9_999;
        assert_eq!(promo.estado_cupon(2_000), EstadoCupon::Disponible(None));
        assert_eq!(promo.cupones_restantes(), None);
    }

    #[test]
    fn cupon_inactiva() {
        let mut promo = promocion_base();
        promo.activa = false;
        assert_eq!(promo.estado_cupon(2_000), EstadoCupon::Inactiva);
    }

    #[test]
    fn cupon_expirada() {
        let mut promo = promocion_base();
        promo.fecha_fin = Some(1_500);
        assert_eq!(promo.estado_cupon(2_000), EstadoCupon::Expirada);
        // en el límite todavía es usable
        assert_eq!(promo.estado_cupon(1_500), EstadoCupon::Disponible(None));
    }

    #[test]
    fn cupon_agotado() {
        let mut promo = promocion_base();
        promo.cupones_disponibles = 1;
        promo.cupones_usados = 1;
        assert_eq!(promo.estado_cupon(2_000), EstadoCupon::Agotada);
        assert_eq!(promo.cupones_restantes(), Some(0));
    }

    #[test]
    fn cupon_limitado_disponible() {
        let mut promo = promocion_base();
        promo.cupones_disponibles = 5;
        promo.cupones_usados = 2;
        assert_eq!(promo.estado_cupon(2_000), EstadoCupon::Disponible(Some(3)));
    }

    #[test]
    fn formato_de_codigo_confirmacion() {
        let codigo = formatear_codigo_confirmacion(1_712_345_678_901, "a7f");
        assert_eq!(codigo, "RSV-678901A7F");
        assert!(codigo.starts_with("RSV-"));
        assert_eq!(codigo.len(), "RSV-".len() + 6 + 3);
    }

    #[test]
    fn codigo_generado_respeta_formato() {
        let codigo = generar_codigo_confirmacion();
        assert!(codigo.starts_with("RSV-"));
        assert_eq!(codigo.len(), 13);
        assert!(codigo[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
