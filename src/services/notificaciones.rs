//! # Servicio de notificaciones
//!
//! Persiste la notificación en la bandeja del usuario y, si tiene un token
//! push registrado, la reenvía al gateway de Expo. Todo el servicio es
//! best-effort: cualquier fallo se registra en el log y jamás se propaga a
//! la operación que lo disparó.

use mongodb::bson::oid::ObjectId;
use serde_json::json;
use std::time::Duration;

use crate::db::{
    DatosNotificacion, EstadoReservacion, MongoRepo, Notificacion, Promocion, Reservacion,
    TipoNotificacion, Usuario,
};

const PUSH_URL_DEFAULT: &str = "https://exp.host/--/api/v2/push/send";
const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Decide si una notificación de este tipo le llega al usuario.
///
/// El interruptor global apaga todo; las preferencias por categoría filtran
/// promociones, reservaciones y generales. Las de sistema solo respetan el
/// interruptor global.
pub fn debe_recibir(usuario: &Usuario, tipo: TipoNotificacion) -> bool {
    if !usuario.notificaciones_activas {
        return false;
    }
    match tipo {
        TipoNotificacion::Promocion => usuario.preferencias_notificaciones.promociones,
        TipoNotificacion::Reservacion => usuario.preferencias_notificaciones.reservaciones,
        TipoNotificacion::General => usuario.preferencias_notificaciones.generales,
        TipoNotificacion::Sistema => true,
    }
}

#[derive(Clone)]
pub struct ServicioNotificaciones {
    repo: MongoRepo,
    client: reqwest::Client,
    push_url: String,
}

impl ServicioNotificaciones {
    pub fn new(repo: MongoRepo) -> ServicioNotificaciones {
        let client = reqwest::Client::builder()
            .timeout(PUSH_TIMEOUT)
            .build()
            .unwrap_or_default();

        let push_url =
            std::env::var("EXPO_PUSH_URL").unwrap_or_else(|_| PUSH_URL_DEFAULT.to_string());

        ServicioNotificaciones {
            repo,
            client,
            push_url,
        }
    }

    /// Notifica a un usuario concreto: persiste en la bandeja y, si hay
    /// token push, envía al gateway. Devuelve silenciosamente si el usuario
    /// no existe o sus preferencias filtran este tipo.
    pub async fn notificar_usuario(
        &self,
        user_id: ObjectId,
        tipo: TipoNotificacion,
        titulo: &str,
        mensaje: &str,
        datos: DatosNotificacion,
    ) {
        let usuario = match self
            .repo
            .usuarios()
            .find_one(mongodb::bson::doc! { "_id": user_id })
            .await
        {
            Ok(Some(u)) => u,
            Ok(None) => {
                tracing::debug!(usuario = %user_id.to_hex(), "Usuario inexistente, notificación descartada");
                return;
            }
            Err(e) => {
                tracing::warn!(usuario = %user_id.to_hex(), error = %e, "Error buscando usuario para notificar");
                return;
            }
        };

        if !debe_recibir(&usuario, tipo) {
            tracing::debug!(
                usuario = %user_id.to_hex(),
                tipo = ?tipo,
                "Notificación filtrada por preferencias"
            );
            return;
        }

        let mut enviada = false;
        if let Some(push_token) = &usuario.push_token {
            enviada = self
                .enviar_push(push_token, titulo, mensaje, tipo, &datos)
                .await;
        }

        let notificacion = Notificacion {
            id: None,
            user_id,
            tipo,
            titulo: titulo.to_string(),
            mensaje: mensaje.to_string(),
            datos,
            leida: false,
            enviada,
            fecha: MongoRepo::current_timestamp(),
            fecha_leida: None,
        };

        if let Err(e) = self.repo.notificaciones().insert_one(notificacion).await {
            tracing::warn!(usuario = %user_id.to_hex(), error = %e, "Error guardando notificación");
        }
    }

    /// POST al gateway push. Devuelve true solo si el gateway respondió 2xx.
    async fn enviar_push(
        &self,
        push_token: &str,
        titulo: &str,
        mensaje: &str,
        tipo: TipoNotificacion,
        datos: &DatosNotificacion,
    ) -> bool {
        let payload = json!({
            "to": push_token,
            "sound": "default",
            "title": titulo,
            "body": mensaje,
            "data": {
                "tipo": tipo,
                "promocionId": datos.promocion_id.map(|id| id.to_hex()),
                "reservacionId": datos.reservacion_id.map(|id| id.to_hex()),
                "lugarId": datos.lugar_id.map(|id| id.to_hex()),
            },
            "priority": "high",
        });

        match self.client.post(&self.push_url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "El gateway push rechazó la notificación");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error enviando notificación push");
                false
            }
        }
    }

    /// Avisa a la empresa dueña del lugar que tiene una reservación nueva
    pub async fn notificar_nueva_reservacion(&self, reservacion: &Reservacion) {
        let lugar = match self
            .repo
            .lugares()
            .find_one(mongodb::bson::doc! { "_id": reservacion.place_id })
            .await
        {
            Ok(Some(l)) => l,
            Ok(None) => {
                tracing::debug!(
                    lugar = %reservacion.place_id.to_hex(),
                    "Lugar inexistente, no se notifica la reservación"
                );
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error buscando lugar para notificar reservación");
                return;
            }
        };

        let empresa_id = match lugar.user_id {
            Some(id) => id,
            None => return,
        };

        let mensaje = format!(
            "Nueva reservación en {} para el {} a las {} ({} personas). Código: {}",
            lugar.nombre,
            reservacion.fecha_reservacion,
            reservacion.hora_reservacion,
            reservacion.numero_personas,
            reservacion.codigo_confirmacion,
        );

        self.notificar_usuario(
            empresa_id,
            TipoNotificacion::Reservacion,
            "Nueva reservación",
            &mensaje,
            DatosNotificacion {
                reservacion_id: reservacion.id,
                lugar_id: Some(reservacion.place_id),
                ..Default::default()
            },
        )
        .await;
    }

    /// Avisa al cliente que su reservación cambió de estado
    pub async fn notificar_cambio_estado(
        &self,
        reservacion: &Reservacion,
        nuevo: EstadoReservacion,
    ) {
        let (titulo, mensaje) = match nuevo {
            EstadoReservacion::Confirmada => (
                "Reservación confirmada",
                format!(
                    "Tu reservación {} fue confirmada para el {} a las {}",
                    reservacion.codigo_confirmacion,
                    reservacion.fecha_reservacion,
                    reservacion.hora_reservacion,
                ),
            ),
            EstadoReservacion::Cancelada => (
                "Reservación cancelada",
                format!(
                    "Tu reservación {} fue cancelada",
                    reservacion.codigo_confirmacion
                ),
            ),
            EstadoReservacion::Completada => (
                "Reservación completada",
                format!(
                    "Tu reservación {} se completó. ¡Cuéntanos cómo te fue!",
                    reservacion.codigo_confirmacion
                ),
            ),
            EstadoReservacion::Pendiente => return,
        };

        self.notificar_usuario(
            reservacion.user_id,
            TipoNotificacion::Reservacion,
            titulo,
            &mensaje,
            DatosNotificacion {
                reservacion_id: reservacion.id,
                lugar_id: Some(reservacion.place_id),
                ..Default::default()
            },
        )
        .await;
    }

    /// Difunde una promoción nueva a todos los usuarios que aceptan
    /// notificaciones de promociones
    pub async fn notificar_nueva_promocion(&self, promocion: &Promocion) {
        let filtro = mongodb::bson::doc! {
            "role": "user",
            "notificacionesActivas": true,
            "preferenciasNotificaciones.promociones": true,
        };

        let mut cursor = match self.repo.usuarios().find(filtro).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Error buscando destinatarios de la promoción");
                return;
            }
        };

        let titulo = format!("Nueva promoción en {}", promocion.lugar);
        let mensaje = format!("{}: {}% de descuento", promocion.titulo, promocion.descuento);
        let mut enviadas = 0u64;

        loop {
            match cursor.advance().await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error iterando destinatarios");
                    break;
                }
            }
            let usuario: Usuario = match cursor.deserialize_current() {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(error = %e, "Error deserializando destinatario");
                    continue;
                }
            };
            let user_id = match usuario.id {
                Some(id) => id,
                None => continue,
            };
            self.notificar_usuario(
                user_id,
                TipoNotificacion::Promocion,
                &titulo,
                &mensaje,
                DatosNotificacion {
                    promocion_id: promocion.id,
                    lugar_id: Some(promocion.place_id),
                    empresa_id: Some(promocion.empresa_id),
                    ..Default::default()
                },
            )
            .await;
            enviadas += 1;
        }

        tracing::info!(
            promocion = %promocion.titulo,
            destinatarios = enviadas,
            "Difusión de promoción terminada"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PreferenciasNotificaciones, RolUsuario};

    fn usuario_base() -> Usuario {
        Usuario {
            id: Some(ObjectId::new()),
            name: "Ana".to_string(),
            email: "ana@ejemplo.com".to_string(),
            password: "x".to_string(),
            telefono: None,
            avatar: None,
            role: RolUsuario::User,
            access_token: "token".to_string(),
            push_token: None,
            notificaciones_activas: true,
            preferencias_notificaciones: PreferenciasNotificaciones::default(),
            created_at: 0,
        }
    }

    #[test]
    fn interruptor_global_apaga_todo() {
        let mut usuario = usuario_base();
        usuario.notificaciones_activas = false;
        for tipo in [
            TipoNotificacion::Promocion,
            TipoNotificacion::Reservacion,
            TipoNotificacion::General,
            TipoNotificacion::Sistema,
        ] {
            assert!(!debe_recibir(&usuario, tipo));
        }
    }

    #[test]
    fn preferencia_por_categoria() {
        let mut usuario = usuario_base();
        usuario.preferencias_notificaciones.promociones = false;
        assert!(!debe_recibir(&usuario, TipoNotificacion::Promocion));
        assert!(debe_recibir(&usuario, TipoNotificacion::Reservacion));
        assert!(debe_recibir(&usuario, TipoNotificacion::General));
    }

    #[test]
    fn sistema_solo_respeta_el_interruptor_global() {
        let mut usuario = usuario_base();
        usuario.preferencias_notificaciones = PreferenciasNotificaciones {
            promociones: false,
            reservaciones: false,
            generales: false,
        };
        assert!(debe_recibir(&usuario, TipoNotificacion::Sistema));
    }
}
