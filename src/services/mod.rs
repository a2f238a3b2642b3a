pub mod notificaciones;

pub use notificaciones::ServicioNotificaciones;
