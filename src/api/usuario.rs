//! # API de Usuarios
//!
//! Registro, login y el token de capacidad que protege toda operación que
//! cambia estado: el servidor emite un uuid en el login y cada ruta mutante
//! lo resuelve con [`validate_access_token`] en lugar de confiar en un id
//! enviado en el body.

use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{AppError, AppResult};
use crate::db::{
    MongoRepo, PreferenciasNotificaciones, RolUsuario, Usuario,
};

#[derive(Deserialize)]
struct RegistroUsuario {
    name: String,
    email: String,
    password: String,
    telefono: Option<String>,
    /// "user" o "empresa"; "admin" solo se asigna desde otro admin
    role: Option<RolUsuario>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct ActualizarPerfil {
    name: Option<String>,
    telefono: Option<String>,
    avatar: Option<String>,
}

impl ActualizarPerfil {
    fn como_set(&self) -> Document {
        let mut set = doc! {};
        if let Some(name) = &self.name {
            set.insert("name", name.trim());
        }
        if let Some(telefono) = &self.telefono {
            set.insert("telefono", telefono);
        }
        if let Some(avatar) = &self.avatar {
            set.insert("avatar", avatar);
        }
        set
    }
}

#[derive(Deserialize)]
struct ActualizarPushToken {
    push_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActualizarPreferencias {
    notificaciones_activas: Option<bool>,
    preferencias_notificaciones: Option<PreferenciasNotificaciones>,
}

#[derive(Deserialize)]
struct CambiarRol {
    role: RolUsuario,
}

/// Vista pública de un usuario, sin credenciales
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UsuarioInfo {
    id: String,
    name: String,
    email: String,
    telefono: Option<String>,
    role: RolUsuario,
    notificaciones_activas: bool,
    preferencias_notificaciones: PreferenciasNotificaciones,
}

impl From<Usuario> for UsuarioInfo {
    fn from(u: Usuario) -> Self {
        UsuarioInfo {
            id: u.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: u.name,
            email: u.email,
            telefono: u.telefono,
            role: u.role,
            notificaciones_activas: u.notificaciones_activas,
            preferencias_notificaciones: u.preferencias_notificaciones,
        }
    }
}

/// Digest SHA-256 en hexadecimal de una contraseña
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn validar_email(email: &str) -> bool {
    email.contains('@') && email.contains('.')
}

/// Extrae el token Bearer del header Authorization
pub fn extract_token(req: &HttpRequest) -> AppResult<String> {
    let auth_header = req
        .headers()
        .get("authorization")
        .ok_or(AppError::Unauthorized("Falta header Authorization".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Header Authorization inválido".to_string()))?;

    if !auth_str.starts_with("Bearer ") {
        return Err(AppError::Unauthorized("Formato de token inválido".to_string()));
    }

    Ok(auth_str[7..].to_string())
}

/// Resuelve un token de acceso al usuario que lo posee
pub async fn validate_access_token(repo: &MongoRepo, token: &str) -> AppResult<Usuario> {
    let usuario = repo
        .usuarios()
        .find_one(doc! { "accessToken": token })
        .await
        .map_err(|e| AppError::database("validate_token", e))?;

    usuario.ok_or(AppError::Unauthorized("Token inválido".to_string()))
}

/// Extrae y valida el token de la petición en un solo paso
pub async fn usuario_autenticado(repo: &MongoRepo, req: &HttpRequest) -> AppResult<Usuario> {
    let token = extract_token(req)?;
    validate_access_token(repo, &token).await
}

/// Verifica que el usuario tenga rol de empresa (o admin)
pub fn require_empresa(usuario: &Usuario) -> AppResult<()> {
    match usuario.role {
        RolUsuario::Empresa | RolUsuario::Admin => Ok(()),
        RolUsuario::User => Err(AppError::Unauthorized(
            "Se requiere rol de empresa".to_string(),
        )),
    }
}

#[post("/usuarios/registro")]
async fn registrar_usuario(
    repo: web::Data<MongoRepo>,
    data: web::Json<RegistroUsuario>,
) -> AppResult<impl Responder> {
    if data.name.trim().is_empty() {
        return Err(AppError::Validation("El nombre es requerido".to_string()));
    }
    if !validar_email(&data.email) {
        return Err(AppError::Validation("Email inválido".to_string()));
    }
    if data.password.len() < 6 {
        return Err(AppError::Validation(
            "La contraseña debe tener al menos 6 caracteres".to_string(),
        ));
    }

    let role = data.role.unwrap_or(RolUsuario::User);
    if role == RolUsuario::Admin {
        return Err(AppError::Validation(
            "El rol admin no puede auto-asignarse".to_string(),
        ));
    }

    let usuarios = repo.usuarios();

    let existing = usuarios
        .find_one(doc! { "email": &data.email })
        .await
        .map_err(|e| AppError::database("check_usuario_exists", e))?;

    if existing.is_some() {
        return Err(AppError::Conflict("El email ya está registrado".to_string()));
    }

    let access_token = Uuid::new_v4().to_string();

    let usuario = Usuario {
        id: None,
        name: data.name.trim().to_string(),
        email: data.email.clone(),
        password: hash_password(&data.password),
        telefono: data.telefono.clone(),
        avatar: None,
        role,
        access_token: access_token.clone(),
        push_token: None,
        notificaciones_activas: true,
        preferencias_notificaciones: PreferenciasNotificaciones::default(),
        created_at: MongoRepo::current_timestamp(),
    };

    let result = usuarios
        .insert_one(usuario)
        .await
        .map_err(|e| AppError::database("registrar_usuario", e))?;

    let id = result
        .inserted_id
        .as_object_id()
        .map(|oid| oid.to_hex())
        .unwrap_or_default();

    Ok(HttpResponse::Created().json(json!({
        "access_token": access_token,
        "id": id,
        "role": role,
    })))
}

#[post("/usuarios/login")]
async fn login_usuario(
    repo: web::Data<MongoRepo>,
    data: web::Json<LoginRequest>,
) -> AppResult<impl Responder> {
    if data.email.is_empty() || data.password.is_empty() {
        return Err(AppError::Validation(
            "Email y contraseña son requeridos".to_string(),
        ));
    }

    let usuarios = repo.usuarios();

    let usuario = usuarios
        .find_one(doc! {
            "email": &data.email,
            "password": hash_password(&data.password),
        })
        .await
        .map_err(|e| AppError::database("login_usuario", e))?
        .ok_or(AppError::Unauthorized("Credenciales incorrectas".to_string()))?;

    // El token es de un solo dueño: se regenera en cada login
    let access_token = Uuid::new_v4().to_string();
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    usuarios
        .update_one(
            doc! { "_id": id },
            doc! { "$set": { "accessToken": &access_token } },
        )
        .await
        .map_err(|e| AppError::database("regenerar_token", e))?;

    Ok(HttpResponse::Ok().json(json!({
        "access_token": access_token,
        "id": id.to_hex(),
        "role": usuario.role,
        "name": usuario.name,
    })))
}

#[get("/usuarios/me")]
async fn perfil_usuario(
    repo: web::Data<MongoRepo>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    Ok(HttpResponse::Ok().json(UsuarioInfo::from(usuario)))
}

/// Edición parcial del perfil propio
#[put("/usuarios/me")]
async fn actualizar_perfil(
    repo: web::Data<MongoRepo>,
    data: web::Json<ActualizarPerfil>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    if let Some(name) = &data.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("El nombre es requerido".to_string()));
        }
    }

    let set = data.como_set();
    if set.is_empty() {
        return Err(AppError::Validation("Nada que actualizar".to_string()));
    }

    repo.usuarios()
        .update_one(doc! { "_id": id }, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("actualizar_perfil", e))?;

    let actualizado = repo
        .usuarios()
        .find_one(doc! { "_id": id })
        .await
        .map_err(|e| AppError::database("releer_usuario", e))?
        .ok_or(AppError::NotFound("Usuario no encontrado".to_string()))?;

    Ok(HttpResponse::Ok().json(UsuarioInfo::from(actualizado)))
}

/// Registra (o borra, con `null`) el token push del dispositivo
#[put("/usuarios/push-token")]
async fn actualizar_push_token(
    repo: web::Data<MongoRepo>,
    data: web::Json<ActualizarPushToken>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let valor = match &data.push_token {
        Some(token) => Bson::String(token.clone()),
        None => Bson::Null,
    };

    repo.usuarios()
        .update_one(doc! { "_id": id }, doc! { "$set": { "pushToken": valor } })
        .await
        .map_err(|e| AppError::database("actualizar_push_token", e))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[put("/usuarios/preferencias-notificaciones")]
async fn actualizar_preferencias(
    repo: web::Data<MongoRepo>,
    data: web::Json<ActualizarPreferencias>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let usuario = usuario_autenticado(repo.get_ref(), &req).await?;
    let id = usuario
        .id
        .ok_or_else(|| AppError::Internal("Usuario sin _id".to_string()))?;

    let mut set = doc! {};
    if let Some(activas) = data.notificaciones_activas {
        set.insert("notificacionesActivas", activas);
    }
    if let Some(prefs) = &data.preferencias_notificaciones {
        set.insert("preferenciasNotificaciones.promociones", prefs.promociones);
        set.insert("preferenciasNotificaciones.reservaciones", prefs.reservaciones);
        set.insert("preferenciasNotificaciones.generales", prefs.generales);
    }

    if set.is_empty() {
        return Err(AppError::Validation("Nada que actualizar".to_string()));
    }

    repo.usuarios()
        .update_one(doc! { "_id": id }, doc! { "$set": set })
        .await
        .map_err(|e| AppError::database("actualizar_preferencias", e))?;

    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

/// Cambio de rol, reservado al admin
#[put("/usuarios/{id}/role")]
async fn cambiar_rol(
    repo: web::Data<MongoRepo>,
    path: web::Path<String>,
    data: web::Json<CambiarRol>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let actor = usuario_autenticado(repo.get_ref(), &req).await?;
    if actor.role != RolUsuario::Admin {
        return Err(AppError::Unauthorized(
            "Solo un admin puede cambiar roles".to_string(),
        ));
    }

    let usuario_id = ObjectId::parse_str(path.into_inner().as_str())
        .map_err(|_| AppError::Validation("ID de usuario inválido".to_string()))?;

    let result = repo
        .usuarios()
        .update_one(
            doc! { "_id": usuario_id },
            doc! { "$set": { "role": data.role.as_str() } },
        )
        .await
        .map_err(|e| AppError::database("cambiar_rol", e))?;

    if result.matched_count == 0 {
        return Err(AppError::NotFound("Usuario no encontrado".to_string()));
    }

    Ok(HttpResponse::Ok().json(json!({ "success": true, "role": data.role })))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(registrar_usuario);
    cfg.service(login_usuario);
    cfg.service(perfil_usuario);
    cfg.service(actualizar_perfil);
    cfg.service(actualizar_push_token);
    cfg.service(actualizar_preferencias);
    cfg.service(cambiar_rol);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_es_determinista_y_hex() {
        let a = hash_password("secreto123");
        let b = hash_password("secreto123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_distingue_entradas() {
        assert_ne!(hash_password("secreto123"), hash_password("secreto124"));
    }

    #[test]
    fn perfil_solo_incluye_campos_presentes() {
        let data = ActualizarPerfil {
            name: Some("  Ana López  ".to_string()),
            telefono: None,
            avatar: Some("avatar.png".to_string()),
        };
        let set = data.como_set();
        assert_eq!(set.get_str("name").unwrap(), "Ana López");
        assert_eq!(set.get_str("avatar").unwrap(), "avatar.png");
        assert_eq!(set.len(), 2);
        assert!(set.get("telefono").is_none());
    }

    #[test]
    fn perfil_vacio_no_produce_set() {
        let data = ActualizarPerfil {
            name: None,
            telefono: None,
            avatar: None,
        };
        assert!(data.como_set().is_empty());
    }

    #[test]
    fn email_basico() {
        assert!(validar_email("ana@ejemplo.com"));
        assert!(!validar_email("ana.ejemplo.com"));
        assert!(!validar_email("ana@ejemplo"));
    }
}
