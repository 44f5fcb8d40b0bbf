//! # Errores de Arranque
//! src/error.rs
//!
//! Todos los errores que pueden abortar `start`. Cualquiera de ellos implica
//! que el contexto fue desmontado por completo antes de retornar.

use thiserror::Error;

/// Error fatal durante el arranque del servidor
#[derive(Debug, Error)]
pub enum StartError {
    /// El nombre de la opción no existe en la tabla de opciones
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Un nombre de opción quedó sin valor al final de la lista
    #[error("{0}: option value cannot be NULL")]
    MissingValue(String),

    /// La opción existe pero su valor no es válido
    #[error("{name}: invalid value '{value}': {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Un colaborador externo (TLS, puertos, ACL...) retornó `false`
    #[error("setup step '{0}' failed")]
    SetupFailed(&'static str),

    /// Se pidieron más workers que el máximo permitido
    #[error("Too many worker threads: {requested} (max {max})")]
    TooManyWorkers { requested: usize, max: usize },

    /// Falló una reserva de memoria durante el arranque
    #[error("Not enough memory for {0}")]
    OutOfMemory(&'static str),

    /// No se pudo crear el poller o registrar un socket de escucha en él
    #[error("Cannot watch listening sockets: {0}")]
    Poller(#[source] std::io::Error),

    /// No se pudo crear el thread maestro o el primer worker
    #[error("Cannot create {role} thread: {source}")]
    ThreadSpawn {
        role: &'static str,
        #[source]
        source: std::io::Error,
    },
}
