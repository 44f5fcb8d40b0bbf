//! # Cola de Despacho de Conexiones
//! src/queue/mod.rs
//!
//! Único canal entre el thread maestro y el pool de workers. Hay dos
//! variantes intercambiables detrás del mismo trait:
//!
//! - `classic`: buffer circular acotado con dos condvars. FIFO global.
//! - `alternative`: un slot y un evento por worker. FIFO solo por worker,
//!   sin un lock compartido entre workers en el camino caliente.
//!
//! La variante se elige una sola vez al construir el contexto
//! (opción `dispatch_queue`).

pub mod alternative;
pub mod classic;

pub use alternative::SlotQueue;
pub use classic::ClassicQueue;

use crate::connection::PendingConnection;
use std::fmt;
use std::str::FromStr;

/// Variante de cola
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Classic,
    Alternative,
}

impl QueueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Classic => "classic",
            QueueKind::Alternative => "alternative",
        }
    }
}

impl FromStr for QueueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "classic" => Ok(QueueKind::Classic),
            "alternative" => Ok(QueueKind::Alternative),
            other => Err(format!(
                "unknown dispatch queue '{}' (expected classic or alternative)",
                other
            )),
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Motivo por el que una conexión no entró a la cola
///
/// La conexión se devuelve al llamador en ambos casos.
#[derive(Debug)]
pub enum EnqueueError {
    /// No hay espacio (solo `try_enqueue`)
    Full(PendingConnection),
    /// La cola fue cerrada
    Closed(PendingConnection),
}

impl EnqueueError {
    pub fn into_inner(self) -> PendingConnection {
        match self {
            EnqueueError::Full(conn) | EnqueueError::Closed(conn) => conn,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, EnqueueError::Closed(_))
    }
}

/// Contrato común de ambas variantes
pub trait DispatchQueue: Send + Sync {
    /// Encola una conexión, bloqueando mientras no haya lugar
    fn enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError>;

    /// Igual que `enqueue` pero sin bloquear
    fn try_enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError>;

    /// Desencola la siguiente conexión para el worker `worker`
    ///
    /// Bloquea hasta que haya una conexión; `None` significa que la cola
    /// fue cerrada.
    fn dequeue(&self, worker: usize) -> Option<PendingConnection>;

    /// Cierra la cola y despierta a todos los threads bloqueados
    ///
    /// Las conexiones que seguían encoladas se descartan (se cierran).
    fn shutdown(&self);

    fn is_closed(&self) -> bool;

    /// Conexiones encoladas en este momento
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> QueueKind;
}

/// Crea la variante pedida
///
/// `capacity` aplica a la cola clásica y `workers` a la alternativa. Falla
/// si no hay memoria para los buffers.
pub fn create(
    kind: QueueKind,
    capacity: usize,
    workers: usize,
) -> Result<Box<dyn DispatchQueue>, std::collections::TryReserveError> {
    Ok(match kind {
        QueueKind::Classic => Box::new(ClassicQueue::new(capacity)?),
        QueueKind::Alternative => Box::new(SlotQueue::new(workers)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("classic".parse::<QueueKind>().unwrap(), QueueKind::Classic);
        assert_eq!(" alternative ".parse::<QueueKind>().unwrap(), QueueKind::Alternative);
        assert!("fifo".parse::<QueueKind>().is_err());
        assert_eq!(QueueKind::Alternative.to_string(), "alternative");
    }

    #[test]
    fn test_create_selects_variant() {
        let queue = create(QueueKind::Classic, 4, 2).unwrap();
        assert_eq!(queue.kind(), QueueKind::Classic);
        assert!(queue.is_empty());

        let queue = create(QueueKind::Alternative, 4, 2).unwrap();
        assert_eq!(queue.kind(), QueueKind::Alternative);
        assert!(!queue.is_closed());
    }
}
