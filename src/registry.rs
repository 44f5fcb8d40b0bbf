//! # Registro de Identidad de Threads
//! src/registry.rs
//!
//! Cada thread del servidor (maestro, workers y el thread que ejecuta `start`)
//! se registra aquí y recibe un índice numérico único en todo el proceso.
//! El descriptor queda en un slot thread-local, de modo que cualquier código
//! que corre en ese thread puede preguntar "¿quién soy y a qué contexto
//! pertenezco?" sin recibir parámetros extra.
//!
//! ## Inicialización global
//!
//! La tabla de threads vivos se inicializa una sola vez por proceso. El
//! primer llamador (detectado con un incremento atómico) la crea; los demás
//! esperan hasta que la inicialización sea visible en lugar de repetirla.
//!
//! ## Limpieza
//!
//! `register` retorna un `Registration`; al soltarlo se desregistra el
//! thread. Si el thread muere sin soltarlo, el destructor del slot
//! thread-local hace la misma limpieza.

use crate::server::ContextInner;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread;
use tracing::{error, trace};

/// Rol de un thread registrado
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
    /// Thread que está ejecutando `start`
    MasterElect,
    /// Thread que acepta conexiones
    Master,
    /// Worker del pool, con su posición en la lista de handles
    Worker { index: usize },
    /// Cualquier otro thread que se registra temporalmente
    Transient,
}

impl ThreadRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadRole::MasterElect => "master-elect",
            ThreadRole::Master => "master",
            ThreadRole::Worker { .. } => "worker",
            ThreadRole::Transient => "transient",
        }
    }
}

/// Identidad de un thread registrado
#[derive(Clone)]
pub struct ThreadDescriptor {
    index: u32,
    role: ThreadRole,
    context_id: u64,
    context: Weak<ContextInner>,
}

impl ThreadDescriptor {
    /// Índice único en el proceso (nunca se reutiliza)
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn role(&self) -> ThreadRole {
        self.role
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    /// Contexto dueño del thread, si ya es visible
    pub fn context(&self) -> Option<Arc<ContextInner>> {
        self.context.upgrade()
    }
}

impl fmt::Debug for ThreadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadDescriptor")
            .field("index", &self.index)
            .field("role", &self.role)
            .field("context_id", &self.context_id)
            .finish()
    }
}

/// Entrada de la tabla global de threads vivos
#[derive(Debug, Clone, Copy)]
struct LiveThread {
    role: ThreadRole,
    context_id: u64,
}

static INIT_GATE: AtomicUsize = AtomicUsize::new(0);
static READY: AtomicBool = AtomicBool::new(false);
static THREAD_INDEX_MAX: AtomicU32 = AtomicU32::new(0);
static LIVE: OnceLock<Mutex<HashMap<u32, LiveThread>>> = OnceLock::new();

/// Slot thread-local; su destructor corre aunque el thread termine por panic
struct Slot(Option<ThreadDescriptor>);

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(descriptor) = self.0.take() {
            forget_live(descriptor.index);
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Slot> = const { RefCell::new(Slot(None)) };
}

/// Inicializa la maquinaria global una sola vez por proceso
///
/// El primer llamador crea la tabla; los demás esperan a que `READY` sea
/// visible. Una segunda creación de la tabla indica un estado imposible y
/// aborta el proceso.
pub fn ensure_initialized() {
    if READY.load(Ordering::Acquire) {
        return;
    }

    if INIT_GATE.fetch_add(1, Ordering::AcqRel) == 0 {
        if LIVE.set(Mutex::new(HashMap::new())).is_err() {
            error!("thread registry initialized twice");
            std::process::abort();
        }
        READY.store(true, Ordering::Release);
    } else {
        while !READY.load(Ordering::Acquire) {
            thread::yield_now();
        }
    }
}

fn live_table() -> MutexGuard<'static, HashMap<u32, LiveThread>> {
    ensure_initialized();
    let table = LIVE.get_or_init(|| Mutex::new(HashMap::new()));
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn forget_live(index: u32) {
    live_table().remove(&index);
}

/// Registra el thread actual
///
/// Si el thread ya tenía un descriptor, se reemplaza (y el anterior se
/// elimina de la tabla).
pub fn register(
    role: ThreadRole,
    context_id: u64,
    context: Weak<ContextInner>,
) -> Registration {
    let index = THREAD_INDEX_MAX.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
    let descriptor = ThreadDescriptor {
        index,
        role,
        context_id,
        context,
    };

    live_table().insert(index, LiveThread { role, context_id });

    let previous = CURRENT.with(|slot| slot.borrow_mut().0.replace(descriptor.clone()));
    if let Some(previous) = previous {
        forget_live(previous.index);
    }

    trace!("thread {} registered as {}", index, role.as_str());
    Registration {
        descriptor,
        _not_send: std::marker::PhantomData,
    }
}

/// Descriptor del thread actual, si está registrado
pub fn current() -> Option<ThreadDescriptor> {
    CURRENT
        .try_with(|slot| slot.borrow().0.clone())
        .ok()
        .flatten()
}

/// Quita el registro del thread actual
pub fn deregister() {
    let previous = CURRENT
        .try_with(|slot| slot.borrow_mut().0.take())
        .ok()
        .flatten();
    if let Some(previous) = previous {
        forget_live(previous.index);
        trace!("thread {} deregistered", previous.index);
    }
}

/// Cantidad de threads vivos registrados para un contexto
pub fn live_threads(context_id: u64) -> usize {
    live_table()
        .values()
        .filter(|thread| thread.context_id == context_id)
        .count()
}

/// Cantidad de threads vivos de un contexto con un rol dado
pub fn live_threads_with_role(context_id: u64, role: ThreadRole) -> usize {
    live_table()
        .values()
        .filter(|thread| thread.context_id == context_id && thread.role == role)
        .count()
}

/// Guard de registro: desregistra el thread al soltarse
///
/// No es `Send`: pertenece al thread que se registró.
pub struct Registration {
    descriptor: ThreadDescriptor,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Registration {
    pub fn descriptor(&self) -> &ThreadDescriptor {
        &self.descriptor
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let index = self.descriptor.index;
        let still_ours = CURRENT
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                if slot.0.as_ref().map(|d| d.index) == Some(index) {
                    slot.0.take();
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if still_ours {
            trace!("thread {} deregistered", index);
        }
        forget_live(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registration = register(ThreadRole::Transient, 9_000_001, Weak::new());
        let current = current().expect("registered");

        assert_eq!(current.index(), registration.descriptor().index());
        assert_eq!(current.role(), ThreadRole::Transient);
        assert_eq!(current.context_id(), 9_000_001);
        assert!(current.context().is_none());
        assert_eq!(live_threads(9_000_001), 1);

        drop(registration);
        assert!(super::current().is_none());
        assert_eq!(live_threads(9_000_001), 0);
    }

    #[test]
    fn test_indices_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    let registration = register(ThreadRole::Transient, 9_000_002, Weak::new());
                    registration.descriptor().index()
                })
            })
            .collect();

        let mut indices: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 8);
        assert_eq!(live_threads(9_000_002), 0);
    }

    #[test]
    fn test_cleanup_on_panic() {
        let result = thread::spawn(|| {
            let _registration = register(ThreadRole::Worker { index: 0 }, 9_000_003, Weak::new());
            panic!("worker blew up");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(live_threads(9_000_003), 0);
    }

    #[test]
    fn test_cleanup_without_guard() {
        thread::spawn(|| {
            std::mem::forget(register(ThreadRole::Transient, 9_000_004, Weak::new()));
        })
        .join()
        .unwrap();

        assert_eq!(live_threads(9_000_004), 0);
    }

    #[test]
    fn test_explicit_deregister() {
        let registration = register(ThreadRole::Master, 9_000_005, Weak::new());
        assert_eq!(live_threads_with_role(9_000_005, ThreadRole::Master), 1);

        deregister();
        assert!(current().is_none());
        assert_eq!(live_threads(9_000_005), 0);
        drop(registration);
    }

    #[test]
    fn test_concurrent_initialization() {
        let handles: Vec<_> = (0..16).map(|_| thread::spawn(ensure_initialized)).collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(READY.load(Ordering::Acquire));
    }
}
