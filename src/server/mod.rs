//! # Contexto del Servidor
//! src/server/mod.rs
//!
//! El contexto es el agregado central de una instancia en ejecución: la
//! configuración ya resuelta, los callbacks, la cola de despacho, las
//! banderas de ciclo de vida y los handles de los threads.
//!
//! Se divide en dos partes:
//!
//! - `ContextInner`: lo que comparten el maestro y los workers a través de
//!   un `Arc`. Solo la cola, los contadores, el estado, el nonce y los
//!   sockets en curso mutan después del arranque, cada uno con su propia
//!   sincronización.
//! - `Context`: el handle que recibe el embebedor. Es dueño de los
//!   `JoinHandle` y del callback `exit_context`; al soltarlo se detiene el
//!   servidor.
//!
//! ## Submódulos
//!
//! - `startup`: secuencia de arranque con rollback
//! - `master`: loop de accept
//! - `worker`: loop de dequeue
//! - `shutdown`: `Context::stop`

pub mod master;
mod shutdown;
pub mod startup;
mod worker;

pub use master::MasterState;
pub use startup::{start, Server, ServerBuilder};

use crate::callbacks::{Callbacks, ContextHook, Diagnostics, UserData};
use crate::config::Config;
use crate::metrics::ServerStats;
use crate::queue::{DispatchQueue, QueueKind};
use crate::registry::ThreadRole;
use crate::setup::{Acl, TlsMaterial};
use polling::Poller;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Estado de ciclo de vida del contexto
///
/// Avanza siempre hacia adelante: `Starting → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

/// Cuerpo de un thread a crear
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Punto único de creación de threads
///
/// El default usa `thread::Builder`; los tests lo reemplazan para simular
/// fallos de creación.
pub trait ThreadSpawner: Send + Sync {
    fn spawn(&self, role: ThreadRole, body: ThreadBody) -> io::Result<JoinHandle<()>>;
}

/// Spawner del sistema operativo
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl ThreadSpawner for OsSpawner {
    fn spawn(&self, role: ThreadRole, body: ThreadBody) -> io::Result<JoinHandle<()>> {
        let name = match role {
            ThreadRole::Worker { index } => format!("worker-{}", index),
            other => other.as_str().to_string(),
        };
        thread::Builder::new().name(name).spawn(body)
    }
}

/// Estado protegido por el mutex del nonce
struct NonceState {
    mask: u64,
    count: u64,
    start_secs: u64,
}

impl NonceState {
    /// Mezcla una fuente aleatoria con `salt` (la dirección de las opciones)
    fn seed(salt: u64) -> Self {
        let start_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            mask: rand::random::<u64>() ^ salt,
            count: 0,
            start_secs,
        }
    }
}

/// Parte compartida del contexto
pub struct ContextInner {
    id: u64,
    config: Config,
    callbacks: Callbacks,
    user_data: Option<UserData>,
    diag: Diagnostics,
    nonce: Mutex<NonceState>,
    queue: Box<dyn DispatchQueue>,
    /// Readiness de los sockets de escucha; `notify` despierta al maestro
    poller: Poller,
    worker_count: usize,
    /// Socket que atiende cada worker, para cortar lecturas en `stop`
    in_flight: Vec<Mutex<Option<TcpStream>>>,
    request_timeout: Option<Duration>,
    ports: Vec<SocketAddr>,
    acl: Option<Acl>,
    tls: Option<TlsMaterial>,
    auth_file: Option<PathBuf>,
    stop_flag: AtomicBool,
    state: AtomicU8,
    master_state: AtomicU8,
    stats: ServerStats,
}

impl ContextInner {
    /// Identificador del contexto dentro del proceso
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data.as_ref()
    }

    /// Direcciones en las que escucha el maestro
    pub fn ports(&self) -> &[SocketAddr] {
        &self.ports
    }

    /// Workers configurados (no necesariamente vivos)
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_kind(&self) -> QueueKind {
        self.queue.kind()
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    pub fn acl(&self) -> Option<&Acl> {
        self.acl.as_ref()
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    pub fn auth_file(&self) -> Option<&Path> {
        self.auth_file.as_deref()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn master_state(&self) -> MasterState {
        MasterState::from_u8(self.master_state.load(Ordering::Acquire))
    }

    /// `true` una vez que empezó el shutdown
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Genera un nonce único para este contexto (hex, 32 caracteres)
    pub fn next_nonce(&self) -> String {
        let mut state = self.nonce.lock().unwrap_or_else(PoisonError::into_inner);
        state.count += 1;

        let mut hasher = Sha256::new();
        hasher.update(state.mask.to_le_bytes());
        hasher.update(state.start_secs.to_le_bytes());
        hasher.update(state.count.to_le_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    pub(crate) fn diag(&self) -> &Diagnostics {
        &self.diag
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub(crate) fn queue(&self) -> &dyn DispatchQueue {
        self.queue.as_ref()
    }

    pub(crate) fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Anota el socket que empieza a atender el worker `index`
    ///
    /// Si el stop ya empezó, la lectura se corta de inmediato.
    pub(crate) fn begin_request(&self, index: usize, stream: TcpStream) {
        let Some(slot) = self.in_flight.get(index) else {
            return;
        };
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
        if self.stop_requested() {
            self.interrupt_request(index);
        }
    }

    pub(crate) fn end_request(&self, index: usize) {
        if let Some(slot) = self.in_flight.get(index) {
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        }
    }

    /// Cierra el lado de lectura de todas las conexiones en curso
    ///
    /// Un handler bloqueado leyendo recibe EOF; la escritura sigue abierta
    /// para que pueda terminar su respuesta.
    pub(crate) fn interrupt_requests(&self) {
        for index in 0..self.in_flight.len() {
            self.interrupt_request(index);
        }
    }

    fn interrupt_request(&self, index: usize) {
        let slot = self.in_flight[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(stream) = slot.as_ref() {
            let _ = stream.shutdown(Shutdown::Read);
        }
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_master_state(&self, state: MasterState) {
        self.master_state.store(state as u8, Ordering::Release);
    }
}

/// Un slot vacío por worker
pub(crate) fn in_flight_slots(workers: usize) -> Vec<Mutex<Option<TcpStream>>> {
    (0..workers).map(|_| Mutex::new(None)).collect()
}

impl fmt::Debug for ContextInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextInner")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("master_state", &self.master_state())
            .field("queue", &self.queue.kind())
            .field("workers", &self.worker_count)
            .field("ports", &self.ports)
            .finish()
    }
}

/// Handle del servidor en ejecución
///
/// Al soltarlo se llama a `stop`.
pub struct Context {
    inner: Arc<ContextInner>,
    master: Option<JoinHandle<()>>,
    workers: Vec<Option<JoinHandle<()>>>,
    exit_context: Option<ContextHook>,
}

impl Context {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Parte compartida, la misma que ven los callbacks
    pub fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    pub fn ports(&self) -> &[SocketAddr] {
        &self.inner.ports
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn stats(&self) -> &ServerStats {
        &self.inner.stats
    }

    /// Largo de la lista de handles (igual a `num_threads`)
    pub fn worker_slots(&self) -> usize {
        self.workers.len()
    }

    /// Workers que llegaron a crearse
    pub fn spawned_workers(&self) -> usize {
        self.workers.iter().filter(|handle| handle.is_some()).count()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("inner", &self.inner)
            .field("master", &self.master.is_some())
            .field("spawned_workers", &self.spawned_workers())
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.stop();
    }
}
