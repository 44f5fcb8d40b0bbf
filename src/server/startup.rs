//! # Secuencia de Arranque
//! src/server/startup.rs
//!
//! `start` ejecuta los pasos en orden estricto y, ante la primera falla,
//! libera todo lo adquirido hasta ese momento en orden inverso.
//!
//! ## Pasos
//!
//! 1. Id del contexto y semilla del nonce
//! 2. Inicialización global del registro de threads
//! 3. Registro del thread actual como `MasterElect`
//! 4. Primitivas de sincronización (nacen con la cola en el paso 9)
//! 5. Copia de callbacks y user data (`exit_context` queda retenido)
//! 6. Parseo de opciones
//! 7. Colaboradores: auth file → TLS → puertos → run_as_user → ACL
//! 8. Validación de `num_threads`
//! 9. Lista de handles, cola de despacho y poller de los listeners
//! 10. `init_context`
//! 11. Thread maestro
//! 12. Workers (solo el primero es obligatorio)
//! 13. Retorno del contexto
//!
//! ## Rollback
//!
//! Hasta el paso 9 cada recurso es una variable local: el orden de drop de
//! Rust ya es el inverso al de adquisición. Desde el paso 10 el recurso es
//! el `Context` mismo, cuyo `Drop` ejecuta el shutdown completo (que también
//! dispara `exit_context`).

use super::{
    in_flight_slots, master, worker, Context, ContextInner, LifecycleState, MasterState, NonceState, OsSpawner,
    ThreadSpawner,
};
use crate::callbacks::{Callbacks, Diagnostics, UserData};
use crate::error::StartError;
use crate::metrics::ServerStats;
use crate::queue;
use crate::registry::{self, ThreadRole};
use crate::setup::{Collaborators, ListeningSocket, Setup};
use polling::{Event, Poller};
use std::any::Any;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Punto de entrada del builder
pub struct Server;

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }
}

/// Arranca un servidor con los colaboradores y el spawner por defecto
pub fn start<S: AsRef<str>>(
    callbacks: Callbacks,
    user_data: Option<UserData>,
    options: &[S],
) -> Result<Context, StartError> {
    let mut builder = Server::builder().callbacks(callbacks);
    builder.user_data = user_data;
    builder.start(options)
}

/// Todo lo que `start` necesita además de las opciones
pub struct ServerBuilder {
    callbacks: Callbacks,
    user_data: Option<UserData>,
    collaborators: Collaborators,
    spawner: Arc<dyn ThreadSpawner>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            callbacks: Callbacks::default(),
            user_data: None,
            collaborators: Collaborators::default(),
            spawner: Arc::new(OsSpawner),
        }
    }
}

impl ServerBuilder {
    pub fn callbacks(mut self, callbacks: Callbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn user_data<T: Any + Send + Sync>(mut self, data: T) -> Self {
        self.user_data = Some(Arc::new(data));
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    pub fn spawner(mut self, spawner: impl ThreadSpawner + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }

    /// Ejecuta la secuencia de arranque
    pub fn start<S: AsRef<str>>(self, options: &[S]) -> Result<Context, StartError> {
        let mut journal = Journal::default();

        // 1. Contexto
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let nonce = NonceState::seed(options.as_ptr() as usize as u64);
        journal.record("context");

        // 2-3. Registro de threads
        registry::ensure_initialized();
        let _elect = registry::register(ThreadRole::MasterElect, id, Weak::new());
        journal.record("master-elect registration");

        // 5. Callbacks; exit_context solo se arma después de init_context
        let mut callbacks = self.callbacks;
        let exit_context = callbacks.exit_context.take();
        let diag = Diagnostics::new(callbacks.log_message.clone());
        let fail = |err: StartError| {
            diag.cry(&err.to_string());
            err
        };

        // 6. Opciones (from_options ya reporta por el hook)
        let config = crate::config::Config::from_options(options, &diag)?;
        let kind = config.dispatch_queue().map_err(fail)?;
        let capacity = config.connection_queue_size().map_err(fail)?;
        let request_timeout = config.request_timeout().map_err(fail)?;
        journal.record("configuration");

        // 7. Colaboradores externos
        let mut setup = Setup::new(config, diag.clone());
        for step in self.collaborators.ordered() {
            if !step.apply(&mut setup) {
                return Err(fail(StartError::SetupFailed(step.name())));
            }
            journal.record(step.name());
        }
        let (config, listeners, resolved) = setup.into_resolved();

        // 8. Workers
        let workers = config.num_threads().map_err(fail)?;

        // 9. Handles y cola
        let mut handles = Vec::new();
        handles
            .try_reserve_exact(workers)
            .map_err(|_| fail(StartError::OutOfMemory("worker handle list")))?;
        let queue = queue::create(kind, capacity, workers)
            .map_err(|_| fail(StartError::OutOfMemory("dispatch queue")))?;
        journal.record("dispatch queue");
        let poller = watch(&listeners).map_err(|e| fail(StartError::Poller(e)))?;
        journal.record("listener poller");

        let inner = Arc::new(ContextInner {
            id,
            config,
            callbacks,
            user_data: self.user_data,
            diag: diag.clone(),
            nonce: Mutex::new(nonce),
            queue,
            poller,
            worker_count: workers,
            in_flight: in_flight_slots(workers),
            request_timeout,
            ports: resolved.ports,
            acl: resolved.acl,
            tls: resolved.tls,
            auth_file: resolved.auth_file,
            stop_flag: AtomicBool::new(false),
            state: AtomicU8::new(LifecycleState::Starting as u8),
            master_state: AtomicU8::new(MasterState::Initializing as u8),
            stats: ServerStats::new(),
        });

        // 10. init_context; desde aquí el rollback es Context::stop
        if let Some(init) = &inner.callbacks.init_context {
            init(inner.as_ref());
        }
        let mut context = Context {
            inner,
            master: None,
            workers: handles,
            exit_context,
        };
        journal.record("init_context");

        // 11. Maestro
        let master_inner = Arc::clone(&context.inner);
        let body = Box::new(move || master::run(master_inner, listeners));
        match self.spawner.spawn(ThreadRole::Master, body) {
            Ok(handle) => context.master = Some(handle),
            Err(source) => {
                return Err(fail(StartError::ThreadSpawn {
                    role: "master",
                    source,
                }));
            }
        }
        journal.record("master thread");

        // 12. Workers: el primero es obligatorio, los demás no
        for index in 0..workers {
            let worker_inner = Arc::clone(&context.inner);
            let body = Box::new(move || worker::run(worker_inner, index));
            match self.spawner.spawn(ThreadRole::Worker { index }, body) {
                Ok(handle) => context.workers.push(Some(handle)),
                Err(source) if index == 0 => {
                    return Err(fail(StartError::ThreadSpawn {
                        role: "worker",
                        source,
                    }));
                }
                Err(e) => {
                    diag.cry(&format!("Cannot start worker thread {}: {}", index + 1, e));
                    break;
                }
            }
        }
        let spawned = context.workers.len();
        context.workers.resize_with(workers, || None);
        journal.record("worker threads");

        // 13. Listo
        context.inner.set_state(LifecycleState::Running);
        journal.commit();
        info!(
            "context {} running: {} of {} workers, {} queue, ports {:?}",
            id,
            spawned,
            workers,
            kind,
            context.ports()
        );
        Ok(context)
    }
}

/// Registra cada listener en un poller nuevo; la clave es su posición
fn watch(listeners: &[ListeningSocket]) -> io::Result<Poller> {
    let poller = Poller::new()?;
    for (key, socket) in listeners.iter().enumerate() {
        poller.add(&socket.listener, Event::readable(key))?;
    }
    Ok(poller)
}

/// Bitácora de pasos completados, para el log de rollback
#[derive(Default)]
struct Journal {
    steps: Vec<&'static str>,
    committed: bool,
}

impl Journal {
    fn record(&mut self, step: &'static str) {
        self.steps.push(step);
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for step in self.steps.iter().rev() {
            debug!("startup rollback: {}", step);
        }
    }
}
