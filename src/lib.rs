//! # HTTP Engine
//! src/lib.rs
//!
//! Motor HTTP embebible. El núcleo es el ciclo de vida del contexto del
//! servidor: un thread maestro que acepta conexiones y un pool fijo de
//! workers que las procesan, comunicados por una cola de despacho con dos
//! variantes intercambiables. El arranque es todo-o-nada (con rollback) y
//! el shutdown no deja threads, sockets ni memoria colgando.
//!
//! ## Arquitectura
//!
//! - `registry`: identidad de cada thread (índice, rol, contexto)
//! - `server`: contexto, arranque, maestro, workers y shutdown
//! - `queue`: cola de despacho (`classic` y `alternative`)
//! - `connection`: conexión aceptada pendiente de un worker
//! - `setup`: colaboradores de arranque (puertos, TLS, ACL...)
//! - `config`: tabla de opciones y CLI
//! - `callbacks`: hooks del embebedor y canal de diagnósticos
//! - `metrics`: contadores por contexto
//! - `http`: handler por defecto
//!
//! ## Ejemplo de uso
//!
//! ```no_run
//! use http_engine::{Callbacks, Server};
//!
//! let mut ctx = Server::builder()
//!     .callbacks(Callbacks::new())
//!     .start(&["listening_ports", "127.0.0.1:8080", "num_threads", "4"])
//!     .expect("Error al iniciar servidor");
//!
//! println!("escuchando en {:?}", ctx.ports());
//! ctx.stop();
//! ```

pub mod callbacks;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod server;
pub mod setup;

pub use callbacks::{Callbacks, UserData};
pub use connection::PendingConnection;
pub use error::StartError;
pub use queue::QueueKind;
pub use registry::{ThreadDescriptor, ThreadRole};
pub use server::{
    start, Context, ContextInner, LifecycleState, MasterState, OsSpawner, Server, ServerBuilder,
    ThreadBody, ThreadSpawner,
};
pub use setup::{Collaborators, FnStep, SetupStep};
