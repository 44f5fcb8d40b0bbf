//! # Tabla de Callbacks
//! src/callbacks.rs
//!
//! Hooks opcionales que el embebedor entrega a `start`. Todos son `Arc` para
//! que la tabla se pueda copiar dentro del contexto y compartir entre threads.

use crate::connection::PendingConnection;
use crate::registry::ThreadDescriptor;
use crate::server::ContextInner;
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{error, warn};

/// Dato opaco del usuario, accesible desde cualquier callback
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Hook de logging: retorna `true` si el mensaje ya fue manejado
pub type LogHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Hook invocado con el contexto (init/exit)
pub type ContextHook = Arc<dyn Fn(&ContextInner) + Send + Sync>;

/// Hook invocado al entrar/salir de un thread del servidor
pub type ThreadHook = Arc<dyn Fn(&ThreadDescriptor) + Send + Sync>;

/// Lógica de procesamiento de una conexión (colaborador externo)
pub type ConnectionHandler =
    Arc<dyn Fn(&mut PendingConnection, &ContextInner) -> io::Result<()> + Send + Sync>;

/// Callbacks del servidor
#[derive(Clone, Default)]
pub struct Callbacks {
    pub log_message: Option<LogHook>,
    pub init_context: Option<ContextHook>,
    pub exit_context: Option<ContextHook>,
    pub init_thread: Option<ThreadHook>,
    pub exit_thread: Option<ThreadHook>,
    pub handle_connection: Option<ConnectionHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.log_message = Some(Arc::new(f));
        self
    }

    pub fn with_init_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContextInner) + Send + Sync + 'static,
    {
        self.init_context = Some(Arc::new(f));
        self
    }

    pub fn with_exit_context<F>(mut self, f: F) -> Self
    where
        F: Fn(&ContextInner) + Send + Sync + 'static,
    {
        self.exit_context = Some(Arc::new(f));
        self
    }

    pub fn with_init_thread<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThreadDescriptor) + Send + Sync + 'static,
    {
        self.init_thread = Some(Arc::new(f));
        self
    }

    pub fn with_exit_thread<F>(mut self, f: F) -> Self
    where
        F: Fn(&ThreadDescriptor) + Send + Sync + 'static,
    {
        self.exit_thread = Some(Arc::new(f));
        self
    }

    pub fn with_handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut PendingConnection, &ContextInner) -> io::Result<()> + Send + Sync + 'static,
    {
        self.handle_connection = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("log_message", &self.log_message.is_some())
            .field("init_context", &self.init_context.is_some())
            .field("exit_context", &self.exit_context.is_some())
            .field("init_thread", &self.init_thread.is_some())
            .field("exit_thread", &self.exit_thread.is_some())
            .field("handle_connection", &self.handle_connection.is_some())
            .finish()
    }
}

/// Canal de diagnósticos: primero el hook del usuario, después `tracing`
#[derive(Clone, Default)]
pub(crate) struct Diagnostics {
    hook: Option<LogHook>,
}

impl Diagnostics {
    pub(crate) fn new(hook: Option<LogHook>) -> Self {
        Self { hook }
    }

    fn handled(&self, message: &str) -> bool {
        self.hook.as_ref().is_some_and(|hook| hook(message))
    }

    /// Reporta un error
    pub(crate) fn cry(&self, message: &str) {
        if !self.handled(message) {
            error!("{}", message);
        }
    }

    /// Reporta una condición no fatal
    pub(crate) fn warn(&self, message: &str) {
        if !self.handled(message) {
            warn!("{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_hook_receives_messages() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let diag = Diagnostics::new(Some(Arc::new(move |msg: &str| {
            sink.lock().unwrap().push(msg.to_string());
            true
        })));

        diag.cry("first");
        diag.warn("second");

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_no_hook_does_not_panic() {
        let diag = Diagnostics::default();
        diag.cry("nobody listens");
        diag.warn("still nobody");
    }

    #[test]
    fn test_debug_shows_installed_hooks() {
        let callbacks = Callbacks::new().with_log_message(|_| false);
        let text = format!("{:?}", callbacks);
        assert!(text.contains("log_message: true"));
        assert!(text.contains("handle_connection: false"));
    }
}
