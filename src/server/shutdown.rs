//! # Coordinador de Shutdown
//! src/server/shutdown.rs
//!
//! Orden: marcar `Stopping`, levantar la bandera de stop, despertar al
//! maestro en su poller, cerrar la cola (despierta a todos los bloqueados),
//! cortar la lectura de las conexiones en curso, join del maestro, join de
//! cada worker, `exit_context` y por último `Stopped`. El `ContextInner` solo se
//! libera cuando el último `Arc` (el del `Context`) se suelta, es decir
//! después de todos los joins.

use super::{Context, LifecycleState};
use std::sync::atomic::Ordering;
use tracing::{debug, info};

impl Context {
    /// Detiene el servidor y espera a todos sus threads
    ///
    /// Un handler bloqueado leyendo recibe EOF en vez de esperar a
    /// `request_timeout_ms`. Uno que no lee ni escribe (cómputo puro) sí
    /// retrasa el retorno hasta que termine. Llamarlo sobre un contexto ya
    /// detenido no hace nada.
    pub fn stop(&mut self) {
        if self.inner.state() == LifecycleState::Stopped {
            return;
        }

        let inner = &self.inner;
        inner.set_state(LifecycleState::Stopping);
        inner.stop_flag.store(true, Ordering::Release);
        if let Err(e) = inner.poller().notify() {
            debug!("cannot wake master: {}", e);
        }
        inner.queue().shutdown();
        inner.interrupt_requests();

        if let Some(master) = self.master.take() {
            if master.join().is_err() {
                inner.diag().cry("master thread panicked");
            }
        }

        for (index, slot) in self.workers.iter_mut().enumerate() {
            // Los slots vacíos son workers que nunca llegaron a crearse
            if let Some(handle) = slot.take() {
                if handle.join().is_err() {
                    inner.diag().cry(&format!("worker {} panicked", index));
                }
            }
        }

        if let Some(exit) = self.exit_context.take() {
            exit(inner.as_ref());
        }

        inner.set_state(LifecycleState::Stopped);
        info!("context {} stopped", inner.id());
    }
}
