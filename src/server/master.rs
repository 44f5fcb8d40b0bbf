//! # Thread Maestro
//! src/server/master.rs
//!
//! Dueño de los sockets de escucha. Espera en el poller del contexto a que
//! algún listener esté listo, acepta hasta vaciarlo, aplica la ACL y encola
//! cada conexión. Cuando la cola reporta que fue cerrada (o `stop` lo
//! despierta con `notify`) suelta los listeners y cierra la cola para
//! despertar a los workers.
//!
//! ```text
//! initializing → listening → draining → stopped
//! ```

use super::ContextInner;
use crate::connection::PendingConnection;
use crate::registry::{self, ThreadRole};
use crate::setup::ListeningSocket;
use polling::Event;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Tope de cada espera en el poller; `stop` igual despierta al maestro
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Estado del thread maestro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MasterState {
    Initializing = 0,
    Listening = 1,
    Draining = 2,
    Stopped = 3,
}

impl MasterState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => MasterState::Listening,
            2 => MasterState::Draining,
            3 => MasterState::Stopped,
            _ => MasterState::Initializing,
        }
    }
}

/// Cuerpo del thread maestro
pub(crate) fn run(inner: Arc<ContextInner>, listeners: Vec<ListeningSocket>) {
    let registration = registry::register(ThreadRole::Master, inner.id(), Arc::downgrade(&inner));
    if let Some(hook) = &inner.callbacks().init_thread {
        hook(registration.descriptor());
    }

    inner.set_master_state(MasterState::Listening);
    info!("master thread started, {} listening sockets", listeners.len());

    accept_loop(&inner, &listeners);

    inner.set_master_state(MasterState::Draining);
    for socket in &listeners {
        let _ = inner.poller().delete(&socket.listener);
    }
    drop(listeners);
    inner.queue().shutdown();

    if let Some(hook) = &inner.callbacks().exit_thread {
        hook(registration.descriptor());
    }
    inner.set_master_state(MasterState::Stopped);
    info!("master thread stopped");
}

fn accept_loop(inner: &ContextInner, listeners: &[ListeningSocket]) {
    let poller = inner.poller();
    let mut events = Vec::new();

    while !inner.stop_requested() {
        events.clear();
        match poller.wait(&mut events, Some(STOP_CHECK_INTERVAL)) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                inner.diag().cry(&format!("poll on listening sockets failed: {}", e));
                return;
            }
        }

        for event in &events {
            let Some(socket) = listeners.get(event.key) else {
                continue;
            };
            if !accept_ready(inner, socket) {
                return;
            }
            // Los eventos son de un solo disparo: hay que rearmar el listener
            if let Err(e) = poller.modify(&socket.listener, Event::readable(event.key)) {
                inner
                    .diag()
                    .cry(&format!("cannot rearm {}: {}", socket.local_addr, e));
            }
        }
    }
}

/// Acepta hasta que el listener no tenga más conexiones pendientes
///
/// `false` si la cola ya fue cerrada.
fn accept_ready(inner: &ContextInner, socket: &ListeningSocket) -> bool {
    loop {
        match socket.listener.accept() {
            Ok((stream, addr)) => {
                if !dispatch(inner, socket, stream, addr) {
                    return false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                inner
                    .diag()
                    .cry(&format!("accept() failed on {}: {}", socket.local_addr, e));
                return true;
            }
        }
    }
}

/// Entrega una conexión aceptada; `false` si la cola ya fue cerrada
fn dispatch(
    inner: &ContextInner,
    socket: &ListeningSocket,
    stream: TcpStream,
    addr: SocketAddr,
) -> bool {
    if let Some(acl) = inner.acl() {
        if !acl.allows(addr.ip()) {
            inner
                .diag()
                .cry(&format!("{} is not allowed to connect", addr.ip()));
            inner.stats().record_rejected();
            return true;
        }
    }

    // En algunas plataformas el socket aceptado hereda el modo no bloqueante
    if let Err(e) = stream.set_nonblocking(false) {
        inner.diag().cry(&format!("{}: cannot configure socket: {}", addr, e));
        return true;
    }

    inner.stats().record_accepted();
    let conn = PendingConnection::new(stream, addr, socket.is_ssl);

    match inner.queue().enqueue(conn) {
        Ok(()) => true,
        Err(e) => {
            debug!("{}: dispatch queue closed", e.into_inner().remote_addr());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::inner_for_test;
    use std::net::TcpListener;

    fn accepted_stream() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, addr) = listener.accept().unwrap();
        (stream, addr, client)
    }

    #[test]
    fn test_dispatch_enqueues_while_open() {
        let inner = inner_for_test();
        let socket = ListeningSocket::bind("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let (stream, addr, _client) = accepted_stream();

        assert!(dispatch(&inner, &socket, stream, addr));
        assert_eq!(inner.queue().len(), 1);
    }

    #[test]
    fn test_dispatch_stops_on_closed_queue() {
        let inner = inner_for_test();
        inner.queue().shutdown();
        let socket = ListeningSocket::bind("127.0.0.1:0".parse().unwrap(), false).unwrap();
        let (stream, addr, mut client) = accepted_stream();

        assert!(!dispatch(&inner, &socket, stream, addr));
        assert_eq!(inner.stats().accepted(), 1);

        // La conexión devuelta se cierra
        let mut buf = Vec::new();
        assert_eq!(std::io::Read::read_to_end(&mut client, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_master_state_decoding() {
        for state in [
            MasterState::Initializing,
            MasterState::Listening,
            MasterState::Draining,
            MasterState::Stopped,
        ] {
            assert_eq!(MasterState::from_u8(state as u8), state);
        }
        assert_eq!(MasterState::from_u8(200), MasterState::Initializing);
    }
}
