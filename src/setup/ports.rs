//! # Puertos de Escucha
//! src/setup/ports.rs
//!
//! Parsea `listening_ports` (lista separada por comas) y abre un socket por
//! entrada. Formatos aceptados:
//!
//! ```text
//! 8080             todas las interfaces IPv4
//! 127.0.0.1:8080   una interfaz IPv4
//! [::1]:8080       una interfaz IPv6
//! 8443s            sufijo `s`: puerto TLS (requiere ssl_certificate)
//! ```
//!
//! Los sockets quedan en modo no bloqueante: el maestro espera su readiness
//! en un poller y acepta hasta recibir `WouldBlock`.

use super::{Setup, SetupStep};
use crate::config::OptionIndex;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use tracing::info;

/// Socket de escucha ya abierto
#[derive(Debug)]
pub struct ListeningSocket {
    pub listener: TcpListener,
    /// Dirección real (resuelve el puerto 0)
    pub local_addr: SocketAddr,
    pub is_ssl: bool,
}

impl ListeningSocket {
    /// Abre el socket en modo no bloqueante
    pub fn bind(addr: SocketAddr, is_ssl: bool) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            is_ssl,
        })
    }
}

/// Entrada de `listening_ports` ya parseada
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub addr: SocketAddr,
    pub is_ssl: bool,
}

/// Parsea una entrada de la lista de puertos
pub fn parse_port_spec(spec: &str) -> Result<PortSpec, String> {
    let spec = spec.trim();
    let (body, is_ssl) = match spec.strip_suffix('s') {
        Some(body) => (body, true),
        None => (spec, false),
    };

    if body.is_empty() {
        return Err(format!("empty port entry '{}'", spec));
    }

    let addr = if body.bytes().all(|b| b.is_ascii_digit()) {
        let port: u16 = body
            .parse()
            .map_err(|_| format!("port out of range in '{}'", spec))?;
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    } else {
        body.parse::<SocketAddr>()
            .map_err(|e| format!("invalid address '{}': {}", spec, e))?
    };

    Ok(PortSpec { addr, is_ssl })
}

/// Colaborador que abre los puertos de escucha
pub struct ListeningPorts;

impl SetupStep for ListeningPorts {
    fn name(&self) -> &'static str {
        "listening_ports"
    }

    fn apply(&self, setup: &mut Setup) -> bool {
        let list = setup
            .config()
            .get(OptionIndex::ListeningPorts)
            .unwrap_or("")
            .to_string();

        for entry in list.split(',').filter(|e| !e.trim().is_empty()) {
            let spec = match parse_port_spec(entry) {
                Ok(spec) => spec,
                Err(e) => {
                    setup.cry(&format!("Invalid port spec: {}", e));
                    return false;
                }
            };

            if spec.is_ssl && setup.tls().is_none() {
                setup.cry(&format!(
                    "Cannot add SSL socket (entry '{}'), is ssl_certificate set?",
                    entry.trim()
                ));
                return false;
            }

            match ListeningSocket::bind(spec.addr, spec.is_ssl) {
                Ok(socket) => {
                    info!(
                        "listening on {}{}",
                        socket.local_addr,
                        if socket.is_ssl { " (ssl)" } else { "" }
                    );
                    setup.add_listener(socket);
                }
                Err(e) => {
                    setup.cry(&format!("cannot bind to {}: {}", entry.trim(), e));
                    return false;
                }
            }
        }

        if setup.listeners().is_empty() {
            setup.cry("No listening ports configured");
            return false;
        }
        true
    }
}
