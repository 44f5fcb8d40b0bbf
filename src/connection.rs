//! # Conexión Pendiente
//! src/connection.rs
//!
//! Una conexión aceptada por el thread maestro que espera a un worker. Es
//! dueña del socket: mientras está en la cola pertenece a la cola y al
//! desencolarla pasa a pertenecer a exactamente un worker. Al soltarla se
//! cierra el socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Conexión aceptada esperando procesamiento
#[derive(Debug)]
pub struct PendingConnection {
    stream: TcpStream,
    remote_addr: SocketAddr,
    /// Bytes ya leídos del socket antes de entregarla al handler
    buffered: Vec<u8>,
    /// La conexión llegó por un puerto TLS
    is_ssl: bool,
    accepted_at: Instant,
}

impl PendingConnection {
    pub fn new(stream: TcpStream, remote_addr: SocketAddr, is_ssl: bool) -> Self {
        Self {
            stream,
            remote_addr,
            buffered: Vec::new(),
            is_ssl,
            accepted_at: Instant::now(),
        }
    }

    /// Agrega bytes pre-leídos que el handler debe consumir primero
    pub fn with_buffered(mut self, bytes: &[u8]) -> Self {
        self.buffered.extend_from_slice(bytes);
        self
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn is_ssl(&self) -> bool {
        self.is_ssl
    }

    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    /// Retira los bytes pre-leídos
    pub fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffered)
    }

    /// Tiempo que lleva la conexión desde que fue aceptada
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    pub fn stream(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Aplica el mismo timeout a lectura y escritura
    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }
}

impl Read for PendingConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.buffered.is_empty() {
            let n = buf.len().min(self.buffered.len());
            buf[..n].copy_from_slice(&self.buffered[..n]);
            self.buffered.drain(..n);
            return Ok(n);
        }
        self.stream.read(buf)
    }
}

impl Write for PendingConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Drop for PendingConnection {
    fn drop(&mut self) {
        let _ = self.stream.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
