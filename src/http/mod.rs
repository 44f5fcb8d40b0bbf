//! # Handler por Defecto
//! src/http/mod.rs
//!
//! Lo que corre un worker cuando el embebedor no instaló
//! `handle_connection`. Lee la cabecera, valida la request line y contesta
//! un documento JSON mínimo que identifica al worker que atendió la
//! conexión (buscándolo en el registro de threads). No implementa
//! semántica HTTP más allá de eso: una respuesta por conexión y cierre.
//!
//! ```text
//! GET / HTTP/1.0
//!
//! HTTP/1.0 200 OK
//! {"context":1,"worker":3,"role":"worker","method":"GET","path":"/",...}
//! ```

pub mod request;
pub mod response;

pub use request::{ParseError, RequestHead, MAX_HEAD_SIZE};
pub use response::{Response, StatusCode};

use crate::connection::PendingConnection;
use crate::registry;
use crate::server::ContextInner;
use serde::Serialize;
use std::io::{self, Read, Write};

/// Cuerpo de la respuesta 200
#[derive(Debug, Serialize)]
struct ServedBy<'a> {
    context: u64,
    worker: Option<u32>,
    role: &'static str,
    method: &'a str,
    path: &'a str,
    nonce: String,
}

/// Atiende una conexión con la respuesta por defecto
pub fn default_handler(conn: &mut PendingConnection, ctx: &ContextInner) -> io::Result<()> {
    let head = match read_head(conn)? {
        Some(head) => head,
        None => return Ok(()),
    };

    let response = match head {
        Err(status) => Response::error(status, status.reason_phrase()),
        Ok(bytes) => match RequestHead::parse(&bytes) {
            Err(e) => Response::error(StatusCode::BadRequest, &e.to_string()),
            Ok(request) => {
                let me = registry::current();
                let body = ServedBy {
                    context: ctx.id(),
                    worker: me.as_ref().map(|d| d.index()),
                    role: me.as_ref().map_or("unregistered", |d| d.role().as_str()),
                    method: request.method(),
                    path: request.path(),
                    nonce: ctx.next_nonce(),
                };
                let response = Response::json(StatusCode::Ok, &body);
                if request.method() == "HEAD" {
                    response.without_body()
                } else {
                    response
                }
            }
        },
    };

    conn.write_all(&response.to_bytes())?;
    conn.flush()
}

/// Lee hasta el final de la cabecera
///
/// `None` si el cliente cerró sin enviar nada; `Some(Err(431))` si la
/// cabecera excede `MAX_HEAD_SIZE`.
fn read_head(conn: &mut PendingConnection) -> io::Result<Option<Result<Vec<u8>, StatusCode>>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        if let Some(end) = find_head_end(&buffer) {
            buffer.truncate(end);
            return Ok(Some(Ok(buffer)));
        }
        if buffer.len() >= MAX_HEAD_SIZE {
            return Ok(Some(Err(StatusCode::RequestHeaderTooLarge)));
        }

        let n = conn.read(&mut chunk)?;
        if n == 0 {
            // EOF: se atiende lo que haya llegado
            return Ok((!buffer.is_empty()).then_some(Ok(buffer)));
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.0\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.0\r\n"), None);
    }
}
