//! # Worker del Pool
//! src/server/worker.rs
//!
//! `idle → dequeue → processing → idle` hasta que la cola se cierra. El
//! procesamiento se delega al handler del embebedor (o al handler por
//! defecto). Un error o un panic del handler se contiene en la iteración:
//! la conexión se cierra y el worker vuelve a `dequeue`.

use super::ContextInner;
use crate::connection::PendingConnection;
use crate::http;
use crate::registry::{self, ThreadRole};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// Cuerpo de un worker
pub(crate) fn run(inner: Arc<ContextInner>, index: usize) {
    let registration = registry::register(
        ThreadRole::Worker { index },
        inner.id(),
        Arc::downgrade(&inner),
    );
    if let Some(hook) = &inner.callbacks().init_thread {
        hook(registration.descriptor());
    }
    debug!("worker {} started", index);

    while let Some(mut conn) = inner.queue().dequeue(index) {
        process(&inner, index, &mut conn);
    }

    if let Some(hook) = &inner.callbacks().exit_thread {
        hook(registration.descriptor());
    }
    debug!("worker {} exiting", index);
}

fn process(inner: &ContextInner, index: usize, conn: &mut PendingConnection) {
    let peer = conn.remote_addr();
    trace!("worker {} serving {}", index, peer);

    if let Err(e) = conn.set_timeout(inner.request_timeout()) {
        debug!("{}: cannot set timeout: {}", peer, e);
    }

    match conn.stream().try_clone() {
        Ok(stream) => inner.begin_request(index, stream),
        Err(e) => debug!("{}: cannot track connection: {}", peer, e),
    }

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        match &inner.callbacks().handle_connection {
            Some(handler) => handler(conn, inner),
            None => http::default_handler(conn, inner),
        }
    }));

    let latency = started.elapsed();
    inner.end_request(index);
    match outcome {
        Ok(Ok(())) => inner.stats().record_processed(latency),
        Ok(Err(e)) => {
            inner.stats().record_failed(latency);
            debug!("{}: connection failed: {}", peer, e);
        }
        Err(_) => {
            inner.stats().record_failed(latency);
            inner
                .diag()
                .cry(&format!("worker {}: handler panicked serving {}", index, peer));
        }
    }
}
