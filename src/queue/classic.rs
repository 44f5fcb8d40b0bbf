//! # Cola Clásica
//! src/queue/classic.rs
//!
//! Buffer circular de capacidad fija protegido por un único mutex, con dos
//! condvars: "no vacía" (la esperan los workers) y "no llena" (la espera el
//! maestro). Que el maestro se bloquee con la cola llena es el único
//! mecanismo de backpressure.

use super::{DispatchQueue, EnqueueError, QueueKind};
use crate::connection::PendingConnection;
use std::collections::{TryReserveError, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

struct State {
    buffer: VecDeque<PendingConnection>,
    closed: bool,
}

/// Cola FIFO acotada
pub struct ClassicQueue {
    state: Mutex<State>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl ClassicQueue {
    /// Crea la cola reservando el buffer completo de una vez
    pub fn new(capacity: usize) -> Result<Self, TryReserveError> {
        let capacity = capacity.max(1);
        let mut buffer = VecDeque::new();
        buffer.try_reserve_exact(capacity)?;

        Ok(Self {
            state: Mutex::new(State {
                buffer,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DispatchQueue for ClassicQueue {
    fn enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(EnqueueError::Closed(conn));
            }
            if state.buffer.len() < self.capacity {
                state.buffer.push_back(conn);
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn try_enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(EnqueueError::Closed(conn));
        }
        if state.buffer.len() >= self.capacity {
            return Err(EnqueueError::Full(conn));
        }
        state.buffer.push_back(conn);
        self.not_empty.notify_one();
        Ok(())
    }

    fn dequeue(&self, _worker: usize) -> Option<PendingConnection> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(conn) = state.buffer.pop_front() {
                self.not_full.notify_one();
                return Some(conn);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn shutdown(&self) {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.buffer)
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();

        if !discarded.is_empty() {
            debug!("dispatch queue closed, dropping {} pending connections", discarded.len());
        }
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Classic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::connected_pair;
    use std::net::TcpStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn connections(n: usize) -> (Vec<PendingConnection>, Vec<TcpStream>) {
        (0..n).map(|_| connected_pair()).unzip()
    }

    #[test]
    fn test_fifo_single_consumer() {
        let queue = ClassicQueue::new(8).unwrap();
        let (conns, _clients) = connections(5);
        let expected: Vec<_> = conns.iter().map(|c| c.remote_addr()).collect();

        for conn in conns {
            queue.enqueue(conn).unwrap();
        }
        assert_eq!(queue.len(), 5);

        let got: Vec<_> = (0..5)
            .map(|_| queue.dequeue(0).unwrap().remote_addr())
            .collect();
        assert_eq!(got, expected);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_across_workers() {
        for workers in [1usize, 3, 8] {
            let queue = Arc::new(ClassicQueue::new(4).unwrap());
            let (conns, _clients) = connections(24);
            let expected: Vec<_> = conns.iter().map(|c| c.remote_addr()).collect();

            // El lock agrupa dequeue + registro para observar el orden real de entrega
            let order = Arc::new(Mutex::new(Vec::new()));
            let delivered = Arc::new(AtomicUsize::new(0));
            let consumers: Vec<_> = (0..workers)
                .map(|i| {
                    let queue = Arc::clone(&queue);
                    let order = Arc::clone(&order);
                    let delivered = Arc::clone(&delivered);
                    thread::spawn(move || loop {
                        let mut order = order.lock().unwrap();
                        match queue.dequeue(i) {
                            Some(conn) => {
                                order.push(conn.remote_addr());
                                delivered.fetch_add(1, Ordering::SeqCst);
                            }
                            None => break,
                        }
                    })
                })
                .collect();

            for conn in conns {
                queue.enqueue(conn).unwrap();
            }
            while delivered.load(Ordering::SeqCst) < expected.len() {
                thread::sleep(Duration::from_millis(5));
            }
            queue.shutdown();
            for consumer in consumers {
                consumer.join().unwrap();
            }

            assert_eq!(*order.lock().unwrap(), expected, "workers = {}", workers);
        }
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let queue = Arc::new(ClassicQueue::new(2).unwrap());
        let (mut conns, _clients) = connections(3);
        let third = conns.pop().unwrap();
        let third_addr = third.remote_addr();

        for conn in conns {
            queue.enqueue(conn).unwrap();
        }

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                queue.enqueue(third).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "enqueue on a full queue must block");
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue(0).unwrap();
        drop(first);
        producer.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);

        queue.dequeue(0).unwrap();
        assert_eq!(queue.dequeue(0).unwrap().remote_addr(), third_addr);
    }

    #[test]
    fn test_try_enqueue_reports_full() {
        let queue = ClassicQueue::new(1).unwrap();
        let (mut conns, _clients) = connections(2);

        queue.try_enqueue(conns.remove(0)).unwrap();
        let err = queue.try_enqueue(conns.remove(0)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full(_)));
        assert!(!err.is_closed());
    }

    #[test]
    fn test_shutdown_wakes_all_consumers() {
        for workers in [1usize, 8, 64] {
            let queue = Arc::new(ClassicQueue::new(4).unwrap());
            let consumers: Vec<_> = (0..workers)
                .map(|i| {
                    let queue = Arc::clone(&queue);
                    thread::spawn(move || queue.dequeue(i).is_none())
                })
                .collect();

            thread::sleep(Duration::from_millis(50));
            let start = Instant::now();
            queue.shutdown();

            for consumer in consumers {
                assert!(consumer.join().unwrap(), "consumer must observe closed queue");
            }
            assert!(start.elapsed() < Duration::from_secs(2));
        }
    }

    #[test]
    fn test_shutdown_wakes_blocked_producer() {
        let queue = Arc::new(ClassicQueue::new(1).unwrap());
        let (mut conns, _clients) = connections(2);
        queue.enqueue(conns.remove(0)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            let conn = conns.remove(0);
            thread::spawn(move || queue.enqueue(conn).unwrap_err().is_closed())
        };

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();
        assert!(producer.join().unwrap());
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_closed_queue_rejects() {
        let queue = ClassicQueue::new(4).unwrap();
        queue.shutdown();
        let (conn, _client) = connected_pair();

        let err = queue.enqueue(conn).unwrap_err();
        assert!(err.is_closed());
        drop(err.into_inner());
        assert!(queue.dequeue(0).is_none());
    }
}
