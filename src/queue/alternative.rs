//! # Cola Alternativa (un slot por worker)
//! src/queue/alternative.rs
//!
//! Cada worker tiene su propio slot de socket y su propio evento. El maestro
//! recorre los slots en round-robin desde un cursor compartido y reclama uno
//! cuyo worker esté libre (bloqueado en `dequeue`) con un compare-exchange;
//! deja la conexión en ese slot y señala el evento del worker.
//!
//! Un slot ocupado nunca se sobrescribe: si no hay ningún worker libre, el
//! maestro espera a que alguno vuelva a `dequeue`. Los workers no comparten
//! ningún lock entre sí en el camino caliente, a cambio de que el orden sea
//! FIFO solo por worker.

use super::{DispatchQueue, EnqueueError, QueueKind};
use crate::connection::PendingConnection;
use std::collections::TryReserveError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Slot y evento de un worker
struct WorkerSlot {
    /// El worker está esperando en `dequeue` y su slot está vacío
    idle: AtomicBool,
    conn: Mutex<Option<PendingConnection>>,
    event: Condvar,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            idle: AtomicBool::new(false),
            conn: Mutex::new(None),
            event: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<PendingConnection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cola con un slot por worker
pub struct SlotQueue {
    slots: Vec<WorkerSlot>,
    cursor: AtomicUsize,
    closed: AtomicBool,
    /// Generación de vacantes: sube cada vez que un worker queda libre
    vacancy: Mutex<u64>,
    vacancy_changed: Condvar,
}

impl SlotQueue {
    /// Crea un slot y un evento por worker
    pub fn new(workers: usize) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(workers)?;
        slots.extend((0..workers).map(|_| WorkerSlot::new()));

        Ok(Self {
            slots,
            cursor: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            vacancy: Mutex::new(0),
            vacancy_changed: Condvar::new(),
        })
    }

    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    fn lock_vacancy(&self) -> MutexGuard<'_, u64> {
        self.vacancy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce_vacancy(&self) {
        let mut generation = self.lock_vacancy();
        *generation = generation.wrapping_add(1);
        self.vacancy_changed.notify_all();
    }

    /// Reclama el primer slot libre empezando en el cursor
    fn claim_idle_slot(&self) -> Option<usize> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
        (0..n).map(|offset| (start + offset) % n).find(|&i| {
            self.slots[i]
                .idle
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        })
    }

    /// Deja la conexión en un slot ya reclamado y despierta a su worker
    fn hand_over(&self, index: usize, conn: PendingConnection) -> Result<(), EnqueueError> {
        let slot = &self.slots[index];
        let mut guard = slot.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed(conn));
        }
        debug_assert!(guard.is_none(), "claimed slot {} was not empty", index);
        *guard = Some(conn);
        slot.event.notify_one();
        Ok(())
    }
}

impl DispatchQueue for SlotQueue {
    fn enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(EnqueueError::Closed(conn));
            }

            let seen = *self.lock_vacancy();
            if let Some(index) = self.claim_idle_slot() {
                return self.hand_over(index, conn);
            }

            // Ningún worker libre: esperar a que cambie la generación
            let mut generation = self.lock_vacancy();
            while *generation == seen && !self.closed.load(Ordering::Acquire) {
                generation = self
                    .vacancy_changed
                    .wait(generation)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    fn try_enqueue(&self, conn: PendingConnection) -> Result<(), EnqueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EnqueueError::Closed(conn));
        }
        match self.claim_idle_slot() {
            Some(index) => self.hand_over(index, conn),
            None => Err(EnqueueError::Full(conn)),
        }
    }

    fn dequeue(&self, worker: usize) -> Option<PendingConnection> {
        let slot = self.slots.get(worker)?;
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        slot.idle.store(true, Ordering::Release);
        self.announce_vacancy();

        let mut guard = slot.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                slot.idle.store(false, Ordering::Release);
                return None;
            }
            if let Some(conn) = guard.take() {
                return Some(conn);
            }
            guard = slot
                .event
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);

        let mut discarded = 0usize;
        for slot in &self.slots {
            let pending = slot.lock().take();
            if pending.is_some() {
                discarded += 1;
            }
            slot.event.notify_all();
        }
        self.announce_vacancy();

        if discarded > 0 {
            debug!("dispatch queue closed, dropping {} pending connections", discarded);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    fn kind(&self) -> QueueKind {
        QueueKind::Alternative
    }
}
