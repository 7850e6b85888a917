//! Test doubles shared by the module tests.

use crate::controller::keep_alive::KeepAlive;
use crate::error::{ConfigurationError, StorageError, TransportError};
use crate::models::{NewPosition, Position};
use crate::outbox::PositionQueue;
use crate::transport::{Destination, Formatter, Payload, Transport};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

fn now_millis() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(Utc::now().timestamp_millis())
        .single()
        .unwrap()
}

pub fn fix(latitude: f64) -> NewPosition {
    NewPosition {
        device_id: "test-device".to_string(),
        time: now_millis(),
        latitude,
        longitude: 0.0,
        altitude: 0.0,
        speed: 0.0,
        course: 0.0,
        battery: 100.0,
    }
}

pub fn stored(id: i64, latitude: f64) -> Position {
    Position::from_new(id, fix(latitude))
}

/// In-memory queue with injectable failures.
#[derive(Default)]
pub struct MemoryQueue {
    rows: Mutex<Vec<Position>>,
    fail_enqueues: AtomicUsize,
    fail_reads: AtomicUsize,
    fail_marks: AtomicUsize,
    marks: AtomicUsize,
    purges: AtomicUsize,
    slow_enqueue: Mutex<Option<(f64, Duration)>>,
}

impl MemoryQueue {
    pub fn fail_next_enqueues(&self, n: usize) {
        self.fail_enqueues.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_marks(&self, n: usize) {
        self.fail_marks.store(n, Ordering::SeqCst);
    }

    /// Makes the enqueue of the fix at `latitude` take `delay`.
    pub fn delay_enqueue_of(&self, latitude: f64, delay: Duration) {
        *self.slow_enqueue.lock().unwrap() = Some((latitude, delay));
    }

    pub fn rows(&self) -> Vec<Position> {
        self.rows.lock().unwrap().clone()
    }

    pub fn delivered_ids(&self) -> Vec<i64> {
        self.rows()
            .into_iter()
            .filter(|p| p.delivered)
            .map(|p| p.id)
            .collect()
    }

    pub fn marks(&self) -> usize {
        self.marks.load(Ordering::SeqCst)
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn injected() -> StorageError {
    StorageError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl PositionQueue for MemoryQueue {
    async fn enqueue(&self, position: NewPosition) -> Result<Position, StorageError> {
        if Self::take_failure(&self.fail_enqueues) {
            return Err(injected());
        }
        let delay = match *self.slow_enqueue.lock().unwrap() {
            Some((latitude, delay)) if latitude == position.latitude => Some(delay),
            _ => None,
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut rows = self.rows.lock().unwrap();
        let id = rows.last().map(|p| p.id + 1).unwrap_or(1);
        let stored = Position::from_new(id, position);
        rows.push(stored.clone());
        Ok(stored)
    }

    async fn dequeue_oldest_unsent(&self) -> Result<Option<Position>, StorageError> {
        if Self::take_failure(&self.fail_reads) {
            return Err(injected());
        }
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().find(|p| !p.delivered).cloned())
    }

    async fn mark_delivered(&self, id: i64) -> Result<(), StorageError> {
        self.marks.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_marks) {
            return Err(injected());
        }
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|p| p.id == id) {
            Some(row) => {
                row.delivered = true;
                Ok(())
            }
            None => Err(StorageError::NotFound(id)),
        }
    }

    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StorageError> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        let len = rows.len();
        rows.retain(|p| !(p.delivered && p.time < before));
        Ok((len - rows.len()) as u64)
    }

    async fn count_unsent(&self) -> Result<u64, StorageError> {
        Ok(self.rows.lock().unwrap().iter().filter(|p| !p.delivered).count() as u64)
    }
}

/// Payload is just the record id.
pub struct IdFormatter;

impl Formatter for IdFormatter {
    fn format(
        &self,
        _destination: &Destination,
        position: &Position,
    ) -> Result<Payload, ConfigurationError> {
        Ok(Payload::new(position.id.to_string()))
    }
}

/// Transport with scripted outcomes. Every attempt is reported on the
/// channel returned by [`ScriptedTransport::new`]; sends wait on `gate`.
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<bool>>,
    attempts: mpsc::UnboundedSender<i64>,
    holding: AtomicBool,
    gate: Semaphore,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<i64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outcomes: Mutex::new(VecDeque::new()),
            attempts: tx,
            holding: AtomicBool::new(false),
            gate: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        };
        (transport, rx)
    }

    /// Queues outcomes for the next attempts; once exhausted every send succeeds.
    pub fn script(&self, outcomes: &[bool]) {
        self.outcomes.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Makes sends block until [`ScriptedTransport::release`] is called.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, payload: &Payload) -> Result<(), TransportError> {
        let id: i64 = payload.as_str().parse().unwrap();
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _ = self.attempts.send(id);

        if self.holding.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }

        let success = self.outcomes.lock().unwrap().pop_front().unwrap_or(true);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if success {
            Ok(())
        } else {
            Err(TransportError::Status(503))
        }
    }
}

#[derive(Default)]
pub struct CountingKeepAlive {
    held: AtomicIsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

impl CountingKeepAlive {
    pub fn held(&self) -> isize {
        self.held.load(Ordering::SeqCst)
    }

    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl KeepAlive for CountingKeepAlive {
    fn acquire(&self) {
        self.held.fetch_add(1, Ordering::SeqCst);
        self.acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.fetch_sub(1, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
