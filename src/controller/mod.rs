//! Delivery controller.
//!
//! A single task owns all delivery state and processes one event at a time.
//! Outbox and network I/O run on spawned tasks whose results come back on a
//! completion channel, tagged with the epoch they were dispatched in. `stop()`
//! bumps the epoch, so anything still in flight lands as a no-op.
//!
//! ```text
//! capture -> write -> [idle & waiting & online] -> read
//! read -> send -> mark -> read -> ... -> (empty) idle
//! send/mark/read failure -> retry wait -> read
//! ```

pub mod keep_alive;

use crate::error::{ConfigurationError, StorageError, TransportError};
use crate::models::{NewPosition, Position};
use crate::outbox::PositionQueue;
use crate::status::StatusSender;
use crate::transport::{Destination, Formatter, Transport};
use chrono::Utc;
use keep_alive::{KeepAlive, KeepAliveToken};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Writing,
    Reading,
    Sending,
    Marking,
    RetryWait,
}

/// What happens to delivered records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    KeepAll,
    PurgeAfter(Duration),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub retry_delay: Duration,
    pub keep_alive_timeout: Duration,
    pub retention: Retention,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            retention: Retention::KeepAll,
        }
    }
}

enum Command {
    Start,
    Stop,
    PositionCaptured(NewPosition),
    NetworkChanged(bool),
    SetDestination(Option<Destination>),
    State(oneshot::Sender<State>),
}

struct Completion {
    epoch: u64,
    outcome: Outcome,
}

enum Outcome {
    Written(Result<Position, StorageError>),
    Read(Result<Option<Position>, StorageError>),
    Sent(Position, Result<(), TransportError>),
    Marked(Position, Result<(), StorageError>),
    RetryElapsed,
    Purged(Result<u64, StorageError>),
    Counted(Result<u64, StorageError>),
}

/// Cheap, cloneable entry point to a running [`DeliveryController`].
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    pub fn start(&self) {
        self.send(Command::Start);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn position_captured(&self, position: NewPosition) {
        self.send(Command::PositionCaptured(position));
    }

    pub fn network_changed(&self, online: bool) {
        self.send(Command::NetworkChanged(online));
    }

    pub fn set_destination(&self, destination: Option<Destination>) {
        self.send(Command::SetDestination(destination));
    }

    /// Current state, or `None` once the controller has exited.
    pub async fn state(&self) -> Option<State> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::State(tx));
        rx.await.ok()
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Delivery controller has exited, command dropped");
        }
    }
}

pub struct DeliveryController {
    queue: Arc<dyn PositionQueue>,
    formatter: Arc<dyn Formatter>,
    transport: Arc<dyn Transport>,
    keep_alive: Arc<dyn KeepAlive>,
    status: StatusSender,
    config: ControllerConfig,
    destination: Option<Destination>,
    online: bool,

    running: bool,
    epoch: u64,
    drain: State,
    waiting: bool,
    pending_writes: VecDeque<NewPosition>,
    writing: bool,
    write_task: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
    write_token: Option<KeepAliveToken>,
    drain_token: Option<KeepAliveToken>,
    completions: mpsc::UnboundedSender<Completion>,
    completions_rx: Option<mpsc::UnboundedReceiver<Completion>>,
}

impl DeliveryController {
    pub fn new(
        queue: Arc<dyn PositionQueue>,
        formatter: Arc<dyn Formatter>,
        transport: Arc<dyn Transport>,
        keep_alive: Arc<dyn KeepAlive>,
        status: StatusSender,
        config: ControllerConfig,
    ) -> Self {
        let (completions, completions_rx) = mpsc::unbounded_channel();
        Self {
            queue,
            formatter,
            transport,
            keep_alive,
            status,
            config,
            destination: None,
            online: false,
            running: false,
            epoch: 0,
            drain: State::Idle,
            waiting: true,
            pending_writes: VecDeque::new(),
            writing: false,
            write_task: None,
            retry_timer: None,
            write_token: None,
            drain_token: None,
            completions,
            completions_rx: Some(completions_rx),
        }
    }

    pub fn with_destination(mut self, destination: Option<Destination>) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Moves the controller onto its own task. It runs until every handle is dropped.
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (ControllerHandle { tx }, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let Some(mut completions) = self.completions_rx.take() else {
            return;
        };

        loop {
            tokio::select! {
                biased;
                Some(completion) = completions.recv() => self.on_completion(completion),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }

        self.stop();
        debug!("Delivery controller exited");
    }

    fn state(&self) -> State {
        if self.drain == State::Idle && (self.writing || !self.pending_writes.is_empty()) {
            State::Writing
        } else {
            self.drain
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::PositionCaptured(position) => self.position_captured(position),
            Command::NetworkChanged(online) => self.network_changed(online),
            Command::SetDestination(destination) => self.set_destination(destination),
            Command::State(reply) => {
                let _ = reply.send(self.state());
            }
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        if completion.epoch != self.epoch {
            debug!(
                "Ignoring result from epoch {} (current {})",
                completion.epoch, self.epoch
            );
            return;
        }

        match completion.outcome {
            Outcome::Written(result) => self.written(result),
            Outcome::Read(Ok(Some(position))) => self.send(position),
            Outcome::Read(Ok(None)) => {
                debug!("read(): outbox empty");
                self.drain = State::Idle;
                self.waiting = true;
                self.purge();
            }
            Outcome::Read(Err(e)) => {
                error!("read(): selection failed: {}", e);
                self.status.publish(format!("Storage error: {}", e));
                self.retry();
            }
            Outcome::Sent(position, Ok(())) => {
                log_position("send(): delivered", Some(&position));
                self.status.publish("Position sent");
                self.mark(position);
            }
            Outcome::Sent(position, Err(e)) => {
                self.drain_token = None;
                warn!("send(): failed for position {}: {}", position.id, e);
                self.status.publish(format!("Send failed: {}", e));
                self.retry();
            }
            Outcome::Marked(position, Ok(())) => {
                log_position("mark(): done", Some(&position));
                self.drain_token = None;
                self.read();
            }
            Outcome::Marked(position, Err(e)) => {
                self.drain_token = None;
                error!("mark(): failed for position {}: {}", position.id, e);
                self.status.publish(format!("Storage error: {}", e));
                self.retry();
            }
            Outcome::RetryElapsed => {
                self.retry_timer = None;
                if self.drain != State::RetryWait {
                    return;
                }
                if self.online {
                    self.read();
                } else {
                    debug!("retry(): offline, waiting for connectivity");
                    self.drain = State::Idle;
                    self.waiting = true;
                }
            }
            Outcome::Purged(Ok(count)) => {
                if count > 0 {
                    info!("Purged {} delivered positions", count);
                }
            }
            Outcome::Purged(Err(e)) => warn!("Failed to purge delivered positions: {}", e),
            Outcome::Counted(Ok(count)) => {
                if count > 0 {
                    self.status.publish(format!("{} positions pending", count));
                }
            }
            Outcome::Counted(Err(e)) => warn!("Failed to count pending positions: {}", e),
        }
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.waiting = true;
        info!("Delivery controller started");
        self.status.publish("Service started");

        let queue = self.queue.clone();
        self.dispatch(async move { Outcome::Counted(queue.count_unsent().await) });
        self.purge();
        self.resume_if_waiting();
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.epoch += 1;

        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.write_token = None;
        self.drain_token = None;
        self.drain = State::Idle;
        self.waiting = true;
        self.writing = false;
        self.flush_pending_writes();

        info!("Delivery controller stopped");
        self.status.publish("Service stopped");
    }

    fn position_captured(&mut self, position: NewPosition) {
        if !self.running {
            warn!("Position captured while stopped, ignoring");
            return;
        }
        self.status.publish("Location update");
        self.pending_writes.push_back(position);
        self.write_next();
    }

    fn network_changed(&mut self, online: bool) {
        if self.online == online {
            return;
        }
        self.online = online;
        info!("Network is {}", if online { "online" } else { "offline" });
        self.status.publish(format!(
            "Connectivity change: {}",
            if online { "online" } else { "offline" }
        ));
        if online {
            self.resume_if_waiting();
        }
    }

    fn set_destination(&mut self, destination: Option<Destination>) {
        match destination {
            Some(destination) => {
                info!("Destination set to {}", destination);
                self.destination = Some(destination);
                self.resume_if_waiting();
            }
            None => {
                self.destination = None;
                self.configuration_error(ConfigurationError::MissingAddress);
            }
        }
    }

    fn write_next(&mut self) {
        if self.writing {
            return;
        }
        let Some(position) = self.pending_writes.pop_front() else {
            self.write_token = None;
            return;
        };

        debug!(
            "write(): time:{} lat:{} lon:{}",
            position.time.timestamp(),
            position.latitude,
            position.longitude
        );
        self.writing = true;
        if self.write_token.is_none() {
            self.write_token = Some(self.hold());
        }
        let queue = self.queue.clone();
        let status = self.status.clone();
        let previous = self.write_task.take();
        self.write_task = Some(self.dispatch(async move {
            // A write left over from before the last stop() commits first.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let result = queue.enqueue(position).await;
            if let Err(e) = &result {
                report_write_failure(&status, e);
            }
            Outcome::Written(result)
        }));
    }

    fn written(&mut self, result: Result<Position, StorageError>) {
        self.writing = false;
        let stored = match result {
            Ok(position) => {
                log_position("write(): position inserted", Some(&position));
                true
            }
            Err(_) => false,
        };

        self.write_next();
        if stored {
            self.resume_if_waiting();
        }
    }

    fn resume_if_waiting(&mut self) {
        if self.running && self.drain == State::Idle && self.waiting && self.online {
            self.read();
        }
    }

    fn read(&mut self) {
        if self.destination.is_none() {
            self.drain = State::Idle;
            self.waiting = true;
            self.configuration_error(ConfigurationError::MissingAddress);
            return;
        }

        log_position("read()", None);
        self.drain = State::Reading;
        self.waiting = false;
        let queue = self.queue.clone();
        self.dispatch(async move { Outcome::Read(queue.dequeue_oldest_unsent().await) });
    }

    fn send(&mut self, position: Position) {
        let payload = match &self.destination {
            Some(destination) => self.formatter.format(destination, &position),
            None => Err(ConfigurationError::MissingAddress),
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(e) => {
                self.drain = State::Idle;
                self.waiting = true;
                self.configuration_error(e);
                return;
            }
        };

        log_position("send()", Some(&position));
        self.drain = State::Sending;
        self.drain_token = None;
        self.drain_token = Some(self.hold());
        let transport = self.transport.clone();
        self.dispatch(async move {
            let result = transport.send(&payload).await;
            Outcome::Sent(position, result)
        });
    }

    fn mark(&mut self, position: Position) {
        self.drain = State::Marking;
        self.drain_token = None;
        self.drain_token = Some(self.hold());
        let queue = self.queue.clone();
        self.dispatch(async move {
            let result = queue.mark_delivered(position.id).await;
            Outcome::Marked(position, result)
        });
    }

    fn retry(&mut self) {
        debug!("retry(): next attempt in {:?}", self.config.retry_delay);
        self.drain = State::RetryWait;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        let delay = self.config.retry_delay;
        self.retry_timer = Some(self.dispatch(async move {
            tokio::time::sleep(delay).await;
            Outcome::RetryElapsed
        }));
    }

    fn purge(&mut self) {
        let Retention::PurgeAfter(age) = self.config.retention else {
            return;
        };
        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return;
        };
        let queue = self.queue.clone();
        self.dispatch(async move { Outcome::Purged(queue.purge_delivered(cutoff).await) });
    }

    /// Persists captures that were still waiting for their turn. Runs after the
    /// write already in flight so insertion order matches capture order. The
    /// flush becomes the write that the next capture after `start()` waits on.
    fn flush_pending_writes(&mut self) {
        if self.pending_writes.is_empty() {
            return;
        }
        let previous = self.write_task.take();
        let positions: Vec<NewPosition> = self.pending_writes.drain(..).collect();
        let queue = self.queue.clone();
        let status = self.status.clone();
        info!("Persisting {} queued positions before stopping", positions.len());

        self.write_task = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            for position in positions {
                if let Err(e) = queue.enqueue(position).await {
                    report_write_failure(&status, &e);
                }
            }
        }));
    }

    fn configuration_error(&self, e: ConfigurationError) {
        warn!("Delivery paused: {}", e);
        self.status.publish(format!("Configuration error: {}", e));
    }

    fn hold(&self) -> KeepAliveToken {
        KeepAliveToken::acquire(self.keep_alive.clone(), self.config.keep_alive_timeout)
    }

    fn dispatch<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let epoch = self.epoch;
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            let _ = completions.send(Completion { epoch, outcome });
        })
    }
}

/// Runs inside the write task, outside the epoch guard.
fn report_write_failure(status: &StatusSender, e: &StorageError) {
    error!("write(): failed position insertion: {}", e);
    status.publish(format!("Storage error: {}", e));
}

fn log_position(action: &str, position: Option<&Position>) {
    match position {
        Some(p) => debug!(
            "{} (id:{} time:{} lat:{} lon:{})",
            action,
            p.id,
            p.time.timestamp(),
            p.latitude,
            p.longitude
        ),
        None => debug!("{}", action),
    }
}
