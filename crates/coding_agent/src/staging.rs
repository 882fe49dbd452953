//! Delayed, cancellable delivery of conversation items.
//!
//! Staged items are handed to a per-run worker and delivered after
//! [`DELIVERY_DELAY`] unless the run was cancelled or superseded in the
//! meantime. Delivery order follows staging order.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_protocol::ResponseItem;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::events::{AgentEvent, EventSink};
use crate::lock_unpoisoned;
use crate::transcript::Transcript;

pub const DELIVERY_DELAY: Duration = Duration::from_millis(3);

/// Decides whether work belonging to one run may still surface.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryGate {
    generation: Arc<AtomicU64>,
    run_generation: u64,
    canceled: Arc<AtomicBool>,
    hard_abort: CancellationToken,
}

impl DeliveryGate {
    pub(crate) fn new(
        generation: Arc<AtomicU64>,
        run_generation: u64,
        canceled: Arc<AtomicBool>,
        hard_abort: CancellationToken,
    ) -> Self {
        Self {
            generation,
            run_generation,
            canceled,
            hard_abort,
        }
    }

    pub(crate) fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.run_generation
    }

    pub(crate) fn is_open(&self) -> bool {
        self.is_current()
            && !self.canceled.load(Ordering::SeqCst)
            && !self.hard_abort.is_cancelled()
    }
}

type StagedSlots = Arc<Mutex<Vec<Option<ResponseItem>>>>;

enum Command {
    Deliver { index: usize, deadline: Instant },
    Settle(oneshot::Sender<()>),
}

pub(crate) struct StagingQueue {
    gate: DeliveryGate,
    staged: StagedSlots,
    staged_ids: HashSet<String>,
    commands: mpsc::UnboundedSender<Command>,
    sink: EventSink,
}

impl StagingQueue {
    /// Starts the delivery worker. When `transcript` is set, delivered items
    /// are also recorded there.
    pub(crate) fn spawn(
        gate: DeliveryGate,
        sink: EventSink,
        transcript: Option<Arc<Mutex<Transcript>>>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let staged = StagedSlots::default();
        tokio::spawn(deliver_staged(
            receiver,
            gate.clone(),
            Arc::clone(&staged),
            Arc::clone(&sink),
            transcript,
        ));

        Self {
            gate,
            staged,
            staged_ids: HashSet::new(),
            commands,
            sink,
        }
    }

    pub(crate) fn gate(&self) -> &DeliveryGate {
        &self.gate
    }

    /// Queues `item` for delivery. Stale runs and repeated ids are ignored;
    /// items without an id are always queued.
    pub(crate) fn stage(&mut self, item: ResponseItem) {
        if !self.gate.is_current() {
            return;
        }
        if let Some(id) = item.id() {
            if !self.staged_ids.insert(id.to_string()) {
                return;
            }
        }

        let index = {
            let mut staged = lock_unpoisoned(&self.staged);
            staged.push(Some(item));
            staged.len() - 1
        };
        let deadline = Instant::now() + DELIVERY_DELAY;
        if self
            .commands
            .send(Command::Deliver { index, deadline })
            .is_err()
        {
            tracing::debug!(index, "delivery worker is gone");
        }
    }

    /// Waits until every item staged so far has been delivered or dropped.
    pub(crate) async fn settle(&self) {
        let (done, settled) = oneshot::channel();
        if self.commands.send(Command::Settle(done)).is_ok() {
            let _ = settled.await;
        }
    }

    /// Settles, then emits anything still undelivered. Returns `false` when
    /// the run may no longer surface output.
    pub(crate) async fn flush(&self) -> bool {
        self.settle().await;
        if !self.gate.is_open() {
            return false;
        }

        let leftovers: Vec<ResponseItem> = lock_unpoisoned(&self.staged)
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for item in leftovers {
            (self.sink)(AgentEvent::Item(item));
        }
        true
    }
}

async fn deliver_staged(
    mut commands: mpsc::UnboundedReceiver<Command>,
    gate: DeliveryGate,
    staged: StagedSlots,
    sink: EventSink,
    transcript: Option<Arc<Mutex<Transcript>>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Deliver { index, deadline } => {
                sleep_until(deadline).await;
                if !gate.is_open() {
                    continue;
                }

                let item = lock_unpoisoned(&staged)
                    .get_mut(index)
                    .and_then(Option::take);
                let Some(item) = item else {
                    continue;
                };
                if let Some(transcript) = &transcript {
                    lock_unpoisoned(transcript).record_delivered(&item);
                }
                sink(AgentEvent::Item(item));
            }
            Command::Settle(done) => {
                let _ = done.send(());
            }
        }
    }
}
