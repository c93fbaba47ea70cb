//! Startup queue
//!
//! Connect instructions are dispatched strictly one at a time: the head of
//! the queue goes out immediately when it is pushed onto an empty queue, and
//! every later item waits until the previous cluster reports its shards
//! started, plus a fixed pacing delay. This keeps concurrent gateway
//! identifies down to one cluster at a time.

use gantry_ipc::MasterMessage;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;

/// One queued connect instruction
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub cluster_id: u32,
    pub message: MasterMessage,
}

enum QueueCommand {
    Enqueue(QueueItem),
    Advance,
}

/// Handle to the startup queue task. Dispatched items come out of the
/// receiver returned by [`StartupQueue::new`].
pub struct StartupQueue {
    commands: mpsc::UnboundedSender<QueueCommand>,
}

impl StartupQueue {
    pub fn new(pacing: Duration) -> (Self, mpsc::UnboundedReceiver<QueueItem>) {
        let (commands, mut command_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel::<QueueItem>();

        tokio::spawn(async move {
            let mut items: VecDeque<QueueItem> = VecDeque::new();

            while let Some(command) = command_rx.recv().await {
                match command {
                    QueueCommand::Enqueue(item) => {
                        items.push_back(item);
                        // The head of an otherwise empty queue goes out
                        // without pacing.
                        if items.len() == 1 {
                            if let Some(front) = items.front() {
                                if dispatch_tx.send(front.clone()).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    QueueCommand::Advance => {
                        items.pop_front();
                        if items.is_empty() {
                            continue;
                        }
                        // Pacing runs inline: enqueues arriving meanwhile
                        // buffer in the command channel and cannot trigger a
                        // second dispatch.
                        tokio::time::sleep(pacing).await;
                        if let Some(front) = items.front() {
                            if dispatch_tx.send(front.clone()).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        (Self { commands }, dispatch_rx)
    }

    /// Push an item; dispatches it immediately when the queue was empty
    pub fn enqueue(&self, item: QueueItem) {
        let _ = self.commands.send(QueueCommand::Enqueue(item));
    }

    /// Drop the in-flight head and, after the pacing delay, dispatch the next
    pub fn advance(&self) {
        let _ = self.commands.send(QueueCommand::Advance);
    }
}
