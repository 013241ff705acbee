use std::time::Duration;

use dtm_logging::dtm_warn;
use futures_util::Stream;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::fetch::ProgressSink;
use crate::ProgressEvent;

/// What a subscriber receives: a job event, or a keepalive after an idle interval.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(ProgressEvent),
    Heartbeat,
}

/// Fan-out of one job's progress events.
///
/// Subscribers only see events published after they subscribed. Publishing never
/// waits on subscribers; one that falls more than the channel capacity behind
/// skips the events it missed.
#[derive(Debug, Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
    heartbeat: Duration,
}

impl ProgressChannel {
    pub fn new(capacity: usize, heartbeat: Duration) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, heartbeat }
    }

    pub fn publish(&self, event: ProgressEvent) {
        // No receivers is not an error for the producer.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            heartbeat: self.heartbeat,
            finished: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ProgressSink for ProgressChannel {
    fn emit(&self, event: ProgressEvent) {
        self.publish(event);
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ProgressEvent>,
    heartbeat: Duration,
    finished: bool,
}

impl Subscription {
    /// Next delivery, or `None` once a terminal event was delivered or the producer is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        loop {
            match tokio::time::timeout(self.heartbeat, self.receiver.recv()).await {
                Err(_) => return Some(Delivery::Heartbeat),
                Ok(Ok(event)) => {
                    self.finished = event.is_terminal();
                    return Some(Delivery::Event(event));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    dtm_warn!("Progress subscriber lagged, skipped {} events", skipped);
                }
                Ok(Err(RecvError::Closed)) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Like [`Subscription::next`] but without heartbeats.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.next().await? {
                Delivery::Event(event) => return Some(event),
                Delivery::Heartbeat => continue,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let delivery = subscription.next().await?;
            Some((delivery, subscription))
        })
    }
}
