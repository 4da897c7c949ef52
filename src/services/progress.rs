//! Progress reporting
//!
//! Events go over an unbounded channel so the engine never waits on whoever
//! renders them. A dropped receiver is ignored.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::domain::ProgressEvent;

#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Phase;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::phase(Phase::Validate));
        sink.emit(ProgressEvent::phase(Phase::Backup));
        drop(sink);

        assert_eq!(rx.recv().await.unwrap().phase, Phase::Validate);
        assert_eq!(rx.recv().await.unwrap().phase, Phase::Backup);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(ProgressEvent::phase(Phase::Verify));
        ProgressSink::disabled().emit(ProgressEvent::phase(Phase::Verify));
    }
}
