use crate::frame::FrameData;
use tokio::sync::broadcast;
use tracing::trace;

/// Fan-out of captured frames to any number of subscribers.
///
/// Slow subscribers lag and lose the oldest frames rather than blocking the
/// camera.
#[derive(Clone)]
pub struct ImagePublisher {
    sender: broadcast::Sender<FrameData>,
}

impl ImagePublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FrameData> {
        self.sender.subscribe()
    }

    /// Publish a frame; returns the number of subscribers that received it
    pub fn publish(&self, frame: FrameData) -> usize {
        let id = frame.id;
        match self.sender.send(frame) {
            Ok(receivers) => {
                trace!("Published frame {} to {} subscriber(s)", id, receivers);
                receivers
            }
            Err(_) => {
                trace!("No subscribers for frame {}", id);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use chrono::Utc;

    fn frame(id: u64) -> FrameData {
        FrameData::new(id, Utc::now(), vec![0; 4], 2, 2, FrameFormat::Mono8)
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let publisher = ImagePublisher::new(4);
        assert!(!publisher.has_subscribers());
        assert_eq!(publisher.publish(frame(1)), 0);

        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.publish(frame(2)), 1);
        assert_eq!(rx.recv().await.unwrap().id, 2);

        drop(rx);
        assert!(!publisher.has_subscribers());
    }
}
