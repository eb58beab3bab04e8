use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::analysis::AnalysisFrame;

pub type FrameStream = Sse<Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>;

/// Build a Server-Sent Events stream over one subscriber queue.
///
/// Dropping the response (client disconnect) drops the receiver, so the
/// broadcaster's next push fails and prunes the subscriber.
pub fn frames(receiver: mpsc::Receiver<Arc<AnalysisFrame>>) -> FrameStream {
    let stream = ReceiverStream::new(receiver).filter_map(|frame| async move {
        match serde_json::to_string(frame.as_ref()) {
            Ok(payload) => Some(Ok(Event::default().event("frame").data(payload))),
            Err(err) => {
                log::warn!("[Http] Failed to encode frame {}: {}", frame.seq, err);
                None
            }
        }
    });

    Sse::new(Box::pin(stream) as Pin<Box<_>>).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(5))
            .text("keepalive"),
    )
}
