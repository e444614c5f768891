//! Lazy, cancellable event sequence over an upstream chunk producer.

use futures::Stream;

use super::classify::{Event, EventClassifier};
use super::frame::FrameAssembler;
use crate::upstream::{CancelSignal, ChunkProducer};

/// Pull-based sequence of classified events.
///
/// The producer is only read once every frame already buffered has been
/// handed out, so at most one upstream chunk is in flight. The sequence ends
/// permanently after the first terminal event, after the end-of-stream flush,
/// or as soon as the cancel signal is observed.
pub struct EventStream {
    producer: ChunkProducer,
    assembler: FrameAssembler,
    classifier: EventClassifier,
    cancel: CancelSignal,
    upstream_ended: bool,
    finished: bool,
}

impl EventStream {
    pub fn new(
        producer: ChunkProducer,
        assembler: FrameAssembler,
        classifier: EventClassifier,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            producer,
            assembler,
            classifier,
            cancel,
            upstream_ended: false,
            finished: false,
        }
    }

    /// Next event, or `None` once the sequence is over.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            if self.finished {
                return None;
            }
            if self.cancel.is_cancelled() {
                self.finished = true;
                return None;
            }

            while let Some(frame) = self.assembler.next_frame() {
                if let Some(event) = self.classifier.classify(&frame) {
                    return Some(self.emit(event));
                }
            }

            // Only the incomplete tail is left at this point
            if let Err(e) = self.assembler.check_limit() {
                return Some(self.emit(Event::Error(e.to_string())));
            }

            if self.upstream_ended {
                // Upstreams may omit the delimiter after their last message
                self.finished = true;
                return self
                    .assembler
                    .finish()
                    .and_then(|frame| self.classifier.classify(&frame));
            }

            match self.producer.next().await {
                Some(Ok(chunk)) => self.assembler.push(&chunk),
                Some(Err(e)) => return Some(self.emit(Event::Error(e.to_string()))),
                None => self.upstream_ended = true,
            }
        }
    }

    /// Whether no further events will be produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn emit(&mut self, event: Event) -> Event {
        if event.is_terminal() {
            self.finished = true;
        }
        event
    }

    /// Adapt into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut events| async move {
            let event = events.next().await?;
            Some((event, events))
        })
    }
}
