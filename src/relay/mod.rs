//! Relay core: frame assembly, event classification and the session state machine.

pub mod classify;
pub mod events;
pub mod frame;
pub mod observer;
pub mod session;
pub mod sink;

pub use classify::{
    Classified, DecodeFailurePolicy, Event, EventClassifier, DEFAULT_ERROR_MESSAGE, DONE_SENTINEL,
    UNPARSEABLE_ERROR_MESSAGE,
};
pub use events::EventStream;
pub use frame::{Frame, FrameAssembler};
pub use observer::{MetricsObserver, RelayObserver};
pub use session::{DisconnectHandle, RelaySession, SessionOutcome, SessionState};
pub use sink::DownstreamSink;
