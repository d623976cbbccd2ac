// Event system foundation
//
// Two complementary surfaces: typed listener registries consumed by the
// managers and response handlers, and a broadcast publisher for callers that
// want a single stream of JSON lifecycle events.

pub mod observable;
pub mod publisher;

pub use observable::{
    NegotiationListener, NegotiationObservable, Observable, TransferObservable,
    TransferProcessListener,
};
pub use publisher::{EventPublisher, PublishedEvent};
