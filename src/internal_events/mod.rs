mod http_client;
mod loki;
mod object_storage;

pub use self::http_client::*;
pub use self::loki::*;
pub use self::object_storage::*;

/// An observable state change inside the crate.
///
/// Implementations log through `tracing` and record their counters through the `metrics`
/// facade. Nothing is recorded unless the embedding application installs a recorder.
pub trait InternalEvent: Sized {
    fn emit(self);

    // Optional for backwards compat until all events implement this
    fn name(&self) -> Option<&'static str> {
        None
    }
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
