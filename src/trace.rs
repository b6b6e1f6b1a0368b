//! Logging hooks for the matching pass.
//!
//! With the `tracing` feature the macros forward to `tracing`; without it
//! they expand to nothing observable, so call sites never need `cfg` guards.

/// Opens an info span around one pass, family or reference evaluation.
#[cfg(feature = "tracing")]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::info_span!($name $(, $($field)*)?)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_span {
    ($name:expr $(, $($field:tt)*)?) => {
        $crate::trace::SilentSpan
    };
}

/// Records a per-candidate or per-pass measurement.
///
/// Field values are still evaluated when tracing is off, so keep them cheap.
#[cfg(feature = "tracing")]
macro_rules! trace_event {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::info!(name: $name, $($key = $value),+)
    };
    ($name:expr) => {
        tracing::info!(name: $name)
    };
}

/// Reports a recoverable failure such as a frame that yields no features.
#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::warn!(name: $name, $($key = $value),+)
    };
    ($name:expr) => {
        tracing::warn!(name: $name)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_event {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        let _ = ($($value,)*);
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($name:expr $(, $key:ident = $value:expr)* $(,)?) => {
        let _ = ($($value,)*);
    };
}

pub(crate) use trace_event;
pub(crate) use trace_span;
pub(crate) use trace_warn;

/// Stand-in for `tracing::Span` so `trace_span!(..).entered()` compiles
/// without the feature.
#[cfg(not(feature = "tracing"))]
pub struct SilentSpan;

#[cfg(not(feature = "tracing"))]
impl SilentSpan {
    #[inline]
    pub fn entered(self) -> Self {
        self
    }
}
