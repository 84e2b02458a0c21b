//! Assertions over recorded handler callbacks

// These helpers panic on failure; that is their purpose in tests
#![allow(clippy::missing_panics_doc)]

use super::recording::{HandlerEventKind, HandlerLog};

/// Assert the handler labelled `label` saw exactly `expected`, in order
pub fn assert_callback_sequence(log: &HandlerLog, label: &str, expected: &[HandlerEventKind]) {
    let actual = log.kinds_for(label);
    assert_eq!(
        actual, expected,
        "handler '{label}' received {actual:?}, expected {expected:?}"
    );
}

/// Assert the handler labelled `label` received no callback at all
pub fn assert_never_notified(log: &HandlerLog, label: &str) {
    let actual = log.kinds_for(label);
    assert!(actual.is_empty(), "handler '{label}' should not be notified, got {actual:?}");
}

/// Assert `kind` reached the handlers in exactly the order of `labels`
pub fn assert_notified_in_order(log: &HandlerLog, kind: HandlerEventKind, labels: &[&str]) {
    let actual = log.labels_for(kind);
    assert_eq!(actual, labels, "'{kind}' dispatch order");
}

/// Assert a result failed with the given [`ObservationError`](crate::ObservationError) variant
///
/// ```
/// use observa_core::{ObservationError, ObservationResult};
///
/// let result: ObservationResult<()> =
///     Err(ObservationError::AlreadyStopped { name: "tax".to_string() });
/// observa_core::assert_usage_error!(result, AlreadyStopped);
/// ```
#[macro_export]
macro_rules! assert_usage_error {
    ($result:expr, $variant:ident) => {
        match &$result {
            Ok(_) => panic!("expected {} but got Ok", stringify!($variant)),
            Err(error) => assert!(
                matches!(error, $crate::ObservationError::$variant { .. }),
                "expected {} but got {:?}",
                stringify!($variant),
                error
            ),
        }
    };
}
