//! Background work owned by a cache: the notifier thread for listener callbacks.

pub(crate) mod notifier;
