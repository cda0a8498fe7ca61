//! Crate-level tests driving the dispatcher, protocols and transport together.

mod support;
