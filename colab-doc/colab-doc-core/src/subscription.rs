//! Path-scoped change listeners.
//!
//! Loro delivers every committed or imported batch of changes as one
//! `DiffEvent` holding a diff per touched container, each tagged with its
//! path from the root. A listener watches a set of path prefixes and fires
//! at most once per batch when any diff falls under one of them.

use crate::path::{path_starts_with, to_segments, PathSegment};
use loro::{LoroDoc, Subscription};
use std::sync::Arc;

/// Invoke `callback` once for every batch that touches a container below any
/// of `prefixes`. Dropping the returned handle (or calling `unsubscribe`)
/// stops delivery.
pub fn subscribe_to_paths<F>(
    doc: &LoroDoc,
    prefixes: Vec<Vec<PathSegment>>,
    callback: F,
) -> Subscription
where
    F: Fn() + Send + Sync + 'static,
{
    doc.subscribe_root(Arc::new(move |event| {
        let touched = event.events.iter().any(|diff| {
            let path = to_segments(diff.path);
            prefixes
                .iter()
                .any(|prefix| path_starts_with(&path, prefix))
        });
        if touched {
            callback();
        }
    }))
}
