//! Pluggable selection of one push target out of a consumer group.

use crate::broker::registry::StreamConsumer;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Strategy for choosing one consumer from a candidate set.
///
/// Swappable so load-aware strategies can replace the default without
/// touching the routing path.
pub trait StreamPicker: Send + Sync {
    fn pick<'a>(&self, candidates: &'a [Arc<StreamConsumer>]) -> Option<&'a Arc<StreamConsumer>>;
}

/// Default picker: uniform-random over the candidates.
#[derive(Debug, Default)]
pub struct UniformRandomPicker;

impl StreamPicker for UniformRandomPicker {
    fn pick<'a>(&self, candidates: &'a [Arc<StreamConsumer>]) -> Option<&'a Arc<StreamConsumer>> {
        candidates.choose(&mut rand::thread_rng())
    }
}
