use std::fmt::{Debug, Display};
use std::hash::Hash;

/// An identifier flowing from the producer to exactly one worker.
///
/// Blanket-implemented for every type that is cheap to clone, hashable and
/// printable, so plain integers and opaque string keys both qualify.
pub trait WorkItem: Debug + Display + Clone + Eq + Hash + Send + Sync + 'static {
    /// Stable textual id used in logs and error reports.
    fn instance_id(&self) -> String {
        self.to_string()
    }
}

impl<T> WorkItem for T where T: Debug + Display + Clone + Eq + Hash + Send + Sync + 'static {}
