use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::signaling::peer_id::PeerId;

/// Correlates a response with the call it answers. It is unique for the lifetime of the endpoint
///  that generated it, and carries no meaning beyond that.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Arc<str>);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC#{}", self.0)
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        CallId(Arc::from(value))
    }
}

/// Generates [CallId]s of the form `<endpoint>/<procedure name>/<counter>`.
///
/// The counter is instance scoped. It is the last segment and consists of digits only, so two ids
///  from the same generator never collide, regardless of what the procedure names look like.
#[derive(Debug)]
pub struct CallIdGenerator {
    prefix: PeerId,
    counter: AtomicU64,
}

impl CallIdGenerator {
    pub fn new(prefix: PeerId) -> CallIdGenerator {
        CallIdGenerator {
            prefix,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self, name: &str) -> CallId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        CallId(Arc::from(format!("{}/{}/{}", self.prefix, name, n)))
    }
}

#[cfg(test)]
mod test {
    use rustc_hash::FxHashSet;

    use super::*;

    #[test]
    fn test_id_format() {
        let generator = CallIdGenerator::new("peer".into());
        assert_eq!(generator.next_id("add").as_str(), "peer/add/1");
        assert_eq!(generator.next_id("add").as_str(), "peer/add/2");
        assert_eq!(generator.next_id("sub").as_str(), "peer/sub/3");
    }

    #[test]
    fn test_names_ending_in_digits_do_not_collide() {
        let generator = CallIdGenerator::new("p".into());
        let mut ids = FxHashSet::default();
        for i in 0..100 {
            assert!(ids.insert(generator.next_id("f1")));
            assert!(ids.insert(generator.next_id(&format!("f/{}", i))));
            assert!(ids.insert(generator.next_id("f")));
        }
    }

    #[test]
    fn test_generators_are_independent() {
        let a = CallIdGenerator::new("a".into());
        let b = CallIdGenerator::new("b".into());
        a.next_id("x");
        a.next_id("x");
        assert_eq!(b.next_id("x").as_str(), "b/x/1");
        assert_eq!(a.next_id("x").as_str(), "a/x/3");
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        let generator = Arc::new(CallIdGenerator::new("p".into()));
        let handles = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..1000).map(|_| generator.next_id("f")).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut ids = FxHashSet::default();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 4000);
    }
}
