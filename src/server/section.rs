//! Subdivision of a document: one independently editable unit with a
//! non-blocking occupancy gate.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

/// One lockable section of a document, backed by a file on local storage.
///
/// Writers serialize on `gate`; the occupant itself sits behind its own lock
/// so readers never contend with an `occupy` attempt.
#[derive(Debug)]
pub struct Subdivision {
    /// Backing file path under the owning replica's data root.
    path: PathBuf,

    /// Mutual-exclusion gate taken by every occupant change.
    gate: Mutex<()>,

    /// Account currently editing this section, if any. Only written while
    /// holding `gate`.
    occupant: RwLock<Option<String>>,
}

impl Subdivision {
    /// Creates a free subdivision backed by `path`.
    pub fn new(path: PathBuf) -> Self {
        Self::with_occupant(path, None)
    }

    /// Creates a subdivision already held by `occupant`.
    pub(crate) fn with_occupant(
        path: PathBuf,
        occupant: Option<String>,
    ) -> Self {
        Subdivision {
            path,
            gate: Mutex::new(()),
            occupant: RwLock::new(occupant),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compare-and-set on the occupant.
    ///
    /// `occupy(Some(actor))` succeeds only if the section is free and the gate
    /// can be taken without waiting; a concurrent occupant change returns
    /// false immediately. `occupy(None)` frees the section and always
    /// succeeds.
    pub fn occupy(&self, actor: Option<&str>) -> bool {
        match actor {
            Some(actor) => match self.gate.try_lock() {
                Some(_gate) => self.set_if_free(actor),
                None => false,
            },
            None => {
                let _gate = self.gate.lock();
                *self.occupant.write() = None;
                true
            }
        }
    }

    /// Like `occupy(Some(actor))` but waits for the gate, so it fails only
    /// if someone already holds the section. Used when applying a decided
    /// operation.
    pub(crate) fn claim(&self, actor: &str) -> bool {
        let _gate = self.gate.lock();
        self.set_if_free(actor)
    }

    /// Caller holds `gate`.
    fn set_if_free(&self, actor: &str) -> bool {
        let mut occupant = self.occupant.write();
        if occupant.is_some() {
            return false;
        }
        *occupant = Some(actor.to_string());
        true
    }

    /// Current occupant, if any.
    pub fn occupant(&self) -> Option<String> {
        self.occupant.read().clone()
    }

    /// Is anyone editing this section?
    pub fn is_occupied(&self) -> bool {
        self.occupant.read().is_some()
    }
}

#[cfg(test)]
mod section_tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn occupy_then_release() {
        let sec = Subdivision::new(PathBuf::from("/tmp/doc/section0"));
        assert!(!sec.is_occupied());
        assert!(sec.occupy(Some("alice")));
        assert_eq!(sec.occupant(), Some("alice".into()));
        assert!(!sec.occupy(Some("bob")));
        assert!(!sec.occupy(Some("alice")));
        assert!(sec.occupy(None));
        assert_eq!(sec.occupant(), None);
        assert!(sec.occupy(Some("bob")));
    }

    #[test]
    fn release_when_free() {
        let sec = Subdivision::new(PathBuf::from("section1"));
        assert!(sec.occupy(None));
        assert!(!sec.is_occupied());
    }

    #[test]
    fn concurrent_occupy_one_winner() {
        for _ in 0..200 {
            let sec = Arc::new(Subdivision::new(PathBuf::from("section0")));
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = ["alice", "bob"]
                .into_iter()
                .map(|actor| {
                    let sec = sec.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        (actor, sec.occupy(Some(actor)))
                    })
                })
                .collect();
            let results: Vec<(&str, bool)> = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect();

            // a loser either saw the occupant or lost the gate to the other
            // writer, so exactly one of the two gets it
            let winners: Vec<_> =
                results.iter().filter(|(_, won)| *won).collect();
            assert_eq!(winners.len(), 1);
            assert_eq!(sec.occupant().as_deref(), Some(winners[0].0));
        }
    }

    #[test]
    fn readers_never_block_occupy() {
        for _ in 0..200 {
            let sec = Arc::new(Subdivision::new(PathBuf::from("section0")));
            let barrier = Arc::new(Barrier::new(3));
            let reader = {
                let sec = sec.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..100 {
                        let _ = sec.is_occupied();
                        let _ = sec.occupant();
                    }
                })
            };
            let handles: Vec<_> = ["alice", "bob"]
                .into_iter()
                .map(|actor| {
                    let sec = sec.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        sec.occupy(Some(actor))
                    })
                })
                .collect();
            let won = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            reader.join().unwrap();
            assert_eq!(won, 1);
            assert!(sec.is_occupied());
        }
    }

    #[test]
    fn occupy_while_read_guard_held() {
        let sec = Arc::new(Subdivision::new(PathBuf::from("section0")));
        let guard = sec.occupant.read();
        let other = {
            let sec = sec.clone();
            thread::spawn(move || sec.occupy(Some("alice")))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        drop(guard);
        assert!(other.join().unwrap());
        assert!(!sec.occupy(Some("bob")));
        assert_eq!(sec.occupant().as_deref(), Some("alice"));
    }

    #[test]
    fn claim_waits_for_gate() {
        let sec = Arc::new(Subdivision::new(PathBuf::from("section0")));
        let gate = sec.gate.lock();
        assert!(!sec.occupy(Some("bob")));
        let claimer = {
            let sec = sec.clone();
            thread::spawn(move || sec.claim("alice"))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        drop(gate);
        assert!(claimer.join().unwrap());
        assert!(!sec.claim("bob"));
        assert!(sec.occupy(None));
        assert!(sec.claim("bob"));
    }
}
