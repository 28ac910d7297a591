//! Association reconciliation planning.
//!
//! [`plan`] compares the live stored items of one association type with the
//! collection a caller supplied and decides, without touching storage, which
//! rows are kept, which are obsoleted and which are inserted.
//!
//! Matching rules:
//!
//! 1. A supplied item carrying the key of a live stored item is matched to it.
//!    Equal content keeps the row; changed content obsoletes it and inserts a
//!    replacement under a fresh key.
//! 2. A supplied item without a key (or with a key that is not live) is
//!    matched to the first unclaimed stored item with equal content, else
//!    inserted under a fresh key.
//! 3. Stored items left unclaimed are obsoleted.

use uuid::Uuid;

use crate::model::Association;

/// What reconciling one collection will do.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan<T> {
    /// Items to insert, keyed.
    pub insert: Vec<T>,
    /// Stored items to obsolete.
    pub obsolete: Vec<T>,
    /// Number of stored items kept as they are.
    pub unchanged: usize,
    /// The final collection, in supplied order, every item keyed.
    pub result: Vec<T>,
}

impl<T> ReconcilePlan<T> {
    /// Counts for logging.
    pub fn stats(&self) -> ReconcileStats {
        ReconcileStats {
            inserted: self.insert.len(),
            obsoleted: self.obsolete.len(),
            unchanged: self.unchanged,
        }
    }
}

/// Row counts produced by reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows obsoleted or deleted.
    pub obsoleted: usize,
    /// Rows left untouched.
    pub unchanged: usize,
}

impl ReconcileStats {
    /// Returns `true` if nothing was written.
    pub fn is_noop(&self) -> bool {
        self.inserted == 0 && self.obsoleted == 0
    }
}

impl std::ops::AddAssign for ReconcileStats {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.obsoleted += other.obsoleted;
        self.unchanged += other.unchanged;
    }
}

enum Slot {
    Keep(usize),
    Replace(usize),
    Fresh,
}

/// Plans the reconciliation of `supplied` against `stored`.
pub fn plan<T: Association>(stored: &[T], supplied: Vec<T>) -> ReconcilePlan<T> {
    let mut claimed = vec![false; stored.len()];
    let mut slots: Vec<Option<Slot>> = Vec::with_capacity(supplied.len());

    // keyed matches first, so content matching cannot steal their rows
    for item in &supplied {
        let by_key = item.key().and_then(|key| {
            stored
                .iter()
                .enumerate()
                .position(|(i, s)| !claimed[i] && s.key() == Some(key))
        });
        slots.push(by_key.map(|i| {
            claimed[i] = true;
            if stored[i].same_content(item) {
                Slot::Keep(i)
            } else {
                Slot::Replace(i)
            }
        }));
    }
    for (slot, item) in slots.iter_mut().zip(&supplied) {
        if slot.is_some() {
            continue;
        }
        let by_content = stored
            .iter()
            .enumerate()
            .position(|(i, s)| !claimed[i] && s.same_content(item));
        *slot = Some(match by_content {
            Some(i) => {
                claimed[i] = true;
                Slot::Keep(i)
            }
            None => Slot::Fresh,
        });
    }

    let mut plan = ReconcilePlan {
        insert: Vec::new(),
        obsolete: Vec::new(),
        unchanged: 0,
        result: Vec::with_capacity(supplied.len()),
    };
    for (slot, mut item) in slots.into_iter().zip(supplied) {
        match slot.unwrap_or(Slot::Fresh) {
            Slot::Keep(i) => {
                if let Some(key) = stored[i].key() {
                    item.set_key(key);
                }
                plan.unchanged += 1;
            }
            Slot::Replace(i) => {
                plan.obsolete.push(stored[i].clone());
                item.set_key(Uuid::new_v4());
                plan.insert.push(item.clone());
            }
            Slot::Fresh => {
                item.set_key(Uuid::new_v4());
                plan.insert.push(item.clone());
            }
        }
        plan.result.push(item);
    }
    for (i, stored_item) in stored.iter().enumerate() {
        if !claimed[i] {
            plan.obsolete.push(stored_item.clone());
        }
    }
    plan
}
