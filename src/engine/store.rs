use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::{Rental, RentalEvent};

/// Rentals filed under one car or one user, kept sorted by start date.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Vec<Rental>,
}

impl Ledger {
    pub fn entries(&self) -> &[Rental] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, rental: Rental) {
        let pos = self
            .entries
            .partition_point(|r| r.span.start <= rental.span.start);
        self.entries.insert(pos, rental);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Rental> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        Some(self.entries.remove(pos))
    }
}

pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Write guards over a set of car and user ledgers.
///
/// Always built by [`RentalStore::lock`], which acquires cars before users
/// and each side in ascending id order, so overlapping lock sets taken by
/// concurrent mutations can't deadlock.
pub struct LockSet {
    cars: Vec<(Ulid, OwnedRwLockWriteGuard<Ledger>)>,
    users: Vec<(Ulid, OwnedRwLockWriteGuard<Ledger>)>,
}

fn find<'a>(
    guards: &'a [(Ulid, OwnedRwLockWriteGuard<Ledger>)],
    key: Ulid,
) -> Option<&'a Ledger> {
    guards.iter().find(|(k, _)| *k == key).map(|(_, g)| &**g)
}

fn find_mut<'a>(
    guards: &'a mut [(Ulid, OwnedRwLockWriteGuard<Ledger>)],
    key: Ulid,
) -> Option<&'a mut Ledger> {
    guards.iter_mut().find(|(k, _)| *k == key).map(|(_, g)| &mut **g)
}

impl LockSet {
    pub fn car(&self, id: Ulid) -> Option<&Ledger> {
        find(&self.cars, id)
    }

    pub fn user(&self, id: Ulid) -> Option<&Ledger> {
        find(&self.users, id)
    }

    pub(super) fn take_car(&mut self, id: Ulid) -> Option<(Ulid, OwnedRwLockWriteGuard<Ledger>)> {
        let pos = self.cars.iter().position(|(k, _)| *k == id)?;
        Some(self.cars.swap_remove(pos))
    }

    pub(super) fn take_user(&mut self, id: Ulid) -> Option<(Ulid, OwnedRwLockWriteGuard<Ledger>)> {
        let pos = self.users.iter().position(|(k, _)| *k == id)?;
        Some(self.users.swap_remove(pos))
    }
}

/// Committed rentals, indexed by car, by user and by id.
///
/// Ledgers are created on first use and never evicted, so every task that
/// locks a key locks the same `RwLock`.
#[derive(Default)]
pub struct RentalStore {
    cars: DashMap<Ulid, SharedLedger>,
    users: DashMap<Ulid, SharedLedger>,
    rentals: DashMap<Ulid, Rental>,
}

impl RentalStore {
    /// Rebuild from journal records. Only the final state of each rental matters.
    pub fn from_events(events: Vec<RentalEvent>) -> Self {
        let mut live: HashMap<Ulid, Rental> = HashMap::new();
        for event in events {
            match event {
                RentalEvent::RentalCreated { rental } | RentalEvent::RentalUpdated { rental, .. } => {
                    live.insert(rental.id, rental);
                }
                RentalEvent::RentalDeleted { id, .. } => {
                    live.remove(&id);
                }
            }
        }

        let mut by_car: HashMap<Ulid, Ledger> = HashMap::new();
        let mut by_user: HashMap<Ulid, Ledger> = HashMap::new();
        for rental in live.values() {
            by_car.entry(rental.car_id).or_default().insert(rental.clone());
            by_user.entry(rental.user_id).or_default().insert(rental.clone());
        }

        let store = RentalStore::default();
        for (id, ledger) in by_car {
            store.cars.insert(id, Arc::new(RwLock::new(ledger)));
        }
        for (id, ledger) in by_user {
            store.users.insert(id, Arc::new(RwLock::new(ledger)));
        }
        for (id, rental) in live {
            store.rentals.insert(id, rental);
        }
        store
    }

    fn car_ledger(&self, id: Ulid) -> SharedLedger {
        self.cars.entry(id).or_default().value().clone()
    }

    fn user_ledger(&self, id: Ulid) -> SharedLedger {
        self.users.entry(id).or_default().value().clone()
    }

    /// Existing ledger for reads. Unknown keys stay unknown.
    pub fn peek_car(&self, id: Ulid) -> Option<SharedLedger> {
        self.cars.get(&id).map(|e| e.value().clone())
    }

    pub fn peek_user(&self, id: Ulid) -> Option<SharedLedger> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    /// Lock every listed car, then every listed user, in ascending id order.
    pub async fn lock(&self, cars: &[Ulid], users: &[Ulid]) -> LockSet {
        let mut car_ids = cars.to_vec();
        car_ids.sort();
        car_ids.dedup();
        let mut user_ids = users.to_vec();
        user_ids.sort();
        user_ids.dedup();

        let mut set = LockSet {
            cars: Vec::with_capacity(car_ids.len()),
            users: Vec::with_capacity(user_ids.len()),
        };
        for id in car_ids {
            let guard = self.car_ledger(id).write_owned().await;
            set.cars.push((id, guard));
        }
        for id in user_ids {
            let guard = self.user_ledger(id).write_owned().await;
            set.users.push((id, guard));
        }
        set
    }

    pub fn get(&self, id: Ulid) -> Option<Rental> {
        self.rentals.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.rentals.len()
    }

    /// All rentals, id order.
    pub fn all(&self) -> Vec<Rental> {
        let mut all: Vec<Rental> = self.rentals.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }

    /// Apply a committed record. `locks` must cover every key the record touches.
    pub fn apply(&self, event: &RentalEvent, locks: &mut LockSet) {
        match event {
            RentalEvent::RentalCreated { rental } => {
                if let Some(l) = find_mut(&mut locks.cars, rental.car_id) {
                    l.insert(rental.clone());
                }
                if let Some(l) = find_mut(&mut locks.users, rental.user_id) {
                    l.insert(rental.clone());
                }
                self.rentals.insert(rental.id, rental.clone());
            }
            RentalEvent::RentalUpdated {
                rental,
                previous: (prev_car, prev_user),
            } => {
                if let Some(l) = find_mut(&mut locks.cars, *prev_car) {
                    l.remove(rental.id);
                }
                if let Some(l) = find_mut(&mut locks.users, *prev_user) {
                    l.remove(rental.id);
                }
                if let Some(l) = find_mut(&mut locks.cars, rental.car_id) {
                    l.insert(rental.clone());
                }
                if let Some(l) = find_mut(&mut locks.users, rental.user_id) {
                    l.insert(rental.clone());
                }
                self.rentals.insert(rental.id, rental.clone());
            }
            RentalEvent::RentalDeleted { id, car_id, user_id } => {
                if let Some(l) = find_mut(&mut locks.cars, *car_id) {
                    l.remove(*id);
                }
                if let Some(l) = find_mut(&mut locks.users, *user_id) {
                    l.remove(*id);
                }
                self.rentals.remove(id);
            }
        }
    }

    /// Minimal journal contents that recreate the current state.
    pub fn snapshot(&self) -> Vec<RentalEvent> {
        self.all()
            .into_iter()
            .map(|rental| RentalEvent::RentalCreated { rental })
            .collect()
    }
}
