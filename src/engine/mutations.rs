use rust_decimal::Decimal;
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{find_adjacent, find_conflict, validate_span};
use super::error::{Conflict, ConflictKind};
use super::pricing::price;
use super::store::{Ledger, LockSet};
use super::{Engine, EngineError};

/// Proof that a car or user ledger is empty, held locked so no rental can
/// be filed under the key until this is dropped.
pub struct VacantKey {
    _guard: OwnedRwLockWriteGuard<Ledger>,
}

fn record_outcome<T>(action: &'static str, result: &Result<T, EngineError>) {
    match result {
        Ok(_) => {
            metrics::counter!(observability::RENTALS_COMMITTED_TOTAL, "action" => action).increment(1);
        }
        Err(e) => {
            metrics::counter!(observability::RENTALS_REJECTED_TOTAL, "reason" => e.kind().as_str())
                .increment(1);
            tracing::debug!(action, error = %e, "rental rejected");
        }
    }
}

impl Engine {
    /// Book `car_id` for `user_id` over `span`.
    pub async fn create_rental(
        &self,
        car_id: Ulid,
        user_id: Ulid,
        span: DateSpan,
    ) -> Result<Rental, EngineError> {
        let result = self.create_locked(car_id, user_id, span).await;
        record_outcome("created", &result);
        result
    }

    async fn create_locked(&self, car_id: Ulid, user_id: Ulid, span: DateSpan) -> Result<Rental, EngineError> {
        validate_span(&span)?;
        // Ledgers are never evicted, so only known ids may create one.
        self.check_parties(car_id, user_id, &span).await?;
        let locks = self.store.lock(&[car_id], &[user_id]).await;
        let price = self.check_parties(car_id, user_id, &span).await?;

        let car_ledger = locks.car(car_id).ok_or(EngineError::CarNotFound(car_id))?;
        let user_ledger = locks.user(user_id).ok_or(EngineError::UserNotFound(user_id))?;
        if let Some(rental_id) = find_conflict(car_ledger.entries(), &span, None) {
            return Err(EngineError::CarConflict(Conflict {
                rental_id,
                kind: ConflictKind::Overlap,
            }));
        }
        if let Some(rental_id) = find_conflict(user_ledger.entries(), &span, None) {
            return Err(EngineError::UserConflict(rental_id));
        }
        if car_ledger.len() >= MAX_RENTALS_PER_KEY || user_ledger.len() >= MAX_RENTALS_PER_KEY {
            return Err(EngineError::LimitExceeded("too many rentals on one key"));
        }

        let rental = Rental {
            id: Ulid::new(),
            car_id,
            user_id,
            span,
            price,
        };
        self.commit(locks, RentalEvent::RentalCreated { rental: rental.clone() })
            .await?;
        tracing::info!(rental_id = %rental.id, %car_id, %user_id, "rental created");
        Ok(rental)
    }

    /// Replace car, user and span of an existing rental, repricing it.
    pub async fn update_rental(
        &self,
        id: Ulid,
        car_id: Ulid,
        user_id: Ulid,
        span: DateSpan,
    ) -> Result<Rental, EngineError> {
        let result = self.update_locked(id, car_id, user_id, span).await;
        record_outcome("updated", &result);
        result
    }

    async fn update_locked(
        &self,
        id: Ulid,
        car_id: Ulid,
        user_id: Ulid,
        span: DateSpan,
    ) -> Result<Rental, EngineError> {
        self.store.get(id).ok_or(EngineError::RentalNotFound(id))?;
        validate_span(&span)?;
        self.check_parties(car_id, user_id, &span).await?;
        let (locks, previous) = self.lock_rental(id, Some(car_id), Some(user_id)).await?;
        let price = self.check_parties(car_id, user_id, &span).await?;

        let car_ledger = locks.car(car_id).ok_or(EngineError::CarNotFound(car_id))?;
        let user_ledger = locks.user(user_id).ok_or(EngineError::UserNotFound(user_id))?;
        if let Some(rental_id) = find_conflict(car_ledger.entries(), &span, Some(id)) {
            return Err(EngineError::CarConflict(Conflict {
                rental_id,
                kind: ConflictKind::Overlap,
            }));
        }
        if self.policy.update_buffer_day
            && let Some(conflict) = find_adjacent(car_ledger.entries(), &span, Some(id))
        {
            return Err(EngineError::CarConflict(conflict));
        }
        if let Some(rental_id) = find_conflict(user_ledger.entries(), &span, Some(id)) {
            return Err(EngineError::UserConflict(rental_id));
        }
        let moving_in = |ledger: &Ledger, from: Ulid, to: Ulid| from != to && ledger.len() >= MAX_RENTALS_PER_KEY;
        if moving_in(car_ledger, previous.car_id, car_id) || moving_in(user_ledger, previous.user_id, user_id) {
            return Err(EngineError::LimitExceeded("too many rentals on one key"));
        }

        let rental = Rental {
            id,
            car_id,
            user_id,
            span,
            price,
        };
        let event = RentalEvent::RentalUpdated {
            rental: rental.clone(),
            previous: (previous.car_id, previous.user_id),
        };
        self.commit(locks, event).await?;
        tracing::info!(rental_id = %id, %car_id, %user_id, "rental updated");
        Ok(rental)
    }

    /// Remove a rental unconditionally. Returns what was removed.
    pub async fn delete_rental(&self, id: Ulid) -> Result<Rental, EngineError> {
        let result = self.delete_locked(id).await;
        record_outcome("deleted", &result);
        result
    }

    async fn delete_locked(&self, id: Ulid) -> Result<Rental, EngineError> {
        let (locks, rental) = self.lock_rental(id, None, None).await?;
        let event = RentalEvent::RentalDeleted {
            id,
            car_id: rental.car_id,
            user_id: rental.user_id,
        };
        self.commit(locks, event).await?;
        tracing::info!(rental_id = %id, "rental deleted");
        Ok(rental)
    }

    /// Lock the car's ledger if it holds no rentals.
    pub async fn lock_vacant_car(&self, car_id: Ulid) -> Result<VacantKey, EngineError> {
        let mut locks = self.store.lock(&[car_id], &[]).await;
        let (_, guard) = locks.take_car(car_id).ok_or(EngineError::CarNotFound(car_id))?;
        if !guard.is_empty() {
            return Err(EngineError::CarInUse {
                id: car_id,
                rentals: guard.len(),
            });
        }
        Ok(VacantKey { _guard: guard })
    }

    /// Lock the user's ledger if it holds no rentals.
    pub async fn lock_vacant_user(&self, user_id: Ulid) -> Result<VacantKey, EngineError> {
        let mut locks = self.store.lock(&[], &[user_id]).await;
        let (_, guard) = locks.take_user(user_id).ok_or(EngineError::UserNotFound(user_id))?;
        if !guard.is_empty() {
            return Err(EngineError::UserInUse {
                id: user_id,
                rentals: guard.len(),
            });
        }
        Ok(VacantKey { _guard: guard })
    }

    /// Resolve user, qualification and car in that order, then price.
    /// Run once before locking, so unknown ids never get a ledger, and again
    /// under the locks, so a concurrent catalog removal is either fully
    /// before or fully after the check.
    async fn check_parties(
        &self,
        car_id: Ulid,
        user_id: Ulid,
        span: &DateSpan,
    ) -> Result<Decimal, EngineError> {
        let user = self
            .users
            .user(user_id)
            .await?
            .ok_or(EngineError::UserNotFound(user_id))?;
        if !user.qualified {
            return Err(EngineError::Unqualified(user_id));
        }
        let car = self
            .cars
            .car(car_id)
            .await?
            .ok_or(EngineError::CarNotFound(car_id))?;
        price(span, car.daily_rate)
    }

    /// Lock the rental's current keys plus the target keys, retrying if a
    /// concurrent update moved the rental while we waited.
    async fn lock_rental(
        &self,
        id: Ulid,
        target_car: Option<Ulid>,
        target_user: Option<Ulid>,
    ) -> Result<(LockSet, Rental), EngineError> {
        loop {
            let seen = self.store.get(id).ok_or(EngineError::RentalNotFound(id))?;
            let cars: Vec<Ulid> = std::iter::once(seen.car_id).chain(target_car).collect();
            let users: Vec<Ulid> = std::iter::once(seen.user_id).chain(target_user).collect();
            let locks = self.store.lock(&cars, &users).await;
            match self.store.get(id) {
                Some(current) if current.keys() == seen.keys() => return Ok((locks, current)),
                Some(_) => {
                    tracing::debug!(rental_id = %id, "rental moved while locking, retrying");
                }
                None => return Err(EngineError::RentalNotFound(id)),
            }
        }
    }
}
