use ulid::Ulid;

use crate::limits::MAX_PAGE_LIMIT;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_rental(&self, id: Ulid) -> Result<Rental, EngineError> {
        self.store.get(id).ok_or(EngineError::RentalNotFound(id))
    }

    /// Rentals of one car in start order, optionally leaving one out.
    pub async fn rentals_for_car(&self, car_id: Ulid, exclude: Option<Ulid>) -> Vec<Rental> {
        let Some(ledger) = self.store.peek_car(car_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .entries()
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .cloned()
            .collect()
    }

    /// Rentals of one user in start order, optionally leaving one out.
    pub async fn rentals_for_user(&self, user_id: Ulid, exclude: Option<Ulid>) -> Vec<Rental> {
        let Some(ledger) = self.store.peek_user(user_id) else {
            return Vec::new();
        };
        let guard = ledger.read().await;
        guard
            .entries()
            .iter()
            .filter(|r| Some(r.id) != exclude)
            .cloned()
            .collect()
    }

    /// Page through rentals matching `filter`, in id (creation) order.
    /// `page` is 1-based; `limit` is capped at [`MAX_PAGE_LIMIT`].
    pub async fn list_rentals(&self, filter: RentalFilter, page: usize, limit: usize) -> Page<Rental> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);

        let mut matching = match (filter.car_id, filter.user_id) {
            (Some(car_id), _) => self.rentals_for_car(car_id, None).await,
            (None, Some(user_id)) => self.rentals_for_user(user_id, None).await,
            (None, None) => self.store.all(),
        };
        matching.retain(|r| filter.matches(r));
        matching.sort_by_key(|r| r.id);
        Page::slice(matching, page, limit)
    }

    pub fn rental_count(&self) -> usize {
        self.store.len()
    }
}
