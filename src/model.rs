use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed calendar interval `[start, end]`. Both days are occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Returned when a span would end before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for InvalidSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "end date {} is before start date {}", self.end, self.start)
    }
}

impl std::error::Error for InvalidSpan {}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidSpan> {
        if end < start {
            return Err(InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whole days between the two endpoints (0 for a same-day span).
    pub fn elapsed_days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }

    /// Days charged for the span. A same-day rental still costs one day.
    pub fn billable_days(&self) -> i64 {
        self.elapsed_days().max(1)
    }

    /// Inclusive on both ends: sharing a boundary day is an overlap.
    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// `other` starts the day after `self` ends.
    pub fn is_followed_by(&self, other: &DateSpan) -> bool {
        self.end.succ_opt() == Some(other.start)
    }

    /// `other` ends the day before `self` starts.
    pub fn is_preceded_by(&self, other: &DateSpan) -> bool {
        other.end.succ_opt() == Some(self.start)
    }
}

// ── Catalog records ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: Ulid,
    pub model: String,
    pub color: String,
    pub year: i32,
    /// Rental rate per calendar day, full precision.
    pub daily_rate: Decimal,
    pub passengers: u32,
    /// At least one, descriptions unique ignoring case.
    pub accessories: Vec<Accessory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accessory {
    pub id: Ulid,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    /// Legally permitted to rent (holds a driving licence).
    pub qualified: bool,
}

// ── Rentals ─────────────────────────────────────────────────────

/// A committed reservation of one car by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rental {
    pub id: Ulid,
    pub car_id: Ulid,
    pub user_id: Ulid,
    pub span: DateSpan,
    /// Price fixed at create/update time, never recomputed from later rates.
    pub price: Decimal,
}

/// The keys a rental is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RentalKeys {
    pub car_id: Ulid,
    pub user_id: Ulid,
}

impl Rental {
    pub fn keys(&self) -> RentalKeys {
        RentalKeys {
            car_id: self.car_id,
            user_id: self.user_id,
        }
    }
}

// ── Journal records ─────────────────────────────────────────────

/// Catalog journal record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogEvent {
    CarRegistered(Car),
    CarUpdated(Car),
    CarRemoved { id: Ulid },
    UserRegistered(User),
    UserUpdated(User),
    UserRemoved { id: Ulid },
}

/// Rental journal record format. Flat, one record per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RentalEvent {
    RentalCreated {
        rental: Rental,
    },
    RentalUpdated {
        rental: Rental,
        previous: (Ulid, Ulid),
    },
    RentalDeleted {
        id: Ulid,
        car_id: Ulid,
        user_id: Ulid,
    },
}

// ── Query types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RentalFilter {
    pub car_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
}

impl RentalFilter {
    pub fn matches(&self, rental: &Rental) -> bool {
        self.car_id.is_none_or(|c| c == rental.car_id)
            && self.user_id.is_none_or(|u| u == rental.user_id)
    }
}

/// Car listing criteria. Text fields match whole values, ignoring case and
/// surrounding blanks; `accessory` matches any one accessory description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarFilter {
    pub model: Option<String>,
    pub color: Option<String>,
    pub year: Option<i32>,
    pub daily_rate: Option<Decimal>,
    pub accessory: Option<String>,
}

impl CarFilter {
    pub fn matches(&self, car: &Car) -> bool {
        let text = |wanted: &Option<String>, actual: &str| {
            wanted.as_deref().is_none_or(|w| same_text(w, actual))
        };
        text(&self.model, &car.model)
            && text(&self.color, &car.color)
            && self.year.is_none_or(|y| y == car.year)
            && self.daily_rate.is_none_or(|r| r == car.daily_rate)
            && self.accessory.as_deref().is_none_or(|wanted| {
                car.accessories.iter().any(|a| same_text(wanted, &a.description))
            })
    }
}

pub fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// One page of an id-ordered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub page_count: usize,
}

impl<T> Page<T> {
    /// Slice `sorted` into the 1-based `page` of size `limit`.
    pub fn slice(sorted: Vec<T>, page: usize, limit: usize) -> Self {
        let total = sorted.len();
        let page_count = total.div_ceil(limit.max(1));
        let offset = page.saturating_sub(1).saturating_mul(limit);
        let items = sorted.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            page,
            limit,
            page_count,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            limit: self.limit,
            page_count: self.page_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32, month: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, month, day).unwrap()
    }

    fn span(a: (u32, u32), b: (u32, u32)) -> DateSpan {
        DateSpan::new(d(a.0, a.1), d(b.0, b.1)).unwrap()
    }

    #[test]
    fn span_rejects_reversed_endpoints() {
        let err = DateSpan::new(d(5, 8), d(1, 8)).unwrap_err();
        assert_eq!(err.start, d(5, 8));
        assert_eq!(err.end, d(1, 8));
    }

    #[test]
    fn same_day_span_is_valid() {
        let s = span((3, 8), (3, 8));
        assert_eq!(s.elapsed_days(), 0);
        assert_eq!(s.billable_days(), 1);
    }

    #[test]
    fn billable_days_counts_nights() {
        assert_eq!(span((1, 8), (5, 8)).billable_days(), 4);
        assert_eq!(span((30, 7), (2, 8)).billable_days(), 3);
    }

    #[test]
    fn shared_boundary_day_overlaps() {
        let a = span((1, 8), (5, 8));
        let b = span((5, 8), (10, 8));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn containment_overlaps() {
        let outer = span((1, 8), (20, 8));
        let inner = span((5, 8), (6, 8));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn consecutive_days_do_not_overlap() {
        let a = span((1, 8), (5, 8));
        let b = span((6, 8), (10, 8));
        assert!(!a.overlaps(&b));
        assert!(a.is_followed_by(&b));
        assert!(b.is_preceded_by(&a));
        assert!(!b.is_followed_by(&a));
    }

    fn car() -> Car {
        Car {
            id: Ulid::new(),
            model: "Gol".into(),
            color: "Branco".into(),
            year: 2019,
            daily_rate: Decimal::new(4500, 2),
            passengers: 5,
            accessories: vec![
                Accessory { id: Ulid::new(), description: "Ar-condicionado".into() },
                Accessory { id: Ulid::new(), description: "Trava elétrica".into() },
            ],
        }
    }

    #[test]
    fn car_filter_matches_whole_values_ignoring_case() {
        let car = car();
        assert!(CarFilter::default().matches(&car));

        let by_model = CarFilter { model: Some(" gol ".into()), ..Default::default() };
        assert!(by_model.matches(&car));
        let partial = CarFilter { model: Some("Go".into()), ..Default::default() };
        assert!(!partial.matches(&car));

        let by_rate = CarFilter { daily_rate: Some(Decimal::new(45, 0)), ..Default::default() };
        assert!(by_rate.matches(&car));

        let by_accessory = CarFilter { accessory: Some("TRAVA ELÉTRICA".into()), ..Default::default() };
        assert!(by_accessory.matches(&car));

        let mixed = CarFilter {
            color: Some("branco".into()),
            year: Some(2020),
            ..Default::default()
        };
        assert!(!mixed.matches(&car));
    }

    #[test]
    fn page_slices_and_counts() {
        let page = Page::slice((1..=23).collect::<Vec<_>>(), 3, 10);
        assert_eq!(page.items, vec![21, 22, 23]);
        assert_eq!(page.total, 23);
        assert_eq!(page.page_count, 3);

        let past_end = Page::slice(vec![1, 2], 5, 10);
        assert!(past_end.items.is_empty());
        assert_eq!(past_end.page_count, 1);
    }

    #[test]
    fn filter_matches_both_keys() {
        let car = Ulid::new();
        let user = Ulid::new();
        let rental = Rental {
            id: Ulid::new(),
            car_id: car,
            user_id: user,
            span: span((1, 8), (2, 8)),
            price: Decimal::ONE,
        };
        assert!(RentalFilter::default().matches(&rental));
        assert!(RentalFilter { car_id: Some(car), user_id: Some(user) }.matches(&rental));
        assert!(!RentalFilter { car_id: Some(Ulid::new()), user_id: None }.matches(&rental));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = RentalEvent::RentalCreated {
            rental: Rental {
                id: Ulid::new(),
                car_id: Ulid::new(),
                user_id: Ulid::new(),
                span: span((1, 8), (5, 8)),
                price: Decimal::new(20050, 2),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: RentalEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
