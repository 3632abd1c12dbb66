//! Request-facing operations. Converts boundary text (dates, amounts,
//! qualification words) into domain values and back.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::catalog::{Catalog, CarSpec, CatalogError, UserSpec};
use crate::config::Config;
use crate::engine::{Engine, EnginePolicy};
use crate::error::Error;
use crate::format::{DecimalSeparator, format_amount, format_date, parse_amount, parse_date};
use crate::limits::MAX_PAGE_LIMIT;
use crate::model::{Accessory, Car, CarFilter, DateSpan, Page, Rental, RentalFilter, User};

pub const CATALOG_JOURNAL: &str = "catalog.wal";
pub const RENTAL_JOURNAL: &str = "rentals.wal";

// ── Inputs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReservationPayload {
    pub user_id: Ulid,
    pub car_id: Ulid,
    /// `DD/MM/YYYY`
    pub start_date: String,
    /// `DD/MM/YYYY`
    pub end_date: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ReservationQuery {
    pub car_id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    #[serde(flatten)]
    pub paging: PageParams,
}

/// Car listing criteria plus paging. Unset fields don't filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CarQuery {
    pub model: Option<String>,
    pub color: Option<String>,
    pub year: Option<i32>,
    pub daily_rate: Option<AmountInput>,
    /// Matches cars carrying an accessory with this description.
    pub accessory: Option<String>,
    #[serde(flatten)]
    pub paging: PageParams,
}

/// A money amount written as a JSON number or as text with `,` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(serde_json::Number),
    Text(String),
}

/// Either a boolean or one of the words clients historically send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum QualifiedInput {
    Flag(bool),
    Word(String),
}

impl QualifiedInput {
    fn resolve(&self) -> Result<bool, Error> {
        match self {
            QualifiedInput::Flag(b) => Ok(*b),
            QualifiedInput::Word(w) => match w.trim().to_lowercase().as_str() {
                "sim" | "yes" | "true" => Ok(true),
                "não" | "nao" | "no" | "false" => Ok(false),
                other => Err(Error::Validation(format!("qualified must be a boolean, got '{other}'"))),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CarPayload {
    pub model: String,
    pub color: String,
    pub year: i32,
    pub daily_rate: AmountInput,
    pub passengers: u32,
    pub accessories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserPayload {
    pub name: String,
    pub email: String,
    pub qualified: QualifiedInput,
}

// ── Outputs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: Ulid,
    pub user_id: Ulid,
    pub car_id: Ulid,
    pub start_date: String,
    pub end_date: String,
    pub final_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarRecord {
    pub id: Ulid,
    pub model: String,
    pub color: String,
    pub year: i32,
    pub daily_rate: String,
    pub passengers: u32,
    pub accessories: Vec<Accessory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub qualified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub page_count: usize,
}

impl<T> From<Page<T>> for PageRecord<T> {
    fn from(p: Page<T>) -> Self {
        Self {
            items: p.items,
            total: p.total,
            page: p.page,
            limit: p.limit,
            page_count: p.page_count,
        }
    }
}

// ── Service ─────────────────────────────────────────────────────

pub struct RentalService {
    catalog: Catalog,
    engine: Arc<Engine>,
    separator: DecimalSeparator,
    default_page_limit: usize,
}

impl RentalService {
    /// Open both journals under `config.data_dir`.
    pub fn open(config: &Config) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let catalog = Catalog::open(&config.data_dir.join(CATALOG_JOURNAL))?;
        let lookup = Arc::new(catalog.clone());
        let engine = Engine::new(
            &config.data_dir.join(RENTAL_JOURNAL),
            lookup.clone(),
            lookup,
            EnginePolicy {
                update_buffer_day: config.update_buffer_day,
            },
        )?;
        Ok(Self {
            catalog,
            engine: Arc::new(engine),
            separator: config.decimal_separator,
            default_page_limit: config.default_page_limit,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn paging(&self, params: PageParams) -> Result<(usize, usize), Error> {
        let page = params.page.unwrap_or(1);
        let limit = params.limit.unwrap_or(self.default_page_limit);
        if page == 0 {
            return Err(Error::Validation("page starts at 1".into()));
        }
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(Error::Validation(format!("limit must be between 1 and {MAX_PAGE_LIMIT}")));
        }
        Ok((page, limit))
    }

    fn reservation_record(&self, r: Rental) -> ReservationRecord {
        ReservationRecord {
            id: r.id,
            user_id: r.user_id,
            car_id: r.car_id,
            start_date: format_date(r.span.start),
            end_date: format_date(r.span.end),
            final_value: format_amount(r.price, self.separator),
        }
    }

    fn car_record(&self, c: Car) -> CarRecord {
        CarRecord {
            id: c.id,
            model: c.model,
            color: c.color,
            year: c.year,
            daily_rate: format_amount(c.daily_rate, self.separator),
            passengers: c.passengers,
            accessories: c.accessories,
        }
    }

    // ── Reservations ────────────────────────────────────────────

    pub async fn create_reservation(&self, payload: ReservationPayload) -> Result<ReservationRecord, Error> {
        let span = parse_span(&payload)?;
        let rental = self
            .engine
            .create_rental(payload.car_id, payload.user_id, span)
            .await?;
        Ok(self.reservation_record(rental))
    }

    pub fn get_reservation(&self, id: Ulid) -> Result<ReservationRecord, Error> {
        Ok(self.reservation_record(self.engine.get_rental(id)?))
    }

    pub async fn list_reservations(
        &self,
        query: ReservationQuery,
    ) -> Result<PageRecord<ReservationRecord>, Error> {
        let (page, limit) = self.paging(query.paging)?;
        let filter = RentalFilter {
            car_id: query.car_id,
            user_id: query.user_id,
        };
        let listed = self.engine.list_rentals(filter, page, limit).await;
        Ok(listed.map(|r| self.reservation_record(r)).into())
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        payload: ReservationPayload,
    ) -> Result<ReservationRecord, Error> {
        // Unknown ids are reported before anything about the payload.
        self.engine.get_rental(id)?;
        let span = parse_span(&payload)?;
        let rental = self
            .engine
            .update_rental(id, payload.car_id, payload.user_id, span)
            .await?;
        Ok(self.reservation_record(rental))
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<ReservationRecord, Error> {
        let rental = self.engine.delete_rental(id).await?;
        Ok(self.reservation_record(rental))
    }

    // ── Cars ────────────────────────────────────────────────────

    pub async fn register_car(&self, payload: CarPayload) -> Result<CarRecord, Error> {
        let car = self.catalog.register_car(car_spec(payload)?).await?;
        Ok(self.car_record(car))
    }

    pub async fn update_car(&self, id: Ulid, payload: CarPayload) -> Result<CarRecord, Error> {
        let car = self.catalog.update_car(id, car_spec(payload)?).await?;
        Ok(self.car_record(car))
    }

    pub fn get_car(&self, id: Ulid) -> Result<CarRecord, Error> {
        let car = self.catalog.get_car(id).ok_or(CatalogError::NotFound(id))?;
        Ok(self.car_record(car))
    }

    pub fn list_cars(&self, query: CarQuery) -> Result<PageRecord<CarRecord>, Error> {
        let (page, limit) = self.paging(query.paging)?;
        let filter = CarFilter {
            model: query.model,
            color: query.color,
            year: query.year,
            daily_rate: query.daily_rate.as_ref().map(amount).transpose()?,
            accessory: query.accessory,
        };
        Ok(self
            .catalog
            .list_cars(&filter, page, limit)
            .map(|c| self.car_record(c))
            .into())
    }

    pub async fn update_accessory(
        &self,
        car_id: Ulid,
        accessory_id: Ulid,
        description: String,
    ) -> Result<CarRecord, Error> {
        let car = self
            .catalog
            .update_accessory(car_id, accessory_id, description)
            .await?;
        Ok(self.car_record(car))
    }

    /// Refused while any rental references the car.
    pub async fn remove_car(&self, id: Ulid) -> Result<CarRecord, Error> {
        if self.catalog.get_car(id).is_none() {
            return Err(CatalogError::NotFound(id).into());
        }
        let _vacancy = self.engine.lock_vacant_car(id).await?;
        let car = self.catalog.remove_car(id).await?;
        Ok(self.car_record(car))
    }

    // ── Users ───────────────────────────────────────────────────

    pub async fn register_user(&self, payload: UserPayload) -> Result<UserRecord, Error> {
        let user = self.catalog.register_user(user_spec(payload)?).await?;
        Ok(user_record(user))
    }

    pub async fn update_user(&self, id: Ulid, payload: UserPayload) -> Result<UserRecord, Error> {
        let user = self.catalog.update_user(id, user_spec(payload)?).await?;
        Ok(user_record(user))
    }

    pub fn get_user(&self, id: Ulid) -> Result<UserRecord, Error> {
        let user = self.catalog.get_user(id).ok_or(CatalogError::NotFound(id))?;
        Ok(user_record(user))
    }

    pub fn list_users(&self, params: PageParams) -> Result<PageRecord<UserRecord>, Error> {
        let (page, limit) = self.paging(params)?;
        Ok(self.catalog.list_users(page, limit).map(user_record).into())
    }

    /// Refused while any rental references the user.
    pub async fn remove_user(&self, id: Ulid) -> Result<UserRecord, Error> {
        if self.catalog.get_user(id).is_none() {
            return Err(CatalogError::NotFound(id).into());
        }
        let _vacancy = self.engine.lock_vacant_user(id).await?;
        let user = self.catalog.remove_user(id).await?;
        Ok(user_record(user))
    }
}

fn parse_span(payload: &ReservationPayload) -> Result<DateSpan, Error> {
    let start = parse_date(&payload.start_date)?;
    let end = parse_date(&payload.end_date)?;
    Ok(DateSpan::new(start, end).map_err(crate::engine::EngineError::from)?)
}

fn amount(input: &AmountInput) -> Result<rust_decimal::Decimal, Error> {
    Ok(match input {
        AmountInput::Number(n) => parse_amount(&n.to_string())?,
        AmountInput::Text(s) => parse_amount(s)?,
    })
}

fn car_spec(payload: CarPayload) -> Result<CarSpec, Error> {
    let daily_rate = amount(&payload.daily_rate)?;
    Ok(CarSpec {
        model: payload.model,
        color: payload.color,
        year: payload.year,
        daily_rate,
        passengers: payload.passengers,
        accessories: payload.accessories,
    })
}

fn user_spec(payload: UserPayload) -> Result<UserSpec, Error> {
    Ok(UserSpec {
        qualified: payload.qualified.resolve()?,
        name: payload.name,
        email: payload.email,
    })
}

fn user_record(u: User) -> UserRecord {
    UserRecord {
        id: u.id,
        name: u.name,
        email: u.email,
        qualified: u.qualified,
    }
}
