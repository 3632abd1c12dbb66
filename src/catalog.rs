//! Cars and users: the read side the rental engine prices and qualifies against.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::error::ErrorKind;
use crate::journal::Journal;
use crate::limits::*;
use crate::model::{Accessory, Car, CarFilter, CatalogEvent, Page, User, same_text};

/// What the engine needs to know about a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStatus {
    pub qualified: bool,
}

/// What the engine needs to know about a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarRate {
    pub daily_rate: Decimal,
}

#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn user(&self, id: Ulid) -> Result<Option<UserStatus>, CatalogError>;
}

#[async_trait]
pub trait CarLookup: Send + Sync {
    async fn car(&self, id: Ulid) -> Result<Option<CarRate>, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    NotFound(Ulid),
    DuplicateEmail(String),
    Invalid(String),
    Storage(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::NotFound(id) => write!(f, "not found: {id}"),
            CatalogError::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            CatalogError::Invalid(msg) => write!(f, "invalid: {msg}"),
            CatalogError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound(_) => ErrorKind::NotFound,
            CatalogError::DuplicateEmail(_) => ErrorKind::ResourceConflict,
            CatalogError::Invalid(_) => ErrorKind::Validation,
            CatalogError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<io::Error> for CatalogError {
    fn from(e: io::Error) -> Self {
        CatalogError::Storage(e.to_string())
    }
}

/// Car fields supplied on register and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarSpec {
    pub model: String,
    pub color: String,
    pub year: i32,
    pub daily_rate: Decimal,
    pub passengers: u32,
    /// Accessory descriptions.
    pub accessories: Vec<String>,
}

/// User fields supplied on register and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSpec {
    pub name: String,
    pub email: String,
    pub qualified: bool,
}

#[derive(Default)]
struct CatalogState {
    cars: DashMap<Ulid, Car>,
    users: DashMap<Ulid, User>,
    /// Lowercased email → user id.
    emails: DashMap<String, Ulid>,
}

impl CatalogState {
    fn apply(&self, event: CatalogEvent) {
        match event {
            CatalogEvent::CarRegistered(car) | CatalogEvent::CarUpdated(car) => {
                self.cars.insert(car.id, car);
            }
            CatalogEvent::CarRemoved { id } => {
                self.cars.remove(&id);
            }
            CatalogEvent::UserRegistered(user) | CatalogEvent::UserUpdated(user) => {
                if let Some(old) = self.users.get(&user.id).map(|u| email_key(&u.email)) {
                    self.emails.remove(&old);
                }
                self.emails.insert(email_key(&user.email), user.id);
                self.users.insert(user.id, user);
            }
            CatalogEvent::UserRemoved { id } => {
                if let Some((_, user)) = self.users.remove(&id) {
                    self.emails.remove(&email_key(&user.email));
                }
            }
        }
    }

    fn snapshot(&self) -> Vec<CatalogEvent> {
        let mut events: Vec<CatalogEvent> = self
            .cars
            .iter()
            .map(|e| CatalogEvent::CarRegistered(e.value().clone()))
            .collect();
        events.extend(
            self.users
                .iter()
                .map(|e| CatalogEvent::UserRegistered(e.value().clone())),
        );
        events
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Journaled store of cars and users. Clones share state.
#[derive(Clone)]
pub struct Catalog {
    state: Arc<CatalogState>,
    journal: Journal<CatalogEvent>,
    /// Serializes catalog writes so email uniqueness is checked and claimed atomically.
    write_lock: Arc<Mutex<()>>,
}

impl Catalog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let (journal, events) = Journal::open("catalog", path)?;
        let state = CatalogState::default();
        for event in events {
            state.apply(event);
        }
        Ok(Self {
            state: Arc::new(state),
            journal,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Journal then apply, in a task that owns the write lock so a cancelled
    /// caller can't leave the two out of step.
    async fn commit(
        &self,
        guard: tokio::sync::OwnedMutexGuard<()>,
        event: CatalogEvent,
    ) -> Result<(), CatalogError> {
        let state = self.state.clone();
        let journal = self.journal.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = journal.commit_permit().await;
            journal.append(event.clone()).await?;
            state.apply(event);
            Ok::<_, CatalogError>(())
        })
        .await
        .map_err(|e| CatalogError::Storage(format!("commit task failed: {e}")))?
    }

    // ── Cars ────────────────────────────────────────────────────

    pub async fn register_car(&self, spec: CarSpec) -> Result<Car, CatalogError> {
        let car = validate_car(Ulid::new(), spec, &[])?;
        let guard = self.write_lock.clone().lock_owned().await;
        self.commit(guard, CatalogEvent::CarRegistered(car.clone())).await?;
        tracing::info!(car_id = %car.id, model = %car.model, "car registered");
        Ok(car)
    }

    /// Accessories whose description survives the update keep their ids.
    pub async fn update_car(&self, id: Ulid, spec: CarSpec) -> Result<Car, CatalogError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let existing = self.get_car(id).ok_or(CatalogError::NotFound(id))?;
        let car = validate_car(id, spec, &existing.accessories)?;
        self.commit(guard, CatalogEvent::CarUpdated(car.clone())).await?;
        Ok(car)
    }

    /// Toggle one accessory of a car. An unknown `accessory_id` is added
    /// with `description`; a known one carrying exactly `description` is
    /// removed; a known one carrying anything else is renamed.
    pub async fn update_accessory(
        &self,
        car_id: Ulid,
        accessory_id: Ulid,
        description: String,
    ) -> Result<Car, CatalogError> {
        let description = required_text("description", description)?;
        let guard = self.write_lock.clone().lock_owned().await;
        let mut car = self.get_car(car_id).ok_or(CatalogError::NotFound(car_id))?;

        match car.accessories.iter().position(|a| a.id == accessory_id) {
            Some(i) if car.accessories[i].description == description => {
                if car.accessories.len() == 1 {
                    return Err(CatalogError::Invalid("at least one accessory is required".into()));
                }
                car.accessories.remove(i);
            }
            Some(i) => {
                ensure_new_accessory(&car.accessories, &description, Some(accessory_id))?;
                car.accessories[i].description = description;
            }
            None => {
                if car.accessories.len() >= MAX_ACCESSORIES {
                    return Err(CatalogError::Invalid("too many accessories".into()));
                }
                ensure_new_accessory(&car.accessories, &description, None)?;
                car.accessories.push(Accessory {
                    id: accessory_id,
                    description,
                });
            }
        }

        self.commit(guard, CatalogEvent::CarUpdated(car.clone())).await?;
        tracing::debug!(car_id = %car_id, accessory_id = %accessory_id, "car accessory toggled");
        Ok(car)
    }

    /// Remove a car. Callers must hold the car's rental ledger and have
    /// checked it is empty.
    pub async fn remove_car(&self, id: Ulid) -> Result<Car, CatalogError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let car = self.get_car(id).ok_or(CatalogError::NotFound(id))?;
        self.commit(guard, CatalogEvent::CarRemoved { id }).await?;
        tracing::info!(car_id = %id, "car removed");
        Ok(car)
    }

    pub fn get_car(&self, id: Ulid) -> Option<Car> {
        self.state.cars.get(&id).map(|c| c.value().clone())
    }

    pub fn list_cars(&self, filter: &CarFilter, page: usize, limit: usize) -> Page<Car> {
        let mut cars: Vec<Car> = self
            .state
            .cars
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        cars.sort_by_key(|c| c.id);
        Page::slice(cars, page, limit)
    }

    // ── Users ───────────────────────────────────────────────────

    pub async fn register_user(&self, spec: UserSpec) -> Result<User, CatalogError> {
        let user = validate_user(Ulid::new(), spec)?;
        let guard = self.write_lock.clone().lock_owned().await;
        if self.state.emails.contains_key(&email_key(&user.email)) {
            return Err(CatalogError::DuplicateEmail(user.email));
        }
        self.commit(guard, CatalogEvent::UserRegistered(user.clone())).await?;
        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    pub async fn update_user(&self, id: Ulid, spec: UserSpec) -> Result<User, CatalogError> {
        let user = validate_user(id, spec)?;
        let guard = self.write_lock.clone().lock_owned().await;
        if !self.state.users.contains_key(&id) {
            return Err(CatalogError::NotFound(id));
        }
        if let Some(owner) = self.state.emails.get(&email_key(&user.email))
            && *owner != id
        {
            return Err(CatalogError::DuplicateEmail(user.email));
        }
        self.commit(guard, CatalogEvent::UserUpdated(user.clone())).await?;
        Ok(user)
    }

    /// Remove a user. Callers must hold the user's rental ledger and have
    /// checked it is empty.
    pub async fn remove_user(&self, id: Ulid) -> Result<User, CatalogError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let user = self.get_user(id).ok_or(CatalogError::NotFound(id))?;
        self.commit(guard, CatalogEvent::UserRemoved { id }).await?;
        tracing::info!(user_id = %id, "user removed");
        Ok(user)
    }

    pub fn get_user(&self, id: Ulid) -> Option<User> {
        self.state.users.get(&id).map(|u| u.value().clone())
    }

    pub fn list_users(&self, page: usize, limit: usize) -> Page<User> {
        let mut users: Vec<User> = self.state.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        Page::slice(users, page, limit)
    }

    // ── Journal maintenance ─────────────────────────────────────

    pub async fn compact_journal(&self) -> Result<(), CatalogError> {
        let state = self.state.clone();
        self.journal.compact_with(move || state.snapshot()).await?;
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}

#[async_trait]
impl UserLookup for Catalog {
    async fn user(&self, id: Ulid) -> Result<Option<UserStatus>, CatalogError> {
        Ok(self.state.users.get(&id).map(|u| UserStatus {
            qualified: u.qualified,
        }))
    }
}

#[async_trait]
impl CarLookup for Catalog {
    async fn car(&self, id: Ulid) -> Result<Option<CarRate>, CatalogError> {
        Ok(self.state.cars.get(&id).map(|c| CarRate {
            daily_rate: c.daily_rate,
        }))
    }
}

// ── Validation ──────────────────────────────────────────────────

fn required_text(field: &str, value: String) -> Result<String, CatalogError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(CatalogError::Invalid(format!("{field} is required")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(CatalogError::Invalid(format!("{field} too long")));
    }
    Ok(value)
}

fn ensure_new_accessory(
    accessories: &[Accessory],
    description: &str,
    except: Option<Ulid>,
) -> Result<(), CatalogError> {
    let taken = accessories
        .iter()
        .any(|a| Some(a.id) != except && same_text(&a.description, description));
    if taken {
        return Err(CatalogError::Invalid(format!("duplicate accessory '{description}'")));
    }
    Ok(())
}

/// `previous` supplies ids for descriptions the car already had.
fn validate_car(id: Ulid, spec: CarSpec, previous: &[Accessory]) -> Result<Car, CatalogError> {
    let model = required_text("model", spec.model)?;
    let color = required_text("color", spec.color)?;

    let current_year = chrono::Utc::now().year();
    if !(MIN_CAR_YEAR..=current_year).contains(&spec.year) {
        return Err(CatalogError::Invalid(format!(
            "year must be between {MIN_CAR_YEAR} and {current_year}"
        )));
    }
    if spec.daily_rate <= Decimal::ZERO {
        return Err(CatalogError::Invalid("daily rate must be positive".into()));
    }
    if spec.passengers == 0 {
        return Err(CatalogError::Invalid("passengers must be at least 1".into()));
    }
    if spec.accessories.is_empty() {
        return Err(CatalogError::Invalid("at least one accessory is required".into()));
    }
    if spec.accessories.len() > MAX_ACCESSORIES {
        return Err(CatalogError::Invalid("too many accessories".into()));
    }
    let mut accessories: Vec<Accessory> = Vec::with_capacity(spec.accessories.len());
    for raw in spec.accessories {
        let description = required_text("accessory", raw)?;
        ensure_new_accessory(&accessories, &description, None)?;
        let id = previous
            .iter()
            .find(|a| a.description == description)
            .map_or_else(Ulid::new, |a| a.id);
        accessories.push(Accessory { id, description });
    }

    Ok(Car {
        id,
        model,
        color,
        year: spec.year,
        daily_rate: spec.daily_rate,
        passengers: spec.passengers,
        accessories,
    })
}

fn validate_user(id: Ulid, spec: UserSpec) -> Result<User, CatalogError> {
    let name = required_text("name", spec.name)?;
    let email = required_text("email", spec.email)?;
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.contains('@'));
    if !well_formed {
        return Err(CatalogError::Invalid(format!("malformed email '{email}'")));
    }
    Ok(User {
        id,
        name,
        email,
        qualified: spec.qualified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentlog_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn car_spec() -> CarSpec {
        CarSpec {
            model: "Onix".into(),
            color: "Prata".into(),
            year: 2020,
            daily_rate: Decimal::new(50, 0),
            passengers: 5,
            accessories: vec!["Ar-condicionado".into(), "Direção hidráulica".into()],
        }
    }

    fn user_spec(email: &str) -> UserSpec {
        UserSpec {
            name: "Joana".into(),
            email: email.into(),
            qualified: true,
        }
    }

    #[tokio::test]
    async fn register_and_lookup_car() {
        let catalog = Catalog::open(&test_journal_path("car_lookup.wal")).unwrap();
        let car = catalog.register_car(car_spec()).await.unwrap();

        let rate = catalog.car(car.id).await.unwrap().unwrap();
        assert_eq!(rate.daily_rate, Decimal::new(50, 0));
        assert!(catalog.car(Ulid::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn car_validation() {
        let catalog = Catalog::open(&test_journal_path("car_validation.wal")).unwrap();

        let mut spec = car_spec();
        spec.daily_rate = Decimal::ZERO;
        assert!(matches!(catalog.register_car(spec).await, Err(CatalogError::Invalid(_))));

        let mut spec = car_spec();
        spec.year = 1949;
        assert!(matches!(catalog.register_car(spec).await, Err(CatalogError::Invalid(_))));

        let mut spec = car_spec();
        spec.accessories.clear();
        assert!(matches!(catalog.register_car(spec).await, Err(CatalogError::Invalid(_))));

        let mut spec = car_spec();
        spec.accessories = vec!["GPS".into(), "gps".into()];
        assert!(matches!(catalog.register_car(spec).await, Err(CatalogError::Invalid(_))));

        let mut spec = car_spec();
        spec.model = "   ".into();
        assert!(matches!(catalog.register_car(spec).await, Err(CatalogError::Invalid(_))));

        assert_eq!(catalog.list_cars(&CarFilter::default(), 1, 10).total, 0);
    }

    #[tokio::test]
    async fn list_cars_applies_filter() {
        let catalog = Catalog::open(&test_journal_path("car_filter.wal")).unwrap();
        let onix = catalog.register_car(car_spec()).await.unwrap();
        let mut spec = car_spec();
        spec.model = "Kwid".into();
        spec.daily_rate = Decimal::new(3990, 2);
        spec.accessories = vec!["GPS".into()];
        let kwid = catalog.register_car(spec).await.unwrap();

        let all = catalog.list_cars(&CarFilter::default(), 1, 10);
        assert_eq!(all.total, 2);

        let by_model = CarFilter { model: Some("onix".into()), ..Default::default() };
        assert_eq!(catalog.list_cars(&by_model, 1, 10).items, vec![onix.clone()]);

        let by_accessory = CarFilter { accessory: Some("gps".into()), ..Default::default() };
        assert_eq!(catalog.list_cars(&by_accessory, 1, 10).items, vec![kwid.clone()]);

        let by_rate = CarFilter { daily_rate: Some(Decimal::new(50, 0)), ..Default::default() };
        assert_eq!(catalog.list_cars(&by_rate, 1, 10).items, vec![onix]);

        let none = CarFilter { color: Some("Preto".into()), ..Default::default() };
        let page = catalog.list_cars(&none, 1, 10);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn update_accessory_adds_renames_and_removes() {
        let catalog = Catalog::open(&test_journal_path("accessory_toggle.wal")).unwrap();
        let car = catalog.register_car(car_spec()).await.unwrap();
        let air = car.accessories[0].clone();

        // Unknown id: added.
        let gps = Ulid::new();
        let car = catalog.update_accessory(car.id, gps, "GPS".into()).await.unwrap();
        assert_eq!(car.accessories.len(), 3);
        assert_eq!(car.accessories[2], Accessory { id: gps, description: "GPS".into() });

        // Known id, new description: renamed in place.
        let car = catalog
            .update_accessory(car.id, gps, "GPS integrado".into())
            .await
            .unwrap();
        assert_eq!(car.accessories[2].description, "GPS integrado");

        // Known id, same description: removed.
        let car = catalog
            .update_accessory(car.id, air.id, air.description.clone())
            .await
            .unwrap();
        assert_eq!(car.accessories.len(), 2);
        assert!(car.accessories.iter().all(|a| a.id != air.id));
        assert_eq!(catalog.get_car(car.id), Some(car));
    }

    #[tokio::test]
    async fn update_accessory_rejections() {
        let catalog = Catalog::open(&test_journal_path("accessory_reject.wal")).unwrap();
        let mut spec = car_spec();
        spec.accessories = vec!["GPS".into(), "Rádio".into()];
        let car = catalog.register_car(spec).await.unwrap();
        let (gps, radio) = (car.accessories[0].clone(), car.accessories[1].clone());

        let missing = Ulid::new();
        assert_eq!(
            catalog.update_accessory(missing, gps.id, "GPS".into()).await,
            Err(CatalogError::NotFound(missing))
        );
        assert!(matches!(
            catalog.update_accessory(car.id, gps.id, "  ".into()).await,
            Err(CatalogError::Invalid(_))
        ));
        // Renaming onto, or adding, a description the car already has.
        assert!(matches!(
            catalog.update_accessory(car.id, gps.id, "rádio".into()).await,
            Err(CatalogError::Invalid(_))
        ));
        assert!(matches!(
            catalog.update_accessory(car.id, Ulid::new(), "gps".into()).await,
            Err(CatalogError::Invalid(_))
        ));

        // The last accessory can't be removed.
        catalog.update_accessory(car.id, radio.id, radio.description).await.unwrap();
        assert!(matches!(
            catalog.update_accessory(car.id, gps.id, gps.description.clone()).await,
            Err(CatalogError::Invalid(_))
        ));
        assert_eq!(catalog.get_car(car.id).unwrap().accessories, vec![gps]);
    }

    #[tokio::test]
    async fn update_car_keeps_ids_of_unchanged_accessories() {
        let catalog = Catalog::open(&test_journal_path("accessory_ids.wal")).unwrap();
        let car = catalog.register_car(car_spec()).await.unwrap();
        let kept = car.accessories[0].clone();

        let mut spec = car_spec();
        spec.accessories = vec![kept.description.clone(), "Bluetooth".into()];
        let updated = catalog.update_car(car.id, spec).await.unwrap();
        assert_eq!(updated.accessories[0], kept);
        assert_ne!(updated.accessories[1].id, car.accessories[1].id);
    }

    #[tokio::test]
    async fn email_unique_case_insensitive() {
        let catalog = Catalog::open(&test_journal_path("email_unique.wal")).unwrap();
        let first = catalog.register_user(user_spec("joana@example.com")).await.unwrap();

        let err = catalog
            .register_user(user_spec("JOANA@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateEmail(_)));
        assert_eq!(err.kind(), ErrorKind::ResourceConflict);

        // Re-saving one's own email is not a duplicate.
        catalog
            .update_user(first.id, user_spec("Joana@Example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn changing_email_releases_old_one() {
        let catalog = Catalog::open(&test_journal_path("email_release.wal")).unwrap();
        let user = catalog.register_user(user_spec("old@example.com")).await.unwrap();
        catalog
            .update_user(user.id, user_spec("new@example.com"))
            .await
            .unwrap();
        catalog.register_user(user_spec("old@example.com")).await.unwrap();
    }

    #[tokio::test]
    async fn malformed_email_rejected() {
        let catalog = Catalog::open(&test_journal_path("email_malformed.wal")).unwrap();
        for bad in ["joana", "@example.com", "joana@localhost", "a@b@c.com"] {
            assert!(
                matches!(catalog.register_user(user_spec(bad)).await, Err(CatalogError::Invalid(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let catalog = Catalog::open(&test_journal_path("unknown.wal")).unwrap();
        let id = Ulid::new();
        assert_eq!(catalog.update_car(id, car_spec()).await, Err(CatalogError::NotFound(id)));
        assert_eq!(catalog.remove_user(id).await, Err(CatalogError::NotFound(id)));
    }

    #[tokio::test]
    async fn state_survives_reopen_and_compaction() {
        let path = test_journal_path("reopen.wal");
        let (car, user) = {
            let catalog = Catalog::open(&path).unwrap();
            let car = catalog.register_car(car_spec()).await.unwrap();
            let user = catalog.register_user(user_spec("r@example.com")).await.unwrap();
            let gone = catalog.register_user(user_spec("gone@example.com")).await.unwrap();
            catalog.remove_user(gone.id).await.unwrap();
            assert_eq!(catalog.journal_appends_since_compact().await, 4);
            catalog.compact_journal().await.unwrap();
            assert_eq!(catalog.journal_appends_since_compact().await, 0);
            (car, user)
        };

        let catalog = Catalog::open(&path).unwrap();
        assert_eq!(catalog.get_car(car.id), Some(car));
        assert_eq!(catalog.get_user(user.id), Some(user));
        assert_eq!(catalog.list_users(1, 10).total, 1);
        // Email index is rebuilt on replay.
        assert!(catalog.register_user(user_spec("R@example.com")).await.is_err());
        assert!(catalog.register_user(user_spec("gone@example.com")).await.is_ok());
    }
}
