//! Line-delimited JSON protocol.
//!
//! Each request is one JSON object tagged by `op`; each response is one
//! JSON object on its own line, either `{"ok":true,"data":...}` or
//! `{"ok":false,"status":..,"kind":..,"message":..}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::error::{Error, ErrorKind};
use crate::service::{
    CarPayload, CarQuery, PageParams, RentalService, ReservationPayload, ReservationQuery, UserPayload,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    CreateReservation(ReservationPayload),
    GetReservation {
        id: Ulid,
    },
    ListReservations(ReservationQuery),
    UpdateReservation {
        id: Ulid,
        #[serde(flatten)]
        payload: ReservationPayload,
    },
    DeleteReservation {
        id: Ulid,
    },
    RegisterCar(CarPayload),
    UpdateCar {
        id: Ulid,
        #[serde(flatten)]
        payload: CarPayload,
    },
    GetCar {
        id: Ulid,
    },
    ListCars(CarQuery),
    UpdateAccessory {
        id: Ulid,
        accessory_id: Ulid,
        description: String,
    },
    RemoveCar {
        id: Ulid,
    },
    RegisterUser(UserPayload),
    UpdateUser {
        id: Ulid,
        #[serde(flatten)]
        payload: UserPayload,
    },
    GetUser {
        id: Ulid,
    },
    ListUsers(PageParams),
    RemoveUser {
        id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Success {
        ok: bool,
        data: Value,
    },
    Failure {
        ok: bool,
        status: u16,
        kind: String,
        message: String,
    },
}

impl Response {
    pub fn success(data: Value) -> Self {
        Response::Success { ok: true, data }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Failure {
            ok: false,
            status: kind.status(),
            kind: kind.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self::failure(err.kind(), err.to_string())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    /// Status code in HTTP terms; 200 on success.
    pub fn status(&self) -> u16 {
        match self {
            Response::Success { .. } => 200,
            Response::Failure { status, .. } => *status,
        }
    }

    /// Serialize to a single line without the trailing newline.
    pub fn to_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("response serialization failed: {e}");
                r#"{"ok":false,"status":503,"kind":"storage","message":"response serialization failed"}"#
                    .to_string()
            }
        }
    }
}

/// Parse one request line. Malformed input maps to a validation error.
pub fn parse_request(line: &str) -> Result<Request, Error> {
    serde_json::from_str(line).map_err(|e| Error::Validation(format!("malformed request: {e}")))
}

fn to_data<T: Serialize>(value: T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::Validation(format!("unserializable result: {e}")))
}

/// Run one request against the service.
pub async fn dispatch(service: &RentalService, request: Request) -> Response {
    let result = match request {
        Request::Ping => Ok(Value::String("pong".into())),
        Request::CreateReservation(payload) => {
            service.create_reservation(payload).await.and_then(to_data)
        }
        Request::GetReservation { id } => service.get_reservation(id).and_then(to_data),
        Request::ListReservations(query) => {
            service.list_reservations(query).await.and_then(to_data)
        }
        Request::UpdateReservation { id, payload } => {
            service.update_reservation(id, payload).await.and_then(to_data)
        }
        Request::DeleteReservation { id } => {
            service.delete_reservation(id).await.and_then(to_data)
        }
        Request::RegisterCar(payload) => service.register_car(payload).await.and_then(to_data),
        Request::UpdateCar { id, payload } => {
            service.update_car(id, payload).await.and_then(to_data)
        }
        Request::GetCar { id } => service.get_car(id).and_then(to_data),
        Request::ListCars(query) => service.list_cars(query).and_then(to_data),
        Request::UpdateAccessory {
            id,
            accessory_id,
            description,
        } => service
            .update_accessory(id, accessory_id, description)
            .await
            .and_then(to_data),
        Request::RemoveCar { id } => service.remove_car(id).await.and_then(to_data),
        Request::RegisterUser(payload) => service.register_user(payload).await.and_then(to_data),
        Request::UpdateUser { id, payload } => {
            service.update_user(id, payload).await.and_then(to_data)
        }
        Request::GetUser { id } => service.get_user(id).and_then(to_data),
        Request::ListUsers(params) => service.list_users(params).and_then(to_data),
        Request::RemoveUser { id } => service.remove_user(id).await.and_then(to_data),
    };
    match result {
        Ok(data) => Response::success(data),
        Err(e) => Response::from_error(&e),
    }
}
