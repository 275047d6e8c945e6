//! Helpers for the end-to-end tests.
//!
//! These run against a live server started with `config.toml` and a
//! database initialised from `schema.sql` (which seeds the counters,
//! services, ticket types and users referenced below). Run them with
//! `cargo test -- --ignored`.

use constcat::concat;
use passflow::{api, notify};
use reqwest::StatusCode;
use serde_json::json;

const BASE_URL: &str = "http://localhost:3000";

pub struct Client {
    inner: reqwest::Client,
    pub auth_token: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
            auth_token: None,
        }
    }

    pub async fn auth(mut self, login: &str, password: &str) -> Self {
        const URL: &str = concat!(BASE_URL, "/auth");

        self.auth_token = Some(
            self.inner
                .post(URL)
                .json(&json!({
                    "login": login,
                    "password": password,
                }))
                .send()
                .await
                .expect("failed to send a request")
                .error_for_status()
                .expect("wrong status code")
                .text()
                .await
                .expect("failed to get a response"),
        );

        self
    }

    pub async fn user(&self) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.get(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn set_availability(
        &self,
        availability: api::user::Availability,
        message: Option<&str>,
    ) -> Result<api::User, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/user");

        let mut req = self.inner.patch(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "setAvailability",
                "data": {
                    "availability": availability,
                    "message": message,
                }
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::User>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn issue_ticket(
        &self,
        service_id: u128,
        ticket_type_id: u128,
    ) -> Result<api::Ticket, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket");

        Ok(self
            .inner
            .post(URL)
            .json(&json!({
                "serviceId": uuid::Uuid::from_u128(service_id),
                "ticketTypeId": uuid::Uuid::from_u128(ticket_type_id),
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::Ticket>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn waiting_tickets(
        &self,
    ) -> Result<api::ticket::List, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket");

        Ok(self
            .inner
            .get(URL)
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::ticket::List>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn get_ticket(
        &self,
        id: api::ticket::Id,
    ) -> Result<api::Ticket, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket");

        Ok(self
            .inner
            .get(format!("{URL}/{id}"))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::Ticket>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn claim_next(&self) -> Result<api::Ticket, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket/next");

        let mut req = self.inner.post(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::Ticket>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn finalize_ticket(
        &self,
        id: api::ticket::Id,
        notes: &str,
        tags: &[&str],
    ) -> Result<api::Ticket, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket");

        let mut req = self.inner.patch(format!("{URL}/{id}"));
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "finalize",
                "data": {
                    "notes": notes,
                    "tags": tags,
                }
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<api::Ticket>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn recall_ticket(
        &self,
        id: api::ticket::Id,
    ) -> Result<notify::CallEvent, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/ticket");

        let mut req = self.inner.patch(format!("{URL}/{id}"));
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .json(&json!({
                "op": "recall",
            }))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<notify::CallEvent>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn reset_queue(&self) -> Result<serde_json::Value, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/queue/reset");

        let mut req = self.inner.post(URL);
        if let Some(token) = &self.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        Ok(req
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<serde_json::Value>()
            .await
            .expect("failed to get a response"))
    }

    pub async fn calls(
        &self,
        limit: usize,
    ) -> Result<Vec<notify::CallEvent>, StatusCode> {
        const URL: &str = concat!(BASE_URL, "/calls");

        Ok(self
            .inner
            .get(format!("{URL}?limit={limit}"))
            .send()
            .await
            .expect("failed to send a request")
            .error_for_status()
            .map_err(|e| e.status().expect("status error"))?
            .json::<Vec<notify::CallEvent>>()
            .await
            .expect("failed to get a response"))
    }
}

/// Seeded by `schema.sql`.
pub mod seed {
    pub const SERVICE_ACCOUNT_OPENING: u128 = 0xb1;
    pub const SERVICE_BILL_PAYMENT: u128 = 0xb3;

    pub const TICKET_TYPE_NORMAL: u128 = 0xd1;
    pub const TICKET_TYPE_PRIORITY: u128 = 0xd2;

    pub const USER_ANA: u128 = 0xe2;
}
