//! Client for the external bank-data aggregator.
//!
//! The aggregator owns the OAuth-style connect flow and read access to the
//! user's accounts and transactions; this service only consumes its REST API.
//! Components depend on the `BankAggregator` trait so tests can substitute a
//! mock provider.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectSession {
    /// Hosted page the user is redirected to.
    pub url: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConnection {
    pub id: String,
    pub provider_name: String,
    pub country: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderAccount {
    pub id: String,
    pub name: String,
    /// Balance snapshot in minor units.
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderTransaction {
    pub id: String,
    /// Signed amount in minor units; positive is an inbound credit.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
}

/// Asynchronous callback notification the aggregator posts after the hosted
/// connect flow finishes or a connection degrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackNotification {
    pub connection_id: String,
    pub customer_id: String,
    /// "finish" or "error".
    pub stage: String,
}

#[async_trait]
pub trait BankAggregator: Send + Sync {
    /// Create (or return) the aggregator-side customer handle for a user.
    async fn create_customer(&self, email: &str) -> ServiceResult<String>;

    /// Create a hosted connect session for a customer.
    async fn create_connect_session(&self, customer_id: &str) -> ServiceResult<ConnectSession>;

    async fn get_connection(&self, connection_id: &str) -> ServiceResult<ProviderConnection>;

    async fn list_accounts(&self, connection_id: &str) -> ServiceResult<Vec<ProviderAccount>>;

    /// Fetch transactions for an account, optionally only those on/after `from`.
    async fn get_transactions(
        &self,
        account_id: &str,
        from: Option<NaiveDate>,
    ) -> ServiceResult<Vec<ProviderTransaction>>;

    async fn delete_connection(&self, connection_id: &str) -> ServiceResult<()>;
}

#[derive(Debug, Clone)]
pub struct AggregatorClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl AggregatorClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check(resp: reqwest::Response) -> ServiceResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ServiceError::Provider(format!(
            "aggregator returned {}: {}",
            status, body
        )))
    }
}

#[derive(Serialize)]
struct CreateCustomerRequest<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct CreateCustomerResponse {
    id: String,
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    customer_id: &'a str,
}

#[async_trait]
impl BankAggregator for AggregatorClient {
    async fn create_customer(&self, email: &str) -> ServiceResult<String> {
        let resp = self
            .client
            .post(self.url("/v1/customers"))
            .bearer_auth(&self.api_key)
            .json(&CreateCustomerRequest { email })
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let body: CreateCustomerResponse = resp.json().await?;
        Ok(body.id)
    }

    async fn create_connect_session(&self, customer_id: &str) -> ServiceResult<ConnectSession> {
        let resp = self
            .client
            .post(self.url("/v1/sessions"))
            .bearer_auth(&self.api_key)
            .json(&CreateSessionRequest { customer_id })
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_connection(&self, connection_id: &str) -> ServiceResult<ProviderConnection> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/connections/{}", connection_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn list_accounts(&self, connection_id: &str) -> ServiceResult<Vec<ProviderAccount>> {
        let resp = self
            .client
            .get(self.url(&format!("/v1/connections/{}/accounts", connection_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        Ok(resp.json().await?)
    }

    async fn get_transactions(
        &self,
        account_id: &str,
        from: Option<NaiveDate>,
    ) -> ServiceResult<Vec<ProviderTransaction>> {
        let mut req = self
            .client
            .get(self.url(&format!("/v1/accounts/{}/transactions", account_id)))
            .bearer_auth(&self.api_key);
        if let Some(from) = from {
            req = req.query(&[("from", from.format("%Y-%m-%d").to_string())]);
        }
        let resp = Self::check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn delete_connection(&self, connection_id: &str) -> ServiceResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/v1/connections/{}", connection_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
