//! Boundary to the external payment gateway.
//!
//! The gateway protocol lives outside this crate. This module only fixes the
//! request/response shapes and lets callers stash gateway results in the cache
//! as opaque records.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::SecureCache;
use crate::store::EntryId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentItem {
    pub name: String,
    pub sku: String,
    /// Decimal string, e.g. `"10.00"`.
    pub price: String,
    pub currency: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub amount: String,
    pub currency: String,
    pub description: String,
    #[serde(default)]
    pub items: Vec<PaymentItem>,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayment {
    pub payment_id: String,
    pub approval_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePaymentRequest {
    pub payment_id: String,
    pub payer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutedPayment {
    pub payment_id: String,
    pub state: String,
    #[serde(default)]
    pub payer: Value,
    #[serde(default)]
    pub transactions: Vec<Value>,
}

/// A gateway result together with the cache id it was recorded under.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded<T> {
    pub result: T,
    pub record_id: EntryId,
}

impl CreatePaymentRequest {
    pub fn validate(&self) -> Result<()> {
        validate_amount(&self.amount)?;
        validate_currency(&self.currency)?;
        if self.description.trim().is_empty() {
            return Err(anyhow!("description is required"));
        }
        if self.return_url.trim().is_empty() || self.cancel_url.trim().is_empty() {
            return Err(anyhow!("return and cancel URLs are required"));
        }
        for item in &self.items {
            validate_amount(&item.price).map_err(|e| anyhow!("item {}: {e}", item.sku))?;
            if item.currency != self.currency {
                return Err(anyhow!(
                    "item {} currency {} does not match payment currency {}",
                    item.sku,
                    item.currency,
                    self.currency
                ));
            }
            if item.quantity == 0 {
                return Err(anyhow!("item {}: quantity must be at least 1", item.sku));
            }
        }
        Ok(())
    }
}

fn validate_amount(amount: &str) -> Result<()> {
    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    let digits_ok = !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && frac.len() <= 2
        && frac.chars().all(|c| c.is_ascii_digit())
        && !(amount.contains('.') && frac.is_empty());
    if !digits_ok {
        return Err(anyhow!("invalid amount {amount:?}"));
    }
    if amount.chars().all(|c| c == '0' || c == '.') {
        return Err(anyhow!("amount must be positive"));
    }
    Ok(())
}

fn validate_currency(currency: &str) -> Result<()> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(anyhow!("invalid currency code {currency:?}"))
    }
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create(&self, request: &CreatePaymentRequest) -> Result<CreatedPayment>;
    async fn execute(&self, request: &ExecutePaymentRequest) -> Result<ExecutedPayment>;
}

/// Validate, create the payment, and record the gateway's answer.
pub async fn record_created_payment<G>(
    gateway: &G,
    cache: &SecureCache,
    request: &CreatePaymentRequest,
) -> Result<Recorded<CreatedPayment>>
where
    G: PaymentGateway + ?Sized,
{
    request.validate()?;
    let result = gateway.create(request).await?;
    let record_id = cache
        .store(&result)
        .map_err(|e| anyhow!("record payment {}: {e}", result.payment_id))?;
    Ok(Recorded { result, record_id })
}

pub async fn record_executed_payment<G>(
    gateway: &G,
    cache: &SecureCache,
    request: &ExecutePaymentRequest,
) -> Result<Recorded<ExecutedPayment>>
where
    G: PaymentGateway + ?Sized,
{
    if request.payment_id.is_empty() || request.payer_id.is_empty() {
        return Err(anyhow!("payment id and payer id are required"));
    }
    let result = gateway.execute(request).await?;
    let record_id = cache
        .store(&result)
        .map_err(|e| anyhow!("record execution {}: {e}", result.payment_id))?;
    Ok(Recorded { result, record_id })
}
