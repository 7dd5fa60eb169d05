use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The slice of an account the payment processor needs to pick a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub external_key: String,
    /// Default payment method, if the account has one.
    pub payment_method_id: Option<Uuid>,
}

impl Account {
    pub fn new(external_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_key: external_key.into(),
            payment_method_id: None,
        }
    }

    pub fn with_payment_method(mut self, payment_method_id: Uuid) -> Self {
        self.payment_method_id = Some(payment_method_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub account_id: Uuid,
    pub plugin_name: String,
}

impl PaymentMethod {
    pub fn new(account_id: Uuid, plugin_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            plugin_name: plugin_name.into(),
        }
    }
}

/// A domain event published on the notification bus after a payment operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_type: String,
    pub account_id: Uuid,
    #[serde(default)]
    pub payload: Value,
}

impl PaymentEvent {
    pub fn new(event_type: impl Into<String>, account_id: Uuid) -> Self {
        Self {
            event_type: event_type.into(),
            account_id,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
