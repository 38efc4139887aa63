//! Typed records stored in each synced collection
//!
//! The sync core moves opaque JSON documents; these types give the rest of
//! the application a typed view of the three collections a driver account
//! owns. Each collection document holds the full state of that collection.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A named logical dataset for a user
pub trait Collection: Send + Sync + 'static {
    /// Collection name as it appears in document paths
    const NAME: &'static str;

    /// Full document value for the collection
    type Value: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;
}

/// Every collection a driver account syncs
pub const KNOWN_COLLECTIONS: &[&str] = &[DeliveryLogs::NAME, Settings::NAME, Expenses::NAME];

/// `deliveryLogs`: one entry per shift
pub struct DeliveryLogs;

impl Collection for DeliveryLogs {
    const NAME: &'static str = "deliveryLogs";
    type Value = Vec<DeliveryLog>;
}

/// `settings`: account-wide preferences
pub struct Settings;

impl Collection for Settings {
    const NAME: &'static str = "settings";
    type Value = DriverSettings;
}

/// `expenses`: fuel, tolls, maintenance
pub struct Expenses;

impl Collection for Expenses {
    const NAME: &'static str = "expenses";
    type Value = Vec<Expense>;
}

/// A logged shift with the pay the platform reported
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLog {
    pub id: String,
    pub date: NaiveDate,
    /// Delivery platform (e.g. "amazon-flex")
    pub platform: String,
    pub stops: u32,
    #[serde(default)]
    pub miles: f64,
    /// Pay in cents as quoted by the platform
    pub base_pay_cents: i64,
    #[serde(default)]
    pub tip_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl DeliveryLog {
    pub fn total_pay_cents(&self) -> i64 {
        self.base_pay_cents + self.tip_cents
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverSettings {
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Reimbursement rate used for mileage deductions
    #[serde(default)]
    pub mileage_rate_cents: i64,

    #[serde(default)]
    pub default_platform: Option<String>,

    #[serde(default)]
    pub weekly_goal_cents: Option<i64>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            mileage_rate_cents: 0,
            default_platform: None,
            weekly_goal_cents: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub date: NaiveDate,
    pub category: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub description: String,
}
