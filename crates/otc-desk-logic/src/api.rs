//! Wire types of the orderflow HTTP surface, shared by the service and the
//! HTTP index client

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::OrderFilter;
use crate::types::{Address, ParseHexError};

/// Response envelope: `{success, message?, data?, error?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    // `default` would add a `T: Default` bound to the derived Deserialize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            error: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid {field}: {source}")]
pub struct InvalidQuery {
    pub field: &'static str,
    pub source: ParseHexError,
}

/// Query string of `GET /order` and `DELETE /order`
///
/// Empty parameters are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell_token_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_token_address: Option<String>,
}

impl OrderQuery {
    pub fn from_filter(filter: &OrderFilter) -> Self {
        Self {
            id: None,
            escrow_address: filter.escrow_address.map(|a| a.to_string()),
            sell_token_address: filter.sell_token_address.map(|a| a.to_string()),
            buy_token_address: filter.buy_token_address.map(|a| a.to_string()),
        }
    }

    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    pub fn filter(&self) -> Result<OrderFilter, InvalidQuery> {
        Ok(OrderFilter {
            escrow_address: parse_param("escrow_address", &self.escrow_address)?,
            sell_token_address: parse_param("sell_token_address", &self.sell_token_address)?,
            buy_token_address: parse_param("buy_token_address", &self.buy_token_address)?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_param(field: &'static str, value: &Option<String>) -> Result<Option<Address>, InvalidQuery> {
    non_empty(value)
        .map(|v| v.parse::<Address>().map_err(|source| InvalidQuery { field, source }))
        .transpose()
}
