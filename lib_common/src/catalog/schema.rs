//! # Outlet Catalog Schema
//!
//! Wire types for the outlet search endpoint. Only the fields the bot uses are
//! modelled; everything else in the payload is ignored. Every field is
//! optional on the wire because the endpoint omits them freely.
//!
//! The payload nests items two levels deep:
//! `{"products": {"results": [{"results": [item, ...]}, ...]}}`.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::core::model::{Item, ItemKey};

/// Top-level search response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResult {
    /// The product groups.
    pub products: Products,
    /// Total hit count as reported by the endpoint.
    #[serde(default)]
    pub total: u64,
}

/// Product groups of a search response.
#[derive(Debug, Clone, Deserialize)]
pub struct Products {
    /// One entry per group.
    #[serde(default)]
    pub results: Vec<ResultGroup>,
}

/// A group of sale records.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultGroup {
    /// The records in this group.
    #[serde(default)]
    pub results: Vec<SaleRecord>,
}

/// A price as the endpoint formats it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Price {
    /// Display amount, e.g. "4 990,-".
    pub amount: Option<String>,
}

/// Store or warehouse holding the record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    /// Display name.
    pub name: Option<String>,
}

/// A single outlet record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    /// Record id; the endpoint sends numbers or strings.
    pub rec_id: Option<Value>,
    /// Serial number of the physical piece.
    pub invent_serial: Option<String>,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Current price.
    pub sales_price: Option<Price>,
    /// Price before discount.
    pub list_price: Option<Price>,
    /// Discount label.
    pub discount_text: Option<String>,
    /// Holding location.
    pub location: Option<Location>,
    /// Product page path.
    pub url_path: Option<String>,
}

impl SaleRecord {
    /// Identity key: `recId`, else `inventSerial`, else `urlPath`, else the
    /// title.
    pub fn key(&self) -> ItemKey {
        let rec_id = self.rec_id.as_ref().and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let key = rec_id
            .or_else(|| non_blank(&self.invent_serial))
            .or_else(|| non_blank(&self.url_path))
            .unwrap_or_else(|| self.title.clone());
        ItemKey(key)
    }

    /// Converts the wire record into a domain [`Item`].
    pub fn into_item(self) -> Item {
        Item {
            key: self.key(),
            title: self.title,
            sales_price: self.sales_price.and_then(|p| p.amount),
            list_price: self.list_price.and_then(|p| p.amount),
            discount_text: self.discount_text,
            location: self.location.and_then(|l| l.name),
            url_path: self.url_path,
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl ApiResult {
    /// Flattens all groups into one set of items.
    pub fn into_items(self) -> HashSet<Item> {
        self.products
            .results
            .into_iter()
            .flat_map(|group| group.results)
            .map(SaleRecord::into_item)
            .collect()
    }
}
