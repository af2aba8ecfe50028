//! Category and store lookups.
//!
//! Both come from the API; when the API is unreachable or answers with an
//! unexpected shape, built-in lists are used so the add-product flow keeps
//! working offline.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiClient, Method};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Store {
    pub id: i64,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "imagem", default)]
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Api,
    Fallback,
}

const FALLBACK_CATEGORIES: &[&str] = &[
    "Eletrônicos",
    "Roupas",
    "Casa e Jardim",
    "Esportes",
    "Livros",
    "Automóveis",
    "Beleza",
    "Alimentação",
    "Brinquedos",
    "Outros",
];

const FALLBACK_STORES: &[&str] = &["Carrefour", "Extra", "Pão de Açúcar", "Walmart", "Assaí"];

pub fn fallback_categories() -> Vec<Category> {
    FALLBACK_CATEGORIES
        .iter()
        .zip(1..)
        .map(|(name, id)| Category {
            id,
            name: name.to_string(),
        })
        .collect()
}

pub fn fallback_stores() -> Vec<Store> {
    FALLBACK_STORES
        .iter()
        .zip(1..)
        .map(|(name, id)| Store {
            id,
            name: name.to_string(),
            image: String::new(),
        })
        .collect()
}

pub fn categories(api: &dyn ApiClient) -> (Vec<Category>, Source) {
    match fetch_items::<Category>(api, "api/categories") {
        Some(list) => {
            debug!(count = list.len(), "categories loaded from API");
            (list, Source::Api)
        }
        None => (fallback_categories(), Source::Fallback),
    }
}

pub fn stores(api: &dyn ApiClient) -> (Vec<Store>, Source) {
    match fetch_items::<Store>(api, "api/stores") {
        Some(list) => {
            debug!(count = list.len(), "stores loaded from API");
            (list, Source::Api)
        }
        None => (fallback_stores(), Source::Fallback),
    }
}

/// `GET path` and decode `body.data` as a list of `T`
fn fetch_items<T: DeserializeOwned>(api: &dyn ApiClient, path: &str) -> Option<Vec<T>> {
    let mut body = match api.request(Method::Get, None, path) {
        Ok(body) => body,
        Err(e) => {
            warn!(path, error = %e, "lookup failed; using built-in list");
            return None;
        }
    };

    match serde_json::from_value(body.get_mut("data").map(Value::take).unwrap_or_default()) {
        Ok(items) => Some(items),
        Err(e) => {
            warn!(path, error = %e, "unexpected response shape; using built-in list");
            None
        }
    }
}
