//! Listing records and the draft a new listing is built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::price;

/// A single listing as stored in a product list.
///
/// `id` and `created_at` are assigned when this crate creates a listing.
/// Lists written by older clients lack both, so they stay optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub image: Option<String>,
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub price: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// The (name, price, image) triple used to match listings across lists when
/// merging for display or removing everywhere. An absent image compares
/// equal to an empty one here; `Product::same_listing` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListingIdentity<'a> {
    pub name: &'a str,
    pub price: &'a str,
    pub image: &'a str,
}

impl Product {
    pub fn identity(&self) -> ListingIdentity<'_> {
        ListingIdentity {
            name: &self.name,
            price: &self.price,
            image: self.image.as_deref().unwrap_or(""),
        }
    }

    /// Strict match used before inserting: exact name, price and image,
    /// so an absent image differs from an empty one.
    pub fn same_listing(&self, other: &Product) -> bool {
        self.name == other.name && self.price == other.price && self.image == other.image
    }

    pub fn display_price(&self) -> String {
        price::format_brl(&self.price)
    }
}

/// Form input for a new listing, before validation.
#[derive(Debug, Clone, Default)]
pub struct ProductDraft {
    pub image: Option<String>,
    pub name: String,
    pub category: String,
    pub price: String,
    pub description: String,
    pub store: String,
}

impl ProductDraft {
    /// Names of required fields that are blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.image.as_deref().map_or(true, |s| s.trim().is_empty()) {
            missing.push("image");
        }
        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.category.trim().is_empty() {
            missing.push("category");
        }
        if self.price.trim().is_empty() {
            missing.push("price");
        }
        if self.store.trim().is_empty() {
            missing.push("store");
        }
        missing
    }

    /// Build the stored record: trimmed fields, decimal price, fresh id.
    pub fn into_product(self) -> Product {
        let description = self.description.trim().to_string();
        Product {
            id: Some(Uuid::new_v4()),
            image: self.image.map(|s| s.trim().to_string()),
            name: self.name.trim().to_string(),
            category: self.category.trim().to_string(),
            price: price::normalize(&self.price),
            description: Some(description),
            store: Some(self.store.trim().to_string()),
            created_at: Some(Utc::now()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample(name: &str, price: &str, image: Option<&str>) -> Product {
    Product {
        id: None,
        image: image.map(str::to_string),
        name: name.to_string(),
        category: "Outros".to_string(),
        price: price.to_string(),
        description: None,
        store: None,
        created_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_other_fields() {
        let a = sample("Lamp", "10.00", Some("file:///a.png"));
        let mut b = a.clone();
        b.category = "Casa e Jardim".to_string();
        b.description = Some("different".to_string());
        b.id = Some(Uuid::new_v4());
        assert!(a.same_listing(&b));
    }

    #[test]
    fn test_identity_fields_are_exact() {
        let a = sample("Lamp", "10.00", Some("file:///a.png"));
        assert!(!a.same_listing(&sample("lamp", "10.00", Some("file:///a.png"))));
        assert!(!a.same_listing(&sample("Lamp", "10.0", Some("file:///a.png"))));
        assert!(!a.same_listing(&sample("Lamp", "10.00", Some("file:///b.png"))));
    }

    #[test]
    fn test_missing_vs_empty_image() {
        let absent = sample("Lamp", "1.00", None);
        let empty = sample("Lamp", "1.00", Some(""));
        assert!(!absent.same_listing(&empty));
        assert_eq!(absent.identity(), empty.identity());
    }

    #[test]
    fn test_decode_legacy_record() {
        let raw = r#"{"image":null,"name":"Bike","category":"Esportes","price":"R$ 300,00","extra":1}"#;
        let p: Product = serde_json::from_str(raw).unwrap();
        assert_eq!(p.name, "Bike");
        assert!(p.id.is_none());
        assert!(p.image.is_none());
    }

    #[test]
    fn test_draft_validation_and_build() {
        let draft = ProductDraft {
            image: None,
            name: "  ".to_string(),
            price: "12,50".to_string(),
            ..Default::default()
        };
        assert_eq!(draft.missing_fields(), vec!["image", "name", "category", "store"]);

        let draft = ProductDraft {
            image: Some("file:///bike.jpg".to_string()),
            name: " Bike ".to_string(),
            category: "Esportes".to_string(),
            price: "R$ 300,00".to_string(),
            description: String::new(),
            store: "Extra".to_string(),
        };
        assert!(draft.missing_fields().is_empty());
        let product = draft.into_product();
        assert_eq!(product.name, "Bike");
        assert_eq!(product.price, "300.00");
        assert!(product.id.is_some());
        assert!(product.created_at.is_some());
    }
}
