use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;
use crate::entity::Entity;

// ============================================================================
// Catalog Entities
// ============================================================================
//
// Reference data orders point at. Only what order logic reads is modelled.
//
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Option<Uuid>,
    pub name: String,
    pub unit_price: Money,
    pub units_in_stock: u32,
    pub discontinued: bool,
}

impl Product {
    pub fn new(name: impl Into<String>, unit_price: Money, units_in_stock: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            unit_price,
            units_in_stock,
            discontinued: false,
        }
    }
}

impl Entity for Product {
    const TYPE_NAME: &'static str = "Product";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Option<Uuid>,
    pub name: String,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

impl Entity for Customer {
    const TYPE_NAME: &'static str = "Customer";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        self.name.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
}

impl Employee {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

impl Entity for Employee {
    const TYPE_NAME: &'static str = "Employee";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipper {
    pub id: Option<Uuid>,
    pub company_name: String,
}

impl Entity for Shipper {
    const TYPE_NAME: &'static str = "Shipper";

    fn id(&self) -> Option<Uuid> {
        self.id
    }

    fn assign_id(&mut self, id: Uuid) {
        self.id = Some(id);
    }

    fn display(&self) -> String {
        self.company_name.clone()
    }
}
