//! Resource contracts shared by the server resources and the client.
//!
//! ```text
//! EntryPoint --catalog--> Catalog --item*--> Item --related*--> Item
//!            --item{id}?-> Item    --first?-> Item --catalog---> Catalog
//! ```

use halway::{ContractBuilder, HalContract};

pub const ENTRY_POINT: &str = "/api";

/// The entry point of the api.
pub struct EntryPoint;

/// The list of all items.
pub struct Catalog;

/// A single item.
pub struct Item;

impl HalContract for EntryPoint {
    fn declare(contract: &mut ContractBuilder) {
        contract
            .relation::<Catalog>("catalog")
            .templated_relation::<Option<Item>>("item", &["id"]);
    }
}

impl HalContract for Catalog {
    fn declare(contract: &mut ContractBuilder) {
        contract
            .state()
            .relation::<Vec<Item>>("item")
            .relation::<Option<Item>>("first");
    }
}

impl HalContract for Item {
    fn declare(contract: &mut ContractBuilder) {
        contract
            .state()
            .relation::<Vec<Item>>("related")
            .relation::<Catalog>("catalog");
    }
}
