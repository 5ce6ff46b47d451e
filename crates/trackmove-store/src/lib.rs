mod schema;
mod store;

pub use store::{ActivityStore, StoreError};
