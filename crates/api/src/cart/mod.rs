//! Shopping cart: identity resolution, row codec, and the mutation
//! protocol.

pub mod identity;
pub mod repository;
pub mod rows;

pub use identity::{CartContext, CartIdentity, MaybeCart, RequireCart};
pub use repository::{CartError, CartRepository, CartSnapshot, QuantityUpdate};
pub use rows::{CartLine, CartMeta, CartRow};
