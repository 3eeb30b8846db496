//! Typed views over interpreter tables and functions, plus the identity
//! factory that turns indexed tables into long-lived host entities.

mod container;
mod factory;
mod provider;

pub use container::{Container, FromScript};
pub use factory::ObjectFactory;
pub use provider::Provider;

pub(crate) use container::downcast;
