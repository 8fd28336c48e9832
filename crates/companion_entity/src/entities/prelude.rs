pub use super::companion_message::{Entity as CompanionMessage, Role};
