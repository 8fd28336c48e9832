pub mod prelude;

pub mod companion_message;
