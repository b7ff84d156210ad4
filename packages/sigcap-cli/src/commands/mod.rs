pub mod discover;
pub mod kinds;
pub mod record;
