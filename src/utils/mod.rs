pub mod address_validator;
pub mod recipient_list;

pub use address_validator::AddressValidator;
pub use recipient_list::{load_recipients, parse_recipients, RecipientList};
