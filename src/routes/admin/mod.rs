pub mod categories;
pub mod contacts;
pub mod outgoing;
pub mod products;
pub mod purchases;
pub mod users;

pub use categories::*;
pub use contacts::*;
pub use outgoing::*;
pub use products::*;
pub use purchases::*;
pub use users::*;
