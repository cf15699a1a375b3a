pub mod item;
pub mod page;
pub mod reservation;
pub mod wishlist;

pub use item::*;
pub use page::*;
pub use reservation::*;
pub use wishlist::*;
