pub mod cache;
pub mod classification;
pub mod fund;
pub mod price;
