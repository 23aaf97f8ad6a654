pub mod insight;
pub mod review;
