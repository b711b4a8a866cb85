pub mod job;
pub mod requests;
pub mod responses;
pub mod user;
